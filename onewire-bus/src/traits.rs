use crate::{
    ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD, ONEWIRE_SKIP_ROM_CMD, OneWireError,
    OneWireResult, RomId,
};

/// Status of the bus after a reset pulse.
pub trait OneWireStatus {
    /// At least one device answered the reset with a presence pulse.
    fn presence(&self) -> bool;

    /// The bus line was found shorted during the reset.
    fn shortcircuit(&self) -> bool {
        false
    }
}

/// A plain presence flag, for buses that report nothing else.
impl OneWireStatus for bool {
    fn presence(&self) -> bool {
        *self
    }
}

/// Trait for 1-Wire communication.
/// This trait defines the basic operations required for 1-Wire communication, such as resetting the bus,
/// writing and reading bytes, and writing and reading bits.
///
/// Every operation blocks until the transaction on the wire has completed. Only one transaction
/// is ever in flight on a bus, which the `&mut self` receivers enforce.
pub trait OneWire {
    /// The status type returned by the reset operation.
    /// This type must implement the [OneWireStatus] trait.
    type Status: OneWireStatus;
    /// The error type returned by the operations of this trait.
    /// This type is used to indicate errors in the underlying hardware or communication.
    type BusError;

    /// Resets the 1-Wire bus and returns the status of the bus.
    ///
    /// # Errors
    /// Implementations may report a missing presence pulse either through the returned status
    /// or as [OneWireError::NoDevicePresent]; callers should use [OneWire::presence] when
    /// they only care whether a device answered.
    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError>;

    /// Writes a byte to the 1-Wire bus, least significant bit first.
    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError>;

    /// Reads a byte from the 1-Wire bus, least significant bit first.
    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError>;

    /// Writes a single bit to the 1-Wire bus.
    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError>;

    /// Reads a single bit from the 1-Wire bus.
    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Writes a byte and turns on the strong pull-up right after its last bit.
    ///
    /// Parasite-powered devices draw their operating current through the data line during
    /// temperature conversion or EEPROM writes. The pull-up stays on until
    /// [OneWire::disable_pull_up] is called.
    fn write_byte_pull_up(&mut self, _byte: u8) -> OneWireResult<(), Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Turns off the strong pull-up.
    fn disable_pull_up(&mut self) -> OneWireResult<(), Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Resets the bus and reports whether any device answered.
    ///
    /// A missing presence pulse is not an error here; a shorted bus is.
    fn presence(&mut self) -> OneWireResult<bool, Self::BusError> {
        match self.reset() {
            Ok(status) if status.shortcircuit() => Err(OneWireError::ShortCircuit),
            Ok(status) => Ok(status.presence()),
            Err(OneWireError::NoDevicePresent) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Writes all bytes of `bytes` in order.
    fn write_bytes(&mut self, bytes: &[u8]) -> OneWireResult<(), Self::BusError> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        Ok(())
    }

    /// Fills `buf` with bytes read from the bus.
    fn read_bytes(&mut self, buf: &mut [u8]) -> OneWireResult<(), Self::BusError> {
        for b in buf.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }

    /// Addresses devices on the 1-Wire bus.
    /// The bus is reset, then either the device with ROM code `rom` is selected with Match ROM,
    /// or, for [`None`], every device is selected with Skip ROM.
    ///
    /// Note: reading after a Skip ROM returns garbage on a bus with multiple devices.
    ///
    /// # Errors
    /// [OneWireError::NoDevicePresent] when nothing answered the reset.
    fn address(&mut self, rom: Option<RomId>) -> OneWireResult<(), Self::BusError> {
        if !self.presence()? {
            return Err(OneWireError::NoDevicePresent);
        }
        match rom {
            Some(rom) => {
                self.write_byte(ONEWIRE_MATCH_ROM_CMD)?;
                self.write_bytes(&rom.to_le_bytes())
            }
            None => self.write_byte(ONEWIRE_SKIP_ROM_CMD),
        }
    }

    /// Reads the ROM code of the only device on the bus.
    ///
    /// Returns `None` when nothing answered the reset.
    fn read_rom(&mut self) -> OneWireResult<Option<RomId>, Self::BusError> {
        if !self.presence()? {
            return Ok(None);
        }
        self.write_byte(ONEWIRE_READ_ROM_CMD)?;
        let mut bytes = [0u8; RomId::BYTES];
        self.read_bytes(&mut bytes)?;
        let rom = RomId::from(bytes);
        if rom.is_valid() {
            Ok(Some(rom))
        } else {
            Err(OneWireError::InvalidRomCrc)
        }
    }
}
