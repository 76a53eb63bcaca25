//! A simulated 1-Wire bus.
//!
//! [SimulatedBus] models a population of devices sharing one open-drain line: every read slot
//! returns the wired-AND of what the selected devices drive, so the ROM search sees the same
//! collisions it would on real hardware. The devices behave like DS18B20 temperature sensors
//! as far as their function commands go (convert, scratchpad access, EEPROM copy/recall,
//! power supply query).
//!
//! Faults can be injected to exercise error paths: scratchpads with a bad CRC, devices that
//! leave the bus during a search, search passes whose last bit is misread.

use crate::{
    ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_ROM_CMD,
    ONEWIRE_SEARCH_CMD, ONEWIRE_SKIP_ROM_CMD, OneWire, OneWireResult, RomId, calc_crc8,
};
use alloc::vec::Vec;
use core::convert::Infallible;

const CONVERT_T: u8 = 0x44;
const WRITE_SCRATCHPAD: u8 = 0x4e;
const READ_SCRATCHPAD: u8 = 0xbe;
const COPY_SCRATCHPAD: u8 = 0x48;
const RECALL_E2: u8 = 0xb8;
const READ_POWER_SUPPLY: u8 = 0xb4;

/// Scratchpad of a freshly powered DS18B20: 85 °C, TH 75, TL 70, 12-bit resolution.
const POWER_ON_SCRATCHPAD: [u8; 8] = [0x50, 0x05, 0x4b, 0x46, 0x7f, 0xff, 0x0c, 0x10];

/// One device on a [SimulatedBus].
#[derive(Debug, Clone)]
pub struct SimDevice {
    rom: RomId,
    present: bool,
    selected: bool,
    alarm: bool,
    parasite: bool,
    temperature: u16,
    scratchpad: [u8; 8],
    eeprom: [u8; 3],
    corrupt_scratchpad: bool,
    unplug_at: Option<u8>,
}

impl SimDevice {
    /// A powered-up device with the given ROM code. The code is used as-is, a bad CRC included.
    pub fn new(rom: RomId) -> Self {
        Self {
            rom,
            present: true,
            selected: false,
            alarm: false,
            parasite: false,
            temperature: 0x0550,
            scratchpad: POWER_ON_SCRATCHPAD,
            eeprom: [
                POWER_ON_SCRATCHPAD[2],
                POWER_ON_SCRATCHPAD[3],
                POWER_ON_SCRATCHPAD[4],
            ],
            corrupt_scratchpad: false,
            unplug_at: None,
        }
    }

    /// Raw temperature register latched by the next conversion.
    pub fn with_temperature(mut self, raw: u16) -> Self {
        self.temperature = raw;
        self
    }

    /// Whether the device answers an alarm search.
    pub fn with_alarm(mut self, alarm: bool) -> Self {
        self.alarm = alarm;
        self
    }

    /// Whether the device reports parasite power.
    pub fn with_parasite_power(mut self, parasite: bool) -> Self {
        self.parasite = parasite;
        self
    }

    /// Every scratchpad read returns a wrong CRC byte.
    pub fn with_corrupt_scratchpad(mut self) -> Self {
        self.corrupt_scratchpad = true;
        self
    }

    /// The device disappears from the bus as soon as a search pass it takes part in reaches `bit`.
    pub fn unplug_at_bit(mut self, bit: u8) -> Self {
        self.unplug_at = Some(bit);
        self
    }

    /// Changes the temperature latched by the next conversion.
    pub fn set_temperature(&mut self, raw: u16) {
        self.temperature = raw;
    }

    /// Temperature latched by the next conversion.
    pub fn temperature(&self) -> u16 {
        self.temperature
    }

    /// ROM code of the device.
    pub fn rom(&self) -> RomId {
        self.rom
    }

    /// Whether the device is still attached.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Bytes 0-7 of the scratchpad.
    pub fn scratchpad(&self) -> [u8; 8] {
        self.scratchpad
    }

    /// Alarm thresholds and configuration held in EEPROM.
    pub fn eeprom(&self) -> [u8; 3] {
        self.eeprom
    }

    fn scratchpad_byte(&self, index: usize) -> u8 {
        match index {
            0..8 => self.scratchpad[index],
            8 if self.corrupt_scratchpad => !calc_crc8(&self.scratchpad),
            8 => calc_crc8(&self.scratchpad),
            _ => 0xff,
        }
    }

    fn convert(&mut self) {
        let [lsb, msb] = self.temperature.to_le_bytes();
        self.scratchpad[0] = lsb;
        self.scratchpad[1] = msb;
        let value = self.temperature as i16 >> 4;
        let (th, tl) = (self.scratchpad[2] as i8, self.scratchpad[3] as i8);
        self.alarm = value >= th as i16 || value <= tl as i16;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    RomCommand,
    Search { bit: u8, reads: u8 },
    MatchRom { received: usize },
    ReadRom { sent: usize },
    Function,
    ReadScratchpad { sent: usize },
    WriteScratchpad { received: usize },
    PowerSupply,
}

/// A simulated bus populated with [SimDevice]s.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    devices: Vec<SimDevice>,
    phase: Phase,
    match_buf: [u8; RomId::BYTES],
    pull_up: bool,
    pull_up_cycles: usize,
    resets: usize,
    written: Vec<u8>,
    corrupt_passes: usize,
}

impl SimulatedBus {
    /// Creates a bus carrying `devices`.
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            devices,
            phase: Phase::Idle,
            match_buf: [0; RomId::BYTES],
            pull_up: false,
            pull_up_cycles: 0,
            resets: 0,
            written: Vec::new(),
            corrupt_passes: 0,
        }
    }

    /// Attaches another device.
    pub fn attach(&mut self, device: SimDevice) {
        self.devices.push(device);
    }

    /// Removes every device with ROM code `rom` from the bus.
    pub fn detach(&mut self, rom: RomId) {
        for device in self.devices.iter_mut().filter(|d| d.rom == rom) {
            device.present = false;
        }
    }

    /// Misreads the last bit of each of the next `passes` search passes.
    pub fn corrupt_search_passes(&mut self, passes: usize) {
        self.corrupt_passes = passes;
    }

    /// Devices on the bus, detached ones included.
    pub fn devices(&self) -> &[SimDevice] {
        &self.devices
    }

    /// Mutable access to the device with ROM code `rom`.
    pub fn device_mut(&mut self, rom: RomId) -> Option<&mut SimDevice> {
        self.devices.iter_mut().find(|d| d.rom == rom)
    }

    /// Number of reset pulses issued so far.
    pub fn resets(&self) -> usize {
        self.resets
    }

    /// Every byte written to the bus so far, ROM and function commands included.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Whether the strong pull-up is currently on.
    pub fn pull_up_enabled(&self) -> bool {
        self.pull_up
    }

    /// Number of times the strong pull-up was turned on.
    pub fn pull_up_cycles(&self) -> usize {
        self.pull_up_cycles
    }

    fn selected(&self) -> impl Iterator<Item = &SimDevice> {
        self.devices.iter().filter(|d| d.present && d.selected)
    }

    fn select_where(&mut self, pred: impl Fn(&SimDevice) -> bool) {
        for device in self.devices.iter_mut() {
            device.selected = device.present && pred(device);
        }
    }

    /// Wired-AND of the bytes driven by every selected device; an idle line reads high.
    fn wired_and(&self, byte: impl Fn(&SimDevice) -> u8) -> u8 {
        self.selected().fold(0xff, |acc, d| acc & byte(d))
    }

    fn function_command(&mut self, cmd: u8) {
        self.phase = match cmd {
            CONVERT_T => {
                for device in self.devices.iter_mut().filter(|d| d.present && d.selected) {
                    device.convert();
                }
                Phase::Idle
            }
            READ_SCRATCHPAD => Phase::ReadScratchpad { sent: 0 },
            WRITE_SCRATCHPAD => Phase::WriteScratchpad { received: 0 },
            COPY_SCRATCHPAD => {
                for device in self.devices.iter_mut().filter(|d| d.present && d.selected) {
                    device.eeprom.copy_from_slice(&device.scratchpad[2..5]);
                }
                Phase::Idle
            }
            RECALL_E2 => {
                for device in self.devices.iter_mut().filter(|d| d.present && d.selected) {
                    device.scratchpad[2..5].copy_from_slice(&device.eeprom);
                }
                Phase::Idle
            }
            READ_POWER_SUPPLY => Phase::PowerSupply,
            _ => Phase::Idle,
        };
    }
}

impl OneWire for SimulatedBus {
    type Status = bool;
    type BusError = Infallible;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        self.resets += 1;
        self.select_where(|_| true);
        let presence = self.selected().next().is_some();
        self.phase = if presence {
            Phase::RomCommand
        } else {
            Phase::Idle
        };
        Ok(presence)
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.written.push(byte);
        self.phase = match self.phase {
            Phase::RomCommand => match byte {
                ONEWIRE_SEARCH_CMD => Phase::Search { bit: 0, reads: 0 },
                ONEWIRE_CONDITIONAL_SEARCH_CMD => {
                    self.select_where(|d| d.alarm);
                    Phase::Search { bit: 0, reads: 0 }
                }
                ONEWIRE_MATCH_ROM_CMD => Phase::MatchRom { received: 0 },
                ONEWIRE_SKIP_ROM_CMD => Phase::Function,
                ONEWIRE_READ_ROM_CMD => Phase::ReadRom { sent: 0 },
                _ => Phase::Idle,
            },
            Phase::MatchRom { received } => {
                self.match_buf[received] = byte;
                if received + 1 == RomId::BYTES {
                    let rom = RomId::from(self.match_buf);
                    self.select_where(|d| d.rom == rom);
                    Phase::Function
                } else {
                    Phase::MatchRom {
                        received: received + 1,
                    }
                }
            }
            Phase::Function => {
                self.function_command(byte);
                self.phase
            }
            Phase::WriteScratchpad { received } => {
                for device in self.devices.iter_mut().filter(|d| d.present && d.selected) {
                    device.scratchpad[2 + received] = byte;
                }
                if received + 1 == 3 {
                    Phase::Idle
                } else {
                    Phase::WriteScratchpad {
                        received: received + 1,
                    }
                }
            }
            _ => Phase::Idle,
        };
        Ok(())
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        let byte = match self.phase {
            Phase::ReadScratchpad { sent } => {
                self.phase = Phase::ReadScratchpad { sent: sent + 1 };
                self.wired_and(|d| d.scratchpad_byte(sent))
            }
            Phase::ReadRom { sent } if sent < RomId::BYTES => {
                self.phase = Phase::ReadRom { sent: sent + 1 };
                self.wired_and(|d| d.rom.to_le_bytes()[sent])
            }
            _ => 0xff,
        };
        Ok(byte)
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        if let Phase::Search { bit: position, reads: 2 } = self.phase {
            for device in self.devices.iter_mut().filter(|d| d.selected) {
                if device.rom.bit(position) != bit {
                    device.selected = false;
                }
            }
            self.phase = if position + 1 == RomId::BITS {
                self.corrupt_passes = self.corrupt_passes.saturating_sub(1);
                Phase::Idle
            } else {
                Phase::Search {
                    bit: position + 1,
                    reads: 0,
                }
            };
        }
        Ok(())
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        let bit = match self.phase {
            Phase::Search { bit, reads } if reads < 2 => {
                if reads == 0 {
                    for device in self.devices.iter_mut().filter(|d| d.present && d.selected) {
                        if device.unplug_at == Some(bit) {
                            device.present = false;
                        }
                    }
                }
                self.phase = Phase::Search {
                    bit,
                    reads: reads + 1,
                };
                let complement = reads == 1;
                let misread = self.corrupt_passes > 0 && bit + 1 == RomId::BITS;
                self.selected()
                    .all(|d| d.rom.bit(bit) != complement)
                    ^ misread
            }
            Phase::PowerSupply => !self.selected().any(|d| d.parasite),
            _ => true,
        };
        Ok(bit)
    }

    fn write_byte_pull_up(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.write_byte(byte)?;
        self.pull_up = true;
        self.pull_up_cycles += 1;
        Ok(())
    }

    fn disable_pull_up(&mut self) -> OneWireResult<(), Self::BusError> {
        self.pull_up = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn presence_follows_population() {
        let rom = RomId::with_crc(0x28, 1);
        let mut bus = SimulatedBus::new(vec![]);
        assert!(!bus.presence().unwrap());
        bus.attach(SimDevice::new(rom));
        assert!(bus.presence().unwrap());
        bus.detach(rom);
        assert!(!bus.presence().unwrap());
        assert_eq!(bus.resets(), 3);
    }

    #[test]
    fn read_rom_single_drop() {
        let rom = RomId::with_crc(0x28, 0x42);
        let mut bus = SimulatedBus::new(vec![SimDevice::new(rom)]);
        assert_eq!(bus.read_rom().unwrap(), Some(rom));
        let mut empty = SimulatedBus::new(vec![]);
        assert_eq!(empty.read_rom().unwrap(), None);
    }

    #[test]
    fn read_rom_collision() {
        let mut bus = SimulatedBus::new(vec![
            SimDevice::new(RomId::with_crc(0x28, 0x01)),
            SimDevice::new(RomId::with_crc(0x28, 0x02)),
        ]);
        assert_eq!(bus.read_rom(), Err(crate::OneWireError::InvalidRomCrc));
    }

    #[test]
    fn matched_scratchpad_read() {
        let a = RomId::with_crc(0x28, 0x0a);
        let b = RomId::with_crc(0x28, 0x0b);
        let mut bus = SimulatedBus::new(vec![
            SimDevice::new(a).with_temperature(0x0191),
            SimDevice::new(b).with_temperature(0xff5e),
        ]);
        bus.address(None).unwrap();
        bus.write_byte(CONVERT_T).unwrap();
        bus.address(Some(b)).unwrap();
        bus.write_byte(READ_SCRATCHPAD).unwrap();
        let mut buf = [0u8; 9];
        bus.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0x5e, 0xff]);
        assert!(crate::OneWireCrc::validate(&buf));
    }

    #[test]
    fn pull_up_is_tracked() {
        let mut bus = SimulatedBus::new(vec![SimDevice::new(RomId::with_crc(0x28, 3))]);
        bus.address(None).unwrap();
        bus.write_byte_pull_up(CONVERT_T).unwrap();
        assert!(bus.pull_up_enabled());
        bus.disable_pull_up().unwrap();
        assert!(!bus.pull_up_enabled());
        assert_eq!(bus.pull_up_cycles(), 1);
    }
}
