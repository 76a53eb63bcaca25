#![no_std]
#![deny(missing_docs)]
//! # ds18b20-host
//! Polls every DS18B20 temperature sensor found on a 1-Wire bus.
//!
//! A [Ds18b20Host] is built from a ROM search and keeps one [Device] entry per sensor. Polling
//! is split in two phases so the caller can do other work while the sensors convert:
//!
//! 1. [Ds18b20Host::request_readings] starts a conversion on all sensors at once,
//! 2. after at least [Ds18b20Host::conversion_time_ms], [Ds18b20Host::retrieve_readings]
//!    reads every sensor's scratchpad and returns one [Reading] per sensor that answered
//!    with a valid CRC.
//!
//! A sensor that fails to answer, or answers with a bad CRC, is skipped for that round only.

extern crate alloc;

mod scratchpad;

pub use scratchpad::{
    Config, ReadoutResolution, Scratchpad, Temperature, raw_to_celsius, raw_to_temperature,
};

use alloc::vec::Vec;
use embedded_hal::delay::DelayNs;
use onewire_bus::{
    OneWire, OneWireError, OneWireResult, OneWireSearch, OneWireSearchKind, RomId,
};

/// Family code of the DS18B20.
pub const DS18B20_FAMILY_CODE: u8 = 0x28;

const DS18B20_CONVERT_T: u8 = 0x44;
const DS18B20_READ_SCRATCH: u8 = 0xbe;
const DS18B20_WRITE_SCRATCH: u8 = 0x4e;
const DS18B20_COPY_SCRATCH: u8 = 0x48;
const DS18B20_RECALL_EEPROM: u8 = 0xb8;
const DS18B20_READ_POWERMODE: u8 = 0xb4;

/// A registered sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    rom: RomId,
    crc_failures: u32,
}

impl Device {
    /// ROM code of the sensor.
    pub fn rom(&self) -> RomId {
        self.rom
    }

    /// Scratchpad reads rejected for a bad CRC since the last good one. Informational only.
    pub fn crc_failures(&self) -> u32 {
        self.crc_failures
    }
}

/// One temperature sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Sensor the sample comes from.
    pub rom: RomId,
    /// Temperature register as read from the scratchpad.
    pub raw: u16,
}

impl Reading {
    /// Temperature as a fixed-point value.
    pub fn temperature(&self) -> Temperature {
        raw_to_temperature(self.raw)
    }

    /// Temperature in °C.
    pub fn celsius(&self) -> f32 {
        raw_to_celsius(self.raw)
    }
}

/// How the sensors on the bus are powered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSupply {
    /// At least one sensor draws power from the data line.
    Parasite,
    /// Every sensor has its own supply.
    External,
}

/// Registry of the DS18B20 sensors on one bus, and the conversion protocol to poll them.
#[derive(Debug, Clone, Default)]
pub struct Ds18b20Host {
    devices: Vec<Device>,
    resolution: ReadoutResolution,
    parasite: bool,
    pull_up: bool,
}

impl Ds18b20Host {
    /// Searches the bus and registers every DS18B20 found.
    ///
    /// No bus traffic happens besides the search itself.
    ///
    /// # Errors
    /// Fails if the search gives up on ROM CRC errors, or on a bus error.
    pub fn new<O: OneWire>(bus: &mut O) -> OneWireResult<Self, O::BusError> {
        let roms = OneWireSearch::new(bus, OneWireSearchKind::Normal).search()?;
        let host = Self::from_roms(roms);
        log::info!("Found {} devices", host.devices.len());
        Ok(host)
    }

    /// Registers the DS18B20s among `roms` without touching the bus.
    ///
    /// ROM codes of other families, or with a bad CRC, are ignored.
    pub fn from_roms(roms: impl IntoIterator<Item = RomId>) -> Self {
        let mut host = Self::default();
        for rom in roms {
            if rom.family_code() != DS18B20_FAMILY_CODE || !rom.is_valid() {
                continue;
            }
            if host.devices.iter().any(|d| d.rom == rom) {
                continue;
            }
            log::info!("device found: {rom}");
            host.devices.push(Device {
                rom,
                crc_failures: 0,
            });
        }
        host
    }

    /// Resolution the sensors are assumed to convert at, which sets the conversion time.
    pub fn with_resolution(mut self, resolution: ReadoutResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Whether to drive the strong pull-up while sensors convert or write EEPROM.
    pub fn with_parasite_power(mut self, parasite: bool) -> Self {
        self.parasite = parasite;
        self
    }

    /// Registered sensors.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Current conversion resolution.
    pub fn resolution(&self) -> ReadoutResolution {
        self.resolution
    }

    /// Time to leave between [Ds18b20Host::request_readings] and
    /// [Ds18b20Host::retrieve_readings].
    pub fn conversion_time_ms(&self) -> u32 {
        self.resolution.delay_ms()
    }

    /// Blocks for the conversion time.
    ///
    /// For callers with nothing else to do between the two polling phases.
    pub fn wait_for_conversion<D: DelayNs>(&self, delay: &mut D) {
        delay.delay_us(self.resolution.delay_us());
    }

    /// Starts a temperature conversion on every sensor at once.
    ///
    /// Returns immediately; readings are valid after [Ds18b20Host::conversion_time_ms].
    /// If no device answers the reset the request is dropped, which only shows up as missing
    /// readings later.
    pub fn request_readings<O: OneWire>(&mut self, bus: &mut O) -> OneWireResult<(), O::BusError> {
        self.release_pull_up(bus)?;
        if !Self::address(bus, None)? {
            return Ok(());
        }
        self.write_powered(bus, DS18B20_CONVERT_T)
    }

    /// Reads the result of the last conversion from every sensor.
    ///
    /// Each sensor is addressed on its own. A sensor that does not answer, or whose scratchpad
    /// fails its CRC, is left out of this round but stays registered; consecutive CRC failures
    /// are counted in [Device::crc_failures], and a good read clears the count.
    pub fn retrieve_readings<O: OneWire>(
        &mut self,
        bus: &mut O,
    ) -> OneWireResult<Vec<Reading>, O::BusError> {
        self.release_pull_up(bus)?;
        let mut readings = Vec::with_capacity(self.devices.len());
        for device in self.devices.iter_mut() {
            let Some(scratchpad) = Self::read_scratchpad(bus, device.rom)? else {
                continue;
            };
            if !scratchpad.is_valid() {
                device.crc_failures = device.crc_failures.saturating_add(1);
                log::warn!(
                    "crc failed for {}: {:02x?}",
                    device.rom,
                    scratchpad.as_bytes()
                );
                continue;
            }
            device.crc_failures = 0;
            readings.push(Reading {
                rom: device.rom,
                raw: scratchpad.raw_temperature(),
            });
        }
        Ok(readings)
    }

    /// Reads the scratchpad of one sensor, CRC unchecked.
    ///
    /// Returns `None` when no device answered the reset.
    pub fn read_scratchpad<O: OneWire>(
        bus: &mut O,
        rom: RomId,
    ) -> OneWireResult<Option<Scratchpad>, O::BusError> {
        if !Self::address(bus, Some(rom))? {
            return Ok(None);
        }
        bus.write_byte(DS18B20_READ_SCRATCH)?;
        let mut buf = [0; Scratchpad::BYTES];
        bus.read_bytes(&mut buf)?;
        Ok(Some(Scratchpad::from(buf)))
    }

    /// Writes alarm thresholds and resolution to every sensor's scratchpad.
    ///
    /// Returns `false` if no device answered. The values are lost at power-off unless
    /// [Ds18b20Host::persist] is called.
    pub fn configure<O: OneWire>(
        &mut self,
        bus: &mut O,
        config: Config,
    ) -> OneWireResult<bool, O::BusError> {
        self.release_pull_up(bus)?;
        if !Self::address(bus, None)? {
            return Ok(false);
        }
        bus.write_byte(DS18B20_WRITE_SCRATCH)?;
        bus.write_byte(config.high as _)?;
        bus.write_byte(config.low as _)?;
        bus.write_byte(config.resolution as _)?;
        self.resolution = config.resolution;
        Ok(true)
    }

    /// Copies every sensor's alarm and configuration registers to EEPROM.
    ///
    /// Parasite-powered sensors need the pull-up for at least 10 ms afterwards; it is
    /// released by the next operation of this host.
    pub fn persist<O: OneWire>(&mut self, bus: &mut O) -> OneWireResult<bool, O::BusError> {
        self.release_pull_up(bus)?;
        if !Self::address(bus, None)? {
            return Ok(false);
        }
        self.write_powered(bus, DS18B20_COPY_SCRATCH)?;
        Ok(true)
    }

    /// Reloads every sensor's alarm and configuration registers from EEPROM.
    pub fn recall<O: OneWire>(&mut self, bus: &mut O) -> OneWireResult<bool, O::BusError> {
        self.release_pull_up(bus)?;
        if !Self::address(bus, None)? {
            return Ok(false);
        }
        bus.write_byte(DS18B20_RECALL_EEPROM)?;
        Ok(true)
    }

    /// Asks whether any sensor on the bus is parasite powered.
    ///
    /// Returns `None` if no device answered.
    pub fn read_power_supply<O: OneWire>(
        &mut self,
        bus: &mut O,
    ) -> OneWireResult<Option<PowerSupply>, O::BusError> {
        self.release_pull_up(bus)?;
        if !Self::address(bus, None)? {
            return Ok(None);
        }
        bus.write_byte(DS18B20_READ_POWERMODE)?;
        // parasite powered devices pull the slot low
        Ok(Some(if bus.read_bit()? {
            PowerSupply::External
        } else {
            PowerSupply::Parasite
        }))
    }

    /// Resets the bus and selects one sensor, or all of them.
    ///
    /// A reset without presence, or a shorted bus, is logged and reported as `false`.
    fn address<O: OneWire>(bus: &mut O, rom: Option<RomId>) -> OneWireResult<bool, O::BusError> {
        match bus.address(rom) {
            Ok(()) => Ok(true),
            Err(OneWireError::NoDevicePresent) => {
                log::warn!("wire reset failed");
                Ok(false)
            }
            Err(OneWireError::ShortCircuit) => {
                log::warn!("wire reset failed: bus shorted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn write_powered<O: OneWire>(
        &mut self,
        bus: &mut O,
        cmd: u8,
    ) -> OneWireResult<(), O::BusError> {
        if self.parasite {
            bus.write_byte_pull_up(cmd)?;
            self.pull_up = true;
            Ok(())
        } else {
            bus.write_byte(cmd)
        }
    }

    fn release_pull_up<O: OneWire>(&mut self, bus: &mut O) -> OneWireResult<(), O::BusError> {
        if self.pull_up {
            bus.disable_pull_up()?;
            self.pull_up = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use onewire_bus::{
        OneWireStatus,
        sim::{SimDevice, SimulatedBus},
    };

    fn sensor(serial: u64) -> RomId {
        RomId::with_crc(DS18B20_FAMILY_CODE, serial)
    }

    fn bus_with(devices: Vec<SimDevice>) -> (SimulatedBus, Ds18b20Host) {
        let mut bus = SimulatedBus::new(devices);
        let host = Ds18b20Host::new(&mut bus).unwrap();
        (bus, host)
    }

    #[derive(Default)]
    struct RecordingDelay(u64);

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0 += ns as u64;
        }
    }

    #[test]
    fn registers_only_sensors() {
        let (_, host) = bus_with(vec![
            SimDevice::new(sensor(1)),
            SimDevice::new(RomId::with_crc(0x10, 2)),
            SimDevice::new(sensor(3)),
        ]);
        let mut roms: Vec<RomId> = host.devices().iter().map(Device::rom).collect();
        roms.sort();
        assert_eq!(roms, vec![sensor(1), sensor(3)]);
        assert!(host.devices().iter().all(|d| d.crc_failures() == 0));
    }

    #[test]
    fn construction_only_searches() {
        let (bus, host) = bus_with(vec![SimDevice::new(sensor(1)), SimDevice::new(sensor(2))]);
        assert_eq!(host.devices().len(), 2);
        assert!(
            bus.written()
                .iter()
                .all(|&b| b == onewire_bus::ONEWIRE_SEARCH_CMD)
        );
    }

    #[test]
    fn from_roms_validates() {
        let mut bad = sensor(5).to_le_bytes();
        bad[7] ^= 1;
        let host = Ds18b20Host::from_roms([sensor(4), RomId::from(bad), sensor(4)]);
        assert_eq!(host.devices().len(), 1);
        assert_eq!(host.devices()[0].rom(), sensor(4));
    }

    #[test]
    fn empty_bus() {
        let (mut bus, mut host) = bus_with(vec![]);
        assert!(host.devices().is_empty());
        host.request_readings(&mut bus).unwrap();
        assert!(host.retrieve_readings(&mut bus).unwrap().is_empty());
    }

    #[test]
    fn request_broadcasts_conversion() {
        let (mut bus, mut host) = bus_with(vec![SimDevice::new(sensor(1))]);
        let before = bus.written().len();
        host.request_readings(&mut bus).unwrap();
        assert_eq!(&bus.written()[before..], &[0xcc, 0x44]);
    }

    #[test]
    fn request_without_presence_is_a_no_op() {
        let (mut bus, mut host) = bus_with(vec![SimDevice::new(sensor(1))]);
        bus.detach(sensor(1));
        let before = bus.written().len();
        host.request_readings(&mut bus).unwrap();
        assert_eq!(bus.written().len(), before);
    }

    #[test]
    fn polling_round() {
        let (mut bus, mut host) = bus_with(vec![
            SimDevice::new(sensor(1)).with_temperature(0x0191),
            SimDevice::new(sensor(2)).with_temperature(0xff5e),
        ]);
        host.request_readings(&mut bus).unwrap();
        let mut readings = host.retrieve_readings(&mut bus).unwrap();
        readings.sort_by_key(|r| r.rom);
        assert_eq!(
            readings,
            vec![
                Reading {
                    rom: sensor(1),
                    raw: 0x0191
                },
                Reading {
                    rom: sensor(2),
                    raw: 0xff5e
                },
            ]
        );
        assert_eq!(readings[0].celsius(), 25.0625);
        assert_eq!(readings[1].temperature(), Temperature::from_num(-10.125));
    }

    #[test]
    fn matched_read_addresses_each_sensor() {
        let (mut bus, mut host) = bus_with(vec![SimDevice::new(sensor(7))]);
        host.request_readings(&mut bus).unwrap();
        let before = bus.written().len();
        host.retrieve_readings(&mut bus).unwrap();
        let mut expected = vec![0x55];
        expected.extend_from_slice(&sensor(7).to_le_bytes());
        expected.push(0xbe);
        assert_eq!(&bus.written()[before..], expected.as_slice());
    }

    #[test]
    fn failing_sensor_is_isolated() {
        let (mut bus, mut host) = bus_with(vec![
            SimDevice::new(sensor(1)),
            SimDevice::new(sensor(2)).with_corrupt_scratchpad(),
            SimDevice::new(sensor(3)),
        ]);
        for round in 1..=5 {
            host.request_readings(&mut bus).unwrap();
            let readings = host.retrieve_readings(&mut bus).unwrap();
            assert_eq!(readings.len(), 2);
            assert!(readings.iter().all(|r| r.rom != sensor(2)));
            assert_eq!(host.devices().len(), 3);
            let failing = host.devices().iter().find(|d| d.rom() == sensor(2)).unwrap();
            assert_eq!(failing.crc_failures(), round);
        }
        assert!(
            host.devices()
                .iter()
                .filter(|d| d.rom() != sensor(2))
                .all(|d| d.crc_failures() == 0)
        );
    }

    #[test]
    fn good_read_clears_failure_count() {
        let (mut bus, mut host) =
            bus_with(vec![SimDevice::new(sensor(4)).with_corrupt_scratchpad()]);
        for _ in 0..2 {
            host.request_readings(&mut bus).unwrap();
            assert!(host.retrieve_readings(&mut bus).unwrap().is_empty());
        }
        assert_eq!(host.devices()[0].crc_failures(), 2);

        bus.detach(sensor(4));
        bus.attach(SimDevice::new(sensor(4)).with_temperature(0x0191));
        host.request_readings(&mut bus).unwrap();
        let readings = host.retrieve_readings(&mut bus).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].celsius(), 25.0625);
        assert_eq!(host.devices()[0].crc_failures(), 0);
    }

    /// Reports a shorted line on every reset.
    struct ShortedBus(SimulatedBus);

    struct Shorted;

    impl OneWireStatus for Shorted {
        fn presence(&self) -> bool {
            true
        }

        fn shortcircuit(&self) -> bool {
            true
        }
    }

    impl OneWire for ShortedBus {
        type Status = Shorted;
        type BusError = core::convert::Infallible;

        fn reset(&mut self) -> OneWireResult<Shorted, Self::BusError> {
            self.0.reset()?;
            Ok(Shorted)
        }

        fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
            self.0.write_byte(byte)
        }

        fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
            self.0.read_byte()
        }

        fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
            self.0.write_bit(bit)
        }

        fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
            self.0.read_bit()
        }
    }

    #[test]
    fn shorted_bus_skips_round() {
        let mut bus = ShortedBus(SimulatedBus::new(vec![SimDevice::new(sensor(1))]));
        let mut host = Ds18b20Host::from_roms([sensor(1)]);
        host.request_readings(&mut bus).unwrap();
        assert!(host.retrieve_readings(&mut bus).unwrap().is_empty());
        assert_eq!(host.devices().len(), 1);
        assert_eq!(host.devices()[0].crc_failures(), 0);
        assert_eq!(bus.0.resets(), 2);
        assert!(bus.0.written().is_empty());
    }

    #[test]
    fn removed_sensor_stays_registered() {
        let (mut bus, mut host) =
            bus_with(vec![SimDevice::new(sensor(1)), SimDevice::new(sensor(2))]);
        bus.detach(sensor(2));
        host.request_readings(&mut bus).unwrap();
        let readings = host.retrieve_readings(&mut bus).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].rom, sensor(1));
        assert_eq!(host.devices().len(), 2);

        bus.detach(sensor(1));
        host.request_readings(&mut bus).unwrap();
        assert!(host.retrieve_readings(&mut bus).unwrap().is_empty());
        assert_eq!(host.devices().len(), 2);
    }

    #[test]
    fn parasite_power_drives_pull_up() {
        let (mut bus, host) =
            bus_with(vec![SimDevice::new(sensor(1)).with_parasite_power(true)]);
        let mut host = host.with_parasite_power(true);
        host.request_readings(&mut bus).unwrap();
        assert!(bus.pull_up_enabled());
        let readings = host.retrieve_readings(&mut bus).unwrap();
        assert!(!bus.pull_up_enabled());
        assert_eq!(readings.len(), 1);
        assert_eq!(bus.pull_up_cycles(), 1);
    }

    #[test]
    fn power_supply_detection() {
        let (mut bus, mut host) = bus_with(vec![
            SimDevice::new(sensor(1)),
            SimDevice::new(sensor(2)).with_parasite_power(true),
        ]);
        assert_eq!(
            host.read_power_supply(&mut bus).unwrap(),
            Some(PowerSupply::Parasite)
        );

        let (mut bus, mut host) = bus_with(vec![SimDevice::new(sensor(1))]);
        assert_eq!(
            host.read_power_supply(&mut bus).unwrap(),
            Some(PowerSupply::External)
        );

        let (mut bus, mut host) = bus_with(vec![]);
        assert_eq!(host.read_power_supply(&mut bus).unwrap(), None);
    }

    #[test]
    fn configure_persist_recall() {
        let (mut bus, mut host) = bus_with(vec![SimDevice::new(sensor(1))]);
        let config = Config {
            low: -10,
            high: 30,
            resolution: ReadoutResolution::Resolution9bit,
        };
        assert!(host.configure(&mut bus, config).unwrap());
        assert_eq!(host.resolution(), ReadoutResolution::Resolution9bit);
        assert_eq!(host.conversion_time_ms(), 94);

        let pad = Ds18b20Host::read_scratchpad(&mut bus, sensor(1)).unwrap().unwrap();
        assert!(pad.is_valid());
        assert_eq!((pad.high_alarm(), pad.low_alarm()), (30, -10));
        assert_eq!(pad.resolution(), Ok(ReadoutResolution::Resolution9bit));

        assert!(host.persist(&mut bus).unwrap());
        assert_eq!(bus.devices()[0].eeprom(), [30, -10i8 as u8, 0x1f]);

        host.configure(&mut bus, Config::default()).unwrap();
        assert!(host.recall(&mut bus).unwrap());
        let pad = Ds18b20Host::read_scratchpad(&mut bus, sensor(1)).unwrap().unwrap();
        assert_eq!((pad.high_alarm(), pad.low_alarm()), (30, -10));
    }

    #[test]
    fn waits_for_resolution() {
        let mut delay = RecordingDelay::default();
        Ds18b20Host::default().wait_for_conversion(&mut delay);
        assert_eq!(delay.0, 750_000_000);
        let mut delay = RecordingDelay::default();
        Ds18b20Host::default()
            .with_resolution(ReadoutResolution::Resolution10bit)
            .wait_for_conversion(&mut delay);
        assert_eq!(delay.0, 187_500_000);
    }
}
