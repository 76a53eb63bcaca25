use fixed::types::I12F4;
use onewire_bus::OneWireCrc;

/// Temperature in degrees Celsius, 1/16 °C resolution.
pub type Temperature = I12F4;

/// The 9-byte scratchpad of a DS18B20.
///
/// | Byte | Content |
/// |------|---------|
/// | 0 | Temperature LSB |
/// | 1 | Temperature MSB |
/// | 2 | TH register (high alarm) |
/// | 3 | TL register (low alarm) |
/// | 4 | Configuration |
/// | 5-7 | Reserved |
/// | 8 | CRC-8 over bytes 0-7 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratchpad([u8; Scratchpad::BYTES]);

impl Scratchpad {
    /// Size of the scratchpad in bytes, CRC included.
    pub const BYTES: usize = 9;

    /// Raw scratchpad contents.
    pub fn as_bytes(&self) -> &[u8; Self::BYTES] {
        &self.0
    }

    /// Whether byte 8 is the CRC of bytes 0-7.
    pub fn is_valid(&self) -> bool {
        OneWireCrc::validate(&self.0)
    }

    /// Temperature register, two's complement in 1/16 °C.
    pub fn raw_temperature(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    /// Temperature register as a fixed-point value.
    pub fn temperature(&self) -> Temperature {
        raw_to_temperature(self.raw_temperature())
    }

    /// High alarm threshold in °C.
    pub fn high_alarm(&self) -> i8 {
        self.0[2] as i8
    }

    /// Low alarm threshold in °C.
    pub fn low_alarm(&self) -> i8 {
        self.0[3] as i8
    }

    /// Conversion resolution from the configuration register.
    pub fn resolution(&self) -> Result<ReadoutResolution, &'static str> {
        ReadoutResolution::try_from(self.0[4])
    }
}

impl From<[u8; Scratchpad::BYTES]> for Scratchpad {
    fn from(bytes: [u8; Scratchpad::BYTES]) -> Self {
        Self(bytes)
    }
}

/// Converts a raw temperature register to °C.
pub fn raw_to_temperature(raw: u16) -> Temperature {
    Temperature::from_bits(raw as i16)
}

/// Converts a raw temperature register to °C as a float: `raw × 0.0625`.
pub fn raw_to_celsius(raw: u16) -> f32 {
    raw as i16 as f32 * 0.0625
}

/// Alarm thresholds and resolution, see [`Ds18b20Host::configure`](crate::Ds18b20Host::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Low alarm threshold in °C.
    pub low: i8,
    /// High alarm threshold in °C.
    pub high: i8,
    /// Conversion resolution.
    pub resolution: ReadoutResolution,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            low: -40,
            high: 85,
            resolution: ReadoutResolution::default(),
        }
    }
}

/// Conversion resolution, encoded as the configuration register value.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ReadoutResolution {
    /// 0.5 °C steps
    Resolution9bit = 0x1f,
    /// 0.25 °C steps
    Resolution10bit = 0x3f,
    /// 0.125 °C steps
    Resolution11bit = 0x5f,
    /// 0.0625 °C steps
    #[default]
    Resolution12bit = 0x7f,
}

impl ReadoutResolution {
    /// Maximum conversion time in microseconds.
    pub fn delay_us(&self) -> u32 {
        use ReadoutResolution::*;
        match self {
            Resolution9bit => 93750,
            Resolution10bit => 187500,
            Resolution11bit => 375000,
            Resolution12bit => 750000,
        }
    }

    /// Maximum conversion time in milliseconds, rounded up.
    pub fn delay_ms(&self) -> u32 {
        self.delay_us().div_ceil(1000)
    }

    /// Resolution with `bits` significant bits, 9 to 12.
    pub fn from_bits(bits: u8) -> Option<Self> {
        use ReadoutResolution::*;
        match bits {
            9 => Some(Resolution9bit),
            10 => Some(Resolution10bit),
            11 => Some(Resolution11bit),
            12 => Some(Resolution12bit),
            _ => None,
        }
    }

    /// Number of significant bits.
    pub fn bits(&self) -> u8 {
        use ReadoutResolution::*;
        match self {
            Resolution9bit => 9,
            Resolution10bit => 10,
            Resolution11bit => 11,
            Resolution12bit => 12,
        }
    }
}

impl TryFrom<u8> for ReadoutResolution {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ReadoutResolution::*;
        match value {
            0x1f => Ok(Resolution9bit),
            0x3f => Ok(Resolution10bit),
            0x5f => Ok(Resolution11bit),
            0x7f => Ok(Resolution12bit),
            _ => Err("Invalid readout resolution"),
        }
    }
}
