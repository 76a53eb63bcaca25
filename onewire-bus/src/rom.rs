use crate::calc_crc8;
use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// 64-bit ROM code identifying a device on the bus.
///
/// | Byte | Description |
/// |------|-------------|
/// | 0 | Family code (e.g., 0x28 for DS18B20) |
/// | 1-6 | 48-bit serial number, little-endian |
/// | 7 | CRC-8 over bytes 0-6 |
///
/// The identifier is stored as the little-endian `u64` of those bytes, so bit `n` of the
/// value is the `n`-th bit shifted out by the device during a search.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct RomId(u64);

impl RomId {
    /// The length of a ROM code in bytes
    pub const BYTES: usize = 8;

    /// The length of a ROM code in bits
    pub const BITS: u8 = 64;

    /// Wraps a raw ROM code without checking its CRC.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Builds a ROM code from a family code and the low 48 bits of `serial`,
    /// appending the matching CRC byte.
    pub fn with_crc(family: u8, serial: u64) -> Self {
        let mut bytes = ((serial & 0xffff_ffff_ffff) << 8 | family as u64).to_le_bytes();
        bytes[7] = calc_crc8(&bytes[..7]);
        Self(u64::from_le_bytes(bytes))
    }

    /// The raw 64-bit value.
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Bytes in the order they travel on the bus.
    pub fn to_le_bytes(&self) -> [u8; Self::BYTES] {
        self.0.to_le_bytes()
    }

    /// Family code, selecting the device type.
    pub fn family_code(&self) -> u8 {
        self.0 as u8
    }

    /// The 48-bit serial number.
    pub fn serial(&self) -> u64 {
        (self.0 >> 8) & 0xffff_ffff_ffff
    }

    /// CRC byte as reported by the device.
    pub fn crc(&self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// Whether the CRC byte matches the first seven bytes.
    pub fn is_valid(&self) -> bool {
        calc_crc8(&self.to_le_bytes()[..7]) == self.crc()
    }

    /// Value of bit `n`, 0 being the first bit on the wire.
    pub fn bit(&self, n: u8) -> bool {
        n < Self::BITS && (self.0 >> n) & 1 == 1
    }
}

impl From<u64> for RomId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<RomId> for u64 {
    fn from(rom: RomId) -> u64 {
        rom.0
    }
}

impl From<[u8; RomId::BYTES]> for RomId {
    fn from(bytes: [u8; RomId::BYTES]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

/// Error returned when parsing a [RomId] from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomIdParseError {
    /// Fewer than 8 bytes of hex digits.
    NotEnough,
    /// A character that is not a hex digit, or trailing digits.
    Invalid,
}

impl Display for RomIdParseError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::NotEnough => f.write_str("ROM code needs 8 bytes"),
            Self::Invalid => f.write_str("ROM code is not 8 hex bytes"),
        }
    }
}

impl core::error::Error for RomIdParseError {}

impl FromStr for RomId {
    type Err = RomIdParseError;

    /// Parses 16 hex digits in bus byte order, optionally separated by `:` or whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; Self::BYTES];
        let mut digits = s.chars().filter(|c| !c.is_whitespace() && *c != ':');

        for byte in bytes.iter_mut() {
            match (digits.next(), digits.next()) {
                (Some(h), Some(l)) => match (h.to_digit(16), l.to_digit(16)) {
                    (Some(h), Some(l)) => *byte = (h << 4 | l) as u8,
                    _ => return Err(RomIdParseError::Invalid),
                },
                _ => return Err(RomIdParseError::NotEnough),
            }
        }
        if digits.next().is_some() {
            return Err(RomIdParseError::Invalid);
        }

        Ok(Self::from(bytes))
    }
}

impl Display for RomId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let b = self.to_le_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        )
    }
}

impl Debug for RomId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "RomId({self})")
    }
}
