/// Reflected form of the Dallas/Maxim polynomial x^8 + x^5 + x^4 + 1.
const POLYNOMIAL: u8 = 0x8c;

#[cfg(feature = "crc-table")]
static CRC_TABLE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = shift_byte(i as u8);
        i += 1;
    }
    table
};

const fn shift_byte(mut crc: u8) -> u8 {
    let mut i = 0;
    while i < 8 {
        if crc & 0x1 == 0x1 {
            crc = (crc >> 1) ^ POLYNOMIAL;
        } else {
            crc >>= 1;
        }
        i += 1;
    }
    crc
}

#[derive(Debug, Default, Clone, Copy)]
/// Calculate CRC-8 used in 1-Wire communications.
pub struct OneWireCrc(u8);

impl OneWireCrc {
    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        #[cfg(feature = "crc-table")]
        {
            self.0 = CRC_TABLE[(self.0 ^ byte) as usize];
        }
        #[cfg(not(feature = "crc-table"))]
        {
            self.0 = shift_byte(self.0 ^ byte);
        }
    }

    /// Validate a sequence of bytes where the last byte is the 1-Wire CRC of
    /// the previous bytes.
    ///
    /// An empty sequence never validates.
    pub fn validate(sequence: &[u8]) -> bool {
        match sequence.split_last() {
            Some((&crc, data)) => calc_crc8(data) == crc,
            None => false,
        }
    }
}

/// Computes the 1-Wire CRC-8 of `data`, bits processed LSB first.
pub fn calc_crc8(data: &[u8]) -> u8 {
    let mut crc = OneWireCrc::default();
    for &byte in data {
        crc.update(byte);
    }
    crc.value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn app_note_vector() {
        assert_eq!(calc_crc8(&[0x02, 0x1c, 0xb8, 0x01, 0x00, 0x00, 0x00]), 0xa2);
    }

    #[test]
    fn ds18b20_rom_code() {
        let rom = [0x28, 0xff, 0x4b, 0x61, 0x71, 0x16, 0x04, 0xad];
        assert_eq!(calc_crc8(&rom[..7]), rom[7]);
        assert!(OneWireCrc::validate(&rom));
    }

    #[test]
    fn power_on_scratchpad() {
        let scratchpad = [0x50, 0x05, 0x4b, 0x46, 0x7f, 0xff, 0x0c, 0x10, 0x1c];
        assert!(OneWireCrc::validate(&scratchpad));
        let mut corrupted = scratchpad;
        corrupted[3] ^= 0x04;
        assert!(!OneWireCrc::validate(&corrupted));
    }

    #[test]
    fn appended_crc_validates() {
        let mut rng = rand::rng();
        for _ in 0..256 {
            let mut buf = [0u8; 8];
            rng.fill(&mut buf[..7]);
            buf[7] = calc_crc8(&buf[..7]);
            assert!(OneWireCrc::validate(&buf));
        }
    }

    #[test]
    fn table_matches_bitwise() {
        for byte in 0..=255u8 {
            let mut crc = OneWireCrc::default();
            crc.update(byte);
            assert_eq!(crc.value(), shift_byte(byte));
        }
    }

    #[test]
    fn empty_sequence() {
        assert_eq!(calc_crc8(&[]), 0);
        assert!(!OneWireCrc::validate(&[]));
    }
}
