//! Command constants for 1-Wire communication.
//!
//! All commands are single bytes, transmitted least significant bit first.

/// Reads the ROM code of the only device on the bus.
///
/// Every device answers at once, so the result is only meaningful on a single-drop bus.
pub const ONEWIRE_READ_ROM_CMD: u8 = 0x33;

/// Command to search for devices on the 1-Wire bus
pub const ONEWIRE_SEARCH_CMD: u8 = 0xf0;

/// Command to search for devices in alarm state on the 1-Wire bus
pub const ONEWIRE_CONDITIONAL_SEARCH_CMD: u8 = 0xec;

/// Command to match a specific ROM address in 1-Wire communication.
/// Followed by the 8 bytes of the ROM code, only the matching device stays selected.
pub const ONEWIRE_MATCH_ROM_CMD: u8 = 0x55;

/// Command to skip ROM addressing; the following function command reaches every device.
pub const ONEWIRE_SKIP_ROM_CMD: u8 = 0xcc;
