use crate::{
    ONEWIRE_CONDITIONAL_SEARCH_CMD, ONEWIRE_SEARCH_CMD, OneWire, OneWireError, OneWireResult,
    RomId,
};
use alloc::vec::Vec;
use core::fmt::{Display, Formatter, Result as FmtResult};

/// Number of passes producing a bad ROM CRC tolerated by one search before it gives up.
pub const DEFAULT_CRC_RETRIES: u8 = 10;

/// Progress of an enumeration, carried from one search pass to the next.
///
/// `last_device_id` is the identifier found by the previous pass, `last_discrepancy` the bit
/// position of the deepest branch that pass left unexplored. `-1` starts a fresh enumeration,
/// `64` means every branch has been explored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchState {
    last_device_id: u64,
    last_discrepancy: i8,
}

/// A [SearchState] with a discrepancy outside `-1..=64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSearchState(pub i8);

impl Display for InvalidSearchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "search discrepancy {} outside -1..=64", self.0)
    }
}

impl core::error::Error for InvalidSearchState {}

impl SearchState {
    /// State for the first pass of an enumeration.
    pub const START: Self = Self {
        last_device_id: 0,
        last_discrepancy: -1,
    };

    /// Discrepancy value meaning no unexplored branch is left.
    pub const EXHAUSTED: i8 = RomId::BITS as i8;

    /// Creates a state, rejecting discrepancies outside `-1..=64`.
    pub fn new(last_device_id: u64, last_discrepancy: i8) -> Result<Self, InvalidSearchState> {
        if (-1..=Self::EXHAUSTED).contains(&last_discrepancy) {
            Ok(Self {
                last_device_id,
                last_discrepancy,
            })
        } else {
            Err(InvalidSearchState(last_discrepancy))
        }
    }

    /// Identifier found by the pass that produced this state.
    pub fn last_device_id(&self) -> u64 {
        self.last_device_id
    }

    /// Deepest unexplored branch, or 64.
    pub fn last_discrepancy(&self) -> i8 {
        self.last_discrepancy
    }

    /// No unexplored branch remains.
    pub fn is_exhausted(&self) -> bool {
        self.last_discrepancy == Self::EXHAUSTED
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::START
    }
}

impl TryFrom<(u64, i8)> for SearchState {
    type Error = InvalidSearchState;

    fn try_from((last_device_id, last_discrepancy): (u64, i8)) -> Result<Self, Self::Error> {
        Self::new(last_device_id, last_discrepancy)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Type of search performed using [`OneWireSearch`].
pub enum OneWireSearchKind {
    /// Normal search
    Normal = ONEWIRE_SEARCH_CMD,
    /// Search only for devices with alarm
    Alarmed = ONEWIRE_CONDITIONAL_SEARCH_CMD,
}

/// A structure for searching devices on a 1-Wire bus.
///
/// The search walks the binary tree formed by the ROM codes of all devices on the bus. Every
/// device answers each bit position with its own bit and its complement; since the bus is a
/// wired-AND, a `(0, 0)` answer means devices disagree at that position. The master picks a
/// direction and writes it back, and devices with the other bit drop out until the next reset.
/// Each pass therefore isolates exactly one device, and the [SearchState] handed from pass to
/// pass records which branch to take next.
pub struct OneWireSearch<'a, T> {
    onewire: &'a mut T,
    cmd: u8,
    family: Option<u8>,
    crc_retries: u8,
    crc_failures: u16,
    state: SearchState,
    done: bool,
}

impl<T> core::fmt::Debug for OneWireSearch<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OneWireSearch")
            .field("cmd", &self.cmd)
            .field("family", &self.family)
            .field("crc_retries", &self.crc_retries)
            .field("crc_failures", &self.crc_failures)
            .field("state", &self.state)
            .field("done", &self.done)
            .finish()
    }
}

impl<'a, T> OneWireSearch<'a, T> {
    /// Creates a new [`OneWireSearch`] instance.
    ///
    /// # Arguments
    /// * `onewire` - A mutable reference to a type that implements the `OneWire` trait.
    /// * `kind` - Whether to enumerate every device or only those in alarm state.
    pub fn new(onewire: &'a mut T, kind: OneWireSearchKind) -> Self {
        Self {
            onewire,
            cmd: kind as _,
            family: None,
            crc_retries: DEFAULT_CRC_RETRIES,
            crc_failures: 0,
            state: SearchState::START,
            done: false,
        }
    }

    /// Creates a new [`OneWireSearch`] instance that only reports devices of one family.
    ///
    /// The whole bus is still enumerated, devices of other families are skipped.
    pub fn with_family(onewire: &'a mut T, kind: OneWireSearchKind, family: u8) -> Self {
        let mut search = Self::new(onewire, kind);
        search.family = Some(family);
        search
    }

    /// Sets how many passes with a bad ROM CRC are retried before the search fails.
    pub fn with_crc_retries(mut self, retries: u8) -> Self {
        self.crc_retries = retries;
        self
    }

    /// Current enumeration state.
    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Number of passes so far that produced a bad ROM CRC.
    pub fn crc_failures(&self) -> u16 {
        self.crc_failures
    }
}

impl<T: OneWire> OneWireSearch<'_, T> {
    /// Performs exactly one enumeration pass, starting from `state`.
    ///
    /// Returns `None` when no device answered the reset, or when no device answered at some
    /// bit position (a device left the bus mid-pass). Otherwise returns the identifier found
    /// together with the deepest unexplored branch, `64` if there is none. The identifier's CRC
    /// is not checked here.
    pub fn incremental_search(
        &mut self,
        state: SearchState,
    ) -> OneWireResult<Option<SearchState>, T::BusError> {
        let SearchState {
            last_device_id,
            last_discrepancy,
        } = state;

        if !self.onewire.presence()? {
            return Ok(None);
        }
        self.onewire.write_byte(self.cmd)?;

        let mut device_id = 0u64;
        let mut discrepancy = SearchState::EXHAUSTED;
        for bit in 0..RomId::BITS as i8 {
            let id_bit = self.onewire.read_bit()?;
            let complement_bit = self.onewire.read_bit()?;
            let direction = match (id_bit, complement_bit) {
                (true, true) => {
                    log::debug!("no device answered at bit {bit}, abandoning pass");
                    return Ok(None);
                }
                (false, false) => {
                    // devices disagree: retake the branch of the last pass up to its
                    // discrepancy, take the 1-branch there, and the 0-branch past it
                    let previous = (last_device_id >> bit) & 1 == 1;
                    if bit == last_discrepancy || (bit < last_discrepancy && previous) {
                        true
                    } else {
                        discrepancy = bit;
                        false
                    }
                }
                (id_bit, _) => id_bit,
            };
            self.onewire.write_bit(direction)?;
            device_id |= (direction as u64) << bit;
        }

        log::trace!("search pass found {device_id:016x}, discrepancy {discrepancy}");
        Ok(Some(SearchState {
            last_device_id: device_id,
            last_discrepancy: discrepancy,
        }))
    }

    /// Searches for the next device on the 1-Wire bus.
    ///
    /// Passes producing an identifier with a bad CRC are repeated from the same state. Once
    /// more than the configured number of retries have failed during this search, the bus is
    /// deemed unusable and [OneWireError::RomCrcRetriesExceeded] is returned.
    ///
    /// Returns `None` once every device has been reported, or when the bus went silent.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> OneWireResult<Option<RomId>, T::BusError> {
        loop {
            if self.done || self.state.is_exhausted() {
                return Ok(None);
            }
            let Some(state) = self.incremental_search(self.state)? else {
                self.done = true;
                return Ok(None);
            };
            let rom = RomId::new(state.last_device_id);
            if !rom.is_valid() {
                self.crc_failures = self.crc_failures.saturating_add(1);
                log::warn!("checksum of device {rom} invalid");
                if self.crc_failures > u16::from(self.crc_retries) {
                    self.done = true;
                    return Err(OneWireError::RomCrcRetriesExceeded {
                        failures: self.crc_failures,
                    });
                }
                continue;
            }
            self.state = state;
            match self.family {
                Some(family) if family != rom.family_code() => continue,
                _ => {
                    log::debug!("device found: {rom}");
                    return Ok(Some(rom));
                }
            }
        }
    }

    /// Enumerates every remaining device on the bus.
    ///
    /// A bus that goes silent part-way yields whatever was found up to that point. A device
    /// leaving between passes can steer a pass back onto an identifier already reported; such
    /// repeats are dropped.
    pub fn search(mut self) -> OneWireResult<Vec<RomId>, T::BusError> {
        let mut roms = Vec::new();
        while let Some(rom) = self.next()? {
            if roms.contains(&rom) {
                log::debug!("device {rom} reported twice");
                continue;
            }
            roms.push(rom);
        }
        Ok(roms)
    }

    /// Checks whether the device with the given ROM code is present on the bus.
    ///
    /// Runs a single pass that follows `rom` at every discrepancy. The enumeration state of
    /// this search is left untouched.
    pub fn verify(&mut self, rom: RomId) -> OneWireResult<bool, T::BusError> {
        let pinned = SearchState {
            last_device_id: rom.raw(),
            last_discrepancy: SearchState::EXHAUSTED,
        };
        Ok(self
            .incremental_search(pinned)?
            .is_some_and(|state| state.last_device_id == rom.raw()))
    }
}
