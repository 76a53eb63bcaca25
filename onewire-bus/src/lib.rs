#![no_std]
#![deny(missing_docs)]
//! # onewire-bus
//! A no-std engine for the 1-Wire bus protocol.
//!
//! The electrical layer is abstracted behind the [OneWire] trait: anything that can reset the
//! bus, move bytes and bits LSB-first and (optionally) drive a strong pull-up can be used,
//! whether it is a hardware peripheral, a bridge chip or the simulated bus in [sim].
//!
//! On top of that trait the crate provides
//! * [calc_crc8] and [OneWireCrc], the Dallas/Maxim CRC-8 used by ROM codes and scratchpads,
//! * [RomId], the 64-bit device identifier,
//! * [OneWireSearch], the collision-resolving ROM search that enumerates every device
//!   on a bus without addressing any of them,
//! * [SlotPool] and [ClaimedBus], scoped ownership of the finite hardware execution units
//!   a bus engine runs on.

extern crate alloc;

pub mod consts;
mod crc;
mod error;
mod rom;
mod search;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod slots;
mod traits;

pub use consts::*;
pub use crc::{OneWireCrc, calc_crc8};
pub use error::OneWireError;
pub use rom::{RomId, RomIdParseError};
pub use search::{InvalidSearchState, OneWireSearch, OneWireSearchKind, SearchState};
pub use slots::{ClaimedBus, Slot, SlotPool};
pub use traits::{OneWire, OneWireStatus};

/// Error type for 1-Wire operations.
pub type OneWireResult<T, E> = Result<T, OneWireError<E>>;
