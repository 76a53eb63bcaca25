use crate::{OneWire, OneWireError, OneWireResult};
use core::sync::atomic::{AtomicU8, Ordering};

/// A fixed set of hardware execution units a bus engine can run on, such as the state
/// machines of a programmable I/O block.
///
/// Slots are handed out as [Slot] guards and return to the pool when the guard is dropped.
/// The pool can live in a `static`.
#[derive(Debug)]
pub struct SlotPool {
    used: AtomicU8,
    capacity: u8,
}

impl SlotPool {
    /// Maximum number of slots a pool can manage.
    pub const MAX_SLOTS: u8 = u8::BITS as u8;

    /// Creates a pool of `capacity` slots, capped at [SlotPool::MAX_SLOTS].
    pub const fn new(capacity: u8) -> Self {
        Self {
            used: AtomicU8::new(0),
            capacity: if capacity > Self::MAX_SLOTS {
                Self::MAX_SLOTS
            } else {
                capacity
            },
        }
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> u8 {
        self.capacity
    }

    /// Number of slots not currently claimed.
    pub fn available(&self) -> u8 {
        let used = self.used.load(Ordering::Acquire);
        self.capacity - (used & self.mask()).count_ones() as u8
    }

    /// Claims the lowest free slot.
    ///
    /// Returns `None` when every slot is taken.
    pub fn claim(&self) -> Option<Slot<'_>> {
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let free = !used & self.mask();
            if free == 0 {
                return None;
            }
            let index = free.trailing_zeros() as u8;
            match self.used.compare_exchange_weak(
                used,
                used | 1 << index,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(Slot { pool: self, index }),
                Err(current) => used = current,
            }
        }
    }

    fn mask(&self) -> u8 {
        if self.capacity == Self::MAX_SLOTS {
            u8::MAX
        } else {
            (1 << self.capacity) - 1
        }
    }
}

/// A claimed execution slot, released when dropped.
#[derive(Debug)]
pub struct Slot<'a> {
    pool: &'a SlotPool,
    index: u8,
}

impl Slot<'_> {
    /// Position of the slot within its pool.
    pub fn index(&self) -> u8 {
        self.index
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.pool.used.fetch_and(!(1 << self.index), Ordering::AcqRel);
    }
}

/// A bus engine: a [OneWire] bus bound to the execution slot it runs on for its whole lifetime.
///
/// All bus operations are forwarded to the wrapped bus. Dropping the engine, or taking the bus
/// back with [ClaimedBus::release], returns the slot to its pool.
#[derive(Debug)]
pub struct ClaimedBus<'a, B> {
    bus: B,
    slot: Slot<'a>,
}

impl<'a, B: OneWire> ClaimedBus<'a, B> {
    /// Claims a slot from `pool` for `bus`.
    ///
    /// # Errors
    /// [OneWireError::ResourceExhausted] when the pool has no free slot; no half-built engine
    /// is left behind.
    pub fn new(pool: &'a SlotPool, bus: B) -> OneWireResult<Self, B::BusError> {
        let slot = pool.claim().ok_or(OneWireError::ResourceExhausted)?;
        log::debug!("bus engine claimed slot {}", slot.index());
        Ok(Self { bus, slot })
    }
}

impl<B> ClaimedBus<'_, B> {
    /// Slot the engine runs on.
    pub fn slot(&self) -> u8 {
        self.slot.index()
    }

    /// The wrapped bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the wrapped bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Releases the slot and hands back the bus.
    pub fn release(self) -> B {
        self.bus
    }
}

impl<B: OneWire> OneWire for ClaimedBus<'_, B> {
    type Status = B::Status;
    type BusError = B::BusError;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        self.bus.reset()
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.bus.write_byte(byte)
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        self.bus.read_byte()
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        self.bus.write_bit(bit)
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        self.bus.read_bit()
    }

    fn write_byte_pull_up(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.bus.write_byte_pull_up(byte)
    }

    fn disable_pull_up(&mut self) -> OneWireResult<(), Self::BusError> {
        self.bus.disable_pull_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        OneWireSearch, OneWireSearchKind, RomId,
        sim::{SimDevice, SimulatedBus},
    };
    use alloc::vec;

    #[test]
    fn claims_lowest_free_slot() {
        let pool = SlotPool::new(3);
        let a = pool.claim().unwrap();
        let b = pool.claim().unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));
        drop(a);
        assert_eq!(pool.available(), 2);
        let c = pool.claim().unwrap();
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn capacity_is_capped() {
        let pool = SlotPool::new(12);
        assert_eq!(pool.capacity(), SlotPool::MAX_SLOTS);
        let slots: alloc::vec::Vec<_> = core::iter::from_fn(|| pool.claim()).collect();
        assert_eq!(slots.len(), 8);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn engine_construction_fails_when_exhausted() {
        static POOL: SlotPool = SlotPool::new(1);
        let first = ClaimedBus::new(&POOL, SimulatedBus::new(vec![])).unwrap();
        assert_eq!(first.slot(), 0);
        let second = ClaimedBus::new(&POOL, SimulatedBus::new(vec![]));
        assert!(matches!(second, Err(OneWireError::ResourceExhausted)));
        drop(first);
        assert!(ClaimedBus::new(&POOL, SimulatedBus::new(vec![])).is_ok());
        assert_eq!(POOL.available(), 1);
    }

    #[test]
    fn engine_forwards_to_bus() {
        let pool = SlotPool::new(2);
        let rom = RomId::with_crc(0x28, 0x99);
        let mut engine =
            ClaimedBus::new(&pool, SimulatedBus::new(vec![SimDevice::new(rom)])).unwrap();
        let found = OneWireSearch::new(&mut engine, OneWireSearchKind::Normal)
            .search()
            .unwrap();
        assert_eq!(found, vec![rom]);
        assert_eq!(pool.available(), 1);
        let bus = engine.release();
        assert_eq!(bus.resets(), 1);
        assert_eq!(pool.available(), 2);
    }
}
