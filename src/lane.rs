use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Progress of a value's journey from the memory lane to the disk lane.
///
/// Memory entries move `NotStarted -> Started -> Completed`, driven only by
/// the transfer worker. Disk entries start at `Started` and end at
/// `Completed` on a successful write, or `Cancelled` when a delete overtakes
/// the write in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransferState {
    NotStarted,
    Started,
    Completed,
    Cancelled,
}

/// A staged value, FIFO-ordered by insertion. `transfer` is the single
/// source of truth for whether the entry may be evicted from memory.
pub(crate) struct MemoryEntry<K> {
    pub key: K,
    pub value: Vec<u8>,
    pub transfer: TransferState,
}

/// A persisted (or in-flight) value on disk. The value itself lives in the
/// scratch root; the entry carries only ordering and state.
pub(crate) struct DiskEntry<K> {
    pub key: K,
    pub state: TransferState,
}

/// One tier of the buffer: an insertion-ordered index plus its capacity
/// accounting. `current` is the byte total of resident entries; `max` is
/// mutable through the usage setters.
pub(crate) struct Lane<E> {
    pub max: u64,
    pub current: u64,
    pub index: VecDeque<E>,
}

impl<E> Lane<E> {
    pub fn new(max: u64) -> Self {
        Self {
            max,
            current: 0,
            index: VecDeque::new(),
        }
    }

    /// Whether `required` more bytes fit under the bound.
    pub fn has_space(&self, required: u64) -> bool {
        required <= self.max && self.current <= self.max - required
    }
}

/// A lane paired with the condition its waiters park on.
pub(crate) struct LaneSync<E> {
    pub lane: Mutex<Lane<E>>,
    pub available: Condvar,
}

impl<E> LaneSync<E> {
    pub fn new(max: u64) -> Self {
        Self {
            lane: Mutex::new(Lane::new(max)),
            available: Condvar::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_space_boundaries() {
        let mut lane: Lane<()> = Lane::new(4);
        assert!(lane.has_space(0));
        assert!(lane.has_space(4));
        assert!(!lane.has_space(5));

        lane.current = 3;
        assert!(lane.has_space(1));
        assert!(!lane.has_space(2));

        lane.current = 4;
        assert!(lane.has_space(0));
        assert!(!lane.has_space(1));
    }

    #[test]
    fn test_zero_bound_admits_nothing() {
        let lane: Lane<()> = Lane::new(0);
        assert!(lane.has_space(0));
        assert!(!lane.has_space(1));
    }

    #[test]
    fn test_has_space_does_not_underflow() {
        let mut lane: Lane<()> = Lane::new(2);
        lane.current = 10;
        assert!(!lane.has_space(1));
        assert!(!lane.has_space(u64::MAX));
    }
}
