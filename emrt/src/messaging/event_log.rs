//! Append-only message log with replay
//!
//! Every appended entry receives a monotonically increasing log index
//! (starting at 1) that survives wrap-around, so readers can resume from
//! the last index they saw. Replay callbacks run under the log lock; keep
//! them short.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Deque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventLogStats {
    pub appended: u64,
    pub dropped: u32,
    pub used: usize,
    pub capacity: usize,
}

struct LogInner<T, const CAPACITY: usize> {
    entries: Deque<(u64, T), CAPACITY>,
    next_index: u64,
    appended: u64,
    dropped: u32,
}

pub struct EventLog<M: RawMutex, T: Clone, const CAPACITY: usize, const DROP_OLDEST: bool = true>
{
    inner: Mutex<M, RefCell<LogInner<T, CAPACITY>>>,
}

impl<M: RawMutex, T: Clone, const CAPACITY: usize, const DROP_OLDEST: bool>
    EventLog<M, T, CAPACITY, DROP_OLDEST>
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(LogInner {
                entries: Deque::new(),
                next_index: 1,
                appended: 0,
                dropped: 0,
            })),
        }
    }

    /// Append an entry; returns its log index, or 0 when the log is full
    /// and configured to reject.
    pub fn append(&self, entry: T) -> u64 {
        self.inner.lock(|cell| {
            let inner = &mut *cell.borrow_mut();
            if inner.entries.is_full() {
                if DROP_OLDEST {
                    inner.entries.pop_front();
                    inner.dropped += 1;
                } else {
                    return 0;
                }
            }
            let index = inner.next_index;
            inner.next_index += 1;
            inner.appended += 1;
            let _ = inner.entries.push_back((index, entry));
            index
        })
    }

    pub fn replay_all(&self, mut f: impl FnMut(u64, &T)) {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            for (index, entry) in inner.entries.iter() {
                f(*index, entry);
            }
        });
    }

    /// Replay entries whose log index is `>= from_index`
    pub fn replay_from(&self, from_index: u64, mut f: impl FnMut(u64, &T)) {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            for (index, entry) in inner.entries.iter() {
                if *index >= from_index {
                    f(*index, entry);
                }
            }
        });
    }

    pub fn stats(&self) -> EventLogStats {
        self.inner.lock(|cell| {
            let inner = cell.borrow();
            EventLogStats {
                appended: inner.appended,
                dropped: inner.dropped,
                used: inner.entries.len(),
                capacity: CAPACITY,
            }
        })
    }
}

impl<M: RawMutex, T: Clone, const CAPACITY: usize, const DROP_OLDEST: bool> Default
    for EventLog<M, T, CAPACITY, DROP_OLDEST>
{
    fn default() -> Self {
        Self::new()
    }
}
