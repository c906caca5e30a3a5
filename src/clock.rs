use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, in microseconds since the UNIX epoch.
///
/// Used both as the stamp on stored rows and as the exclusive "since" cursor
/// of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Wall-clock reading, not guaranteed to be monotonic.
    pub fn wall_clock() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clock that never hands out the same or an earlier reading twice.
///
/// Every row is stamped from here and every default cursor is read from here,
/// so a row committed after a cursor snapshot always sorts strictly after it
/// even if the wall clock stalls or steps backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            last: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> Timestamp {
        let wall = Timestamp::wall_clock().as_micros();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Timestamp(next),
                Err(actual) => prev = actual,
            }
        }
    }
}
