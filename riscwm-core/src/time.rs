//! Wall-clock time base shared by the `time` CSR and the CLINT `mtime` register.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// A 64-bit counter of microseconds since creation, plus a writable offset.
///
/// Shared between the harts and the CLINT through an `Arc`.
#[derive(Debug)]
pub struct TimeBase {
    origin: Instant,
    offset: AtomicI64,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: AtomicI64::new(0),
        }
    }

    fn elapsed_micros(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    /// Returns the current time in ticks (microseconds).
    pub fn now(&self) -> u64 {
        self.elapsed_micros()
            .wrapping_add(self.offset.load(Ordering::Relaxed)) as u64
    }

    /// Sets the current time to `value`, after which it keeps counting from there.
    pub fn set(&self, value: u64) {
        let offset = (value as i64).wrapping_sub(self.elapsed_micros());
        self.offset.store(offset, Ordering::Relaxed);
    }
}
