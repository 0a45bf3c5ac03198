//! Server clock with two time bases.
//!
//! *Dispatch time* drives all scheduling arithmetic. It normally follows the
//! wall clock plus an optional offset, but can be frozen and advanced by hand
//! so that a task queue can be replayed deterministically.
//! *True time* is always the wall clock and is used only for restart backoff
//! and lease bookkeeping.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Live { offset: i64 },
    Frozen { at: i64 },
}

/// Shared clock; cheap to clone behind an `Arc`.
#[derive(Debug)]
pub struct ServerClock {
    mode: Mutex<Mode>,
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::live()
    }
}

impl ServerClock {
    /// Dispatch time follows the wall clock.
    pub fn live() -> Self {
        Self {
            mode: Mutex::new(Mode::Live { offset: 0 }),
        }
    }

    /// Dispatch time is pinned at `at` until advanced.
    pub fn frozen(at: i64) -> Self {
        Self {
            mode: Mutex::new(Mode::Frozen { at }),
        }
    }

    /// Wall clock, epoch milliseconds.
    pub fn true_time(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Scheduling clock, epoch milliseconds.
    pub fn dispatch_time(&self) -> i64 {
        match self.mode() {
            Mode::Live { offset } => self.true_time() + offset,
            Mode::Frozen { at } => at,
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self.mode(), Mode::Frozen { .. })
    }

    /// Shift a live clock so that dispatch time reads `now` at this instant.
    pub fn set_live_time(&self, now: i64) {
        let offset = now - self.true_time();
        self.set_mode(Mode::Live { offset });
    }

    /// Freeze at an explicit instant.
    pub fn freeze_at(&self, at: i64) {
        self.set_mode(Mode::Frozen { at });
    }

    /// Move a frozen clock forward to `at`. Never moves backward; no-op when live.
    pub fn advance_frozen(&self, at: i64) {
        let mut guard = self.lock();
        if let Mode::Frozen { at: current } = *guard {
            *guard = Mode::Frozen { at: current.max(at) };
        }
    }

    fn mode(&self) -> Mode {
        *self.lock()
    }

    fn set_mode(&self, mode: Mode) {
        *self.lock() = mode;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Mode> {
        // Mode is Copy, so a poisoned guard still holds a consistent value.
        self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frozen_does_not_move() {
        let clock = ServerClock::frozen(1_000);
        assert_eq!(clock.dispatch_time(), 1_000);
        assert!(clock.is_frozen());
        assert!(clock.true_time() > 1_000);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let clock = ServerClock::frozen(5_000);
        clock.advance_frozen(4_000);
        assert_eq!(clock.dispatch_time(), 5_000);
        clock.advance_frozen(9_000);
        assert_eq!(clock.dispatch_time(), 9_000);
    }

    #[test]
    fn test_live_offset() {
        let clock = ServerClock::live();
        clock.set_live_time(42);
        let t = clock.dispatch_time();
        assert!((42..42 + 5_000).contains(&t), "got {t}");
        clock.advance_frozen(1_000_000);
        assert!(!clock.is_frozen());
    }
}
