//! Cooperative early exit.
//!
//! Crash handling, signal handlers and interrupted input filters all need a
//! way to stop the engine without unwinding through it. They set a flag the
//! fuzzing loop polls at the top of every batch; the current batch finishes
//! and the loop returns normally.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, LazyLock};

/// A request-to-stop flag with an associated process exit code.
///
/// The engine holds one handle; anything that may want to stop the run holds
/// a clone. The first requested exit code wins.
#[derive(Debug, Default)]
pub struct EarlyExit {
    requested: AtomicBool,
    exit_code: AtomicI32,
}

impl EarlyExit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop with `exit_code`. Later requests keep the first code.
    pub fn request(&self, exit_code: i32) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.exit_code.store(exit_code, Ordering::SeqCst);
        }
    }

    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// The exit code of the first request; zero if none was made.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }
}

/// The process-wide handle used by front ends.
pub fn global() -> Arc<EarlyExit> {
    static GLOBAL: LazyLock<Arc<EarlyExit>> = LazyLock::new(|| Arc::new(EarlyExit::new()));
    GLOBAL.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_wins() {
        let exit = EarlyExit::new();
        assert!(!exit.requested());
        assert_eq!(exit.exit_code(), 0);
        exit.request(3);
        exit.request(7);
        assert!(exit.requested());
        assert_eq!(exit.exit_code(), 3);
    }

    #[test]
    fn handles_share_state() {
        let exit = Arc::new(EarlyExit::new());
        let clone = exit.clone();
        clone.request(1);
        assert!(exit.requested());
    }
}
