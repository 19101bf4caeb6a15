//! Process-wide lease for interactive connections.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERACTIVE_OPEN: AtomicBool = AtomicBool::new(false);

/// Held by the one interactive slot of the process; released on drop.
#[derive(Debug)]
pub(crate) struct InteractiveLease {
    _private: (),
}

impl InteractiveLease {
    /// `None` when another interactive connection holds the lease.
    pub(crate) fn acquire() -> Option<Self> {
        INTERACTIVE_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { _private: () })
    }
}

impl Drop for InteractiveLease {
    fn drop(&mut self) {
        INTERACTIVE_OPEN.store(false, Ordering::Release);
    }
}

/// True while any registry in the process holds an interactive connection.
pub fn interactive_connection_open() -> bool {
    INTERACTIVE_OPEN.load(Ordering::Acquire)
}
