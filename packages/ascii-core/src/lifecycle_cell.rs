//! Four-state atomic init/shutdown primitive used by every subsystem.
//!
//! `UNINIT → INITIALIZING → INITIALIZED`, with `DEAD` terminal and reachable
//! from any state via [`LifecycleCell::shutdown_forever`].

use std::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;
const DEAD: u8 = 3;

/// A single atomic integer lifecycle state, shared across threads.
pub struct LifecycleCell {
    state: AtomicU8,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCell {
    /// Creates a new cell in the `UNINIT` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
        }
    }

    /// Attempts to win the `UNINIT → INITIALIZING` race.
    ///
    /// Returns `true` if this caller won and must follow up with
    /// [`Self::init_commit`] or [`Self::init_abort`]. Returns `false` if
    /// another caller already won, or if the cell is `DEAD`.
    pub fn init_once(&self) -> bool {
        self.state
            .compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Commits a successful initialization: `INITIALIZING → INITIALIZED`.
    ///
    /// # Panics
    /// Panics if the cell is not in `INITIALIZING` state, which indicates a
    /// caller committed without having won [`Self::init_once`].
    pub fn init_commit(&self) {
        let prev = self.state.swap(INITIALIZED, Ordering::Release);
        assert_eq!(prev, INITIALIZING, "init_commit without a won init_once race");
    }

    /// Aborts a failed initialization, allowing a later retry: `INITIALIZING → UNINIT`.
    pub fn init_abort(&self) {
        let _ = self.state.compare_exchange(
            INITIALIZING,
            UNINIT,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Transitions to `DEAD` from any state. Returns whether the cell had
    /// reached `INITIALIZED` before this call (i.e. whether real
    /// initialization work needs a matching teardown).
    pub fn shutdown_forever(&self) -> bool {
        let prev = self.state.swap(DEAD, Ordering::AcqRel);
        prev == INITIALIZED
    }

    /// Spins briefly while another caller's initialization is in flight,
    /// then reports the outcome. Used by callers that lost `init_once` and
    /// need to know whether to proceed as if already initialized.
    pub fn wait_for_init(&self) -> bool {
        loop {
            match self.state.load(Ordering::Acquire) {
                INITIALIZING => std::hint::spin_loop(),
                other => return other == INITIALIZED,
            }
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == INITIALIZED
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.state.load(Ordering::Acquire) == DEAD
    }
}
