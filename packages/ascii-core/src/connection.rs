//! Connection state machine: dial → handshake → authenticated → streaming,
//! with reconnection policy.
//!
//! ```text
//! IDLE         --attempt_connect-->              ATTEMPTING
//! ATTEMPTING   --handshake OK-->                  CONNECTED
//! ATTEMPTING   --timeout/refused/DNS fail-->       FAILED
//! ATTEMPTING   --auth failure/host-key mismatch--> FAILED (non-retryable)
//! CONNECTED    --peer closed/write/decode error--> DISCONNECTED
//! DISCONNECTED | FAILED (retryable) --retry-->     ATTEMPTING
//! ```

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::CoreError;
use crate::protocol_constants::RECONNECT_DELAY_SECS;
use crate::transport::Transport;

/// Connection states, as named in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Attempting,
    Connected,
    Disconnected,
    Failed,
}

/// Whether a `FAILED` transition may be retried, distinguishing "refused,
/// try again" from "auth/host-key failure, give up".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    NonRetryable,
}

/// Reconnect policy: `-1` unlimited, `0` no retry, `N>0` bounded.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: i32,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn allows(&self, attempt_counter: u64) -> bool {
        match self.max_attempts {
            n if n < 0 => true,
            0 => false,
            n => attempt_counter <= n as u64,
        }
    }
}

/// Drives the connection lifecycle. Owns the transport once `CONNECTED`;
/// the FSM itself never blocks — callers invoke `record_*` transitions
/// from wherever the underlying I/O or handshake completes.
pub struct ConnectionFsm {
    state: Mutex<ConnectionState>,
    attempt_counter: AtomicU64,
    attempt_started_at: Mutex<Option<Instant>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    non_retryable: AtomicI32,
}

impl Default for ConnectionFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFsm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
            attempt_counter: AtomicU64::new(0),
            attempt_started_at: Mutex::new(None),
            transport: Mutex::new(None),
            non_retryable: AtomicI32::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn attempt_counter(&self) -> u64 {
        self.attempt_counter.load(Ordering::Relaxed)
    }

    /// `IDLE|DISCONNECTED|FAILED(retryable) → ATTEMPTING`.
    pub fn begin_attempt(&self) {
        let mut state = self.state.lock();
        debug_assert!(matches!(
            *state,
            ConnectionState::Idle | ConnectionState::Disconnected | ConnectionState::Failed
        ));
        *state = ConnectionState::Attempting;
        self.attempt_counter.fetch_add(1, Ordering::Relaxed);
        *self.attempt_started_at.lock() = Some(Instant::now());
    }

    /// `ATTEMPTING → CONNECTED`.
    pub fn mark_connected(&self, transport: Arc<dyn Transport>) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, ConnectionState::Attempting);
        *state = ConnectionState::Connected;
        *self.transport.lock() = Some(transport);
    }

    /// `ATTEMPTING → FAILED`, recording whether retry is permitted.
    pub fn mark_failed(&self, kind: FailureKind) {
        let mut state = self.state.lock();
        *state = ConnectionState::Failed;
        self.non_retryable
            .store(i32::from(kind == FailureKind::NonRetryable), Ordering::Relaxed);
    }

    /// `CONNECTED → DISCONNECTED`.
    pub fn mark_disconnected(&self) {
        let mut state = self.state.lock();
        *state = ConnectionState::Disconnected;
        self.transport.lock().take();
    }

    /// Classifies a runtime error into the corresponding terminal
    /// transition for the current attempt, matching §4.7's mapping.
    pub fn record_error(&self, err: &CoreError) {
        match self.state() {
            ConnectionState::Attempting => {
                if matches!(err, CoreError::CryptoAuth(_) | CoreError::HostKey(_)) {
                    self.mark_failed(FailureKind::NonRetryable);
                } else {
                    self.mark_failed(FailureKind::Retryable);
                }
            }
            ConnectionState::Connected => self.mark_disconnected(),
            _ => {}
        }
    }

    /// Whether this `FAILED` state permits a reconnect attempt under `policy`.
    #[must_use]
    pub fn may_retry(&self, policy: &ReconnectPolicy) -> bool {
        if self.non_retryable.load(Ordering::Relaxed) != 0 {
            return false;
        }
        policy.allows(self.attempt_counter())
    }

    /// Fixed delay between reconnect attempts (no exponential backoff).
    #[must_use]
    pub fn reconnect_delay() -> Duration {
        Duration::from_secs(RECONNECT_DELAY_SECS)
    }

    #[must_use]
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().clone()
    }
}
