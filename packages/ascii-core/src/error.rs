//! Centralized error types for the ascii-chat core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error kinds using `thiserror`
//! - Carries a human-readable context message and optional source error
//! - Exposes a thread-local "last error" for rich diagnostics at the outer boundary

use std::cell::RefCell;
use std::fmt;

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs and diagnostics.
    fn code(&self) -> &'static str;
}

/// Application-wide error kind for the ascii-chat core.
///
/// These are the kinds from the error taxonomy: each carries a
/// human-readable context message and, where applicable, the error it
/// wraps. Recovery policy per kind lives with the caller (the connection
/// FSM, the dispatcher, or the pipelines) — this type only classifies.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport read/write failure. Recoverable: the FSM may reconnect.
    #[error("network error: {0}")]
    Network(String),

    /// AEAD decrypt/encrypt failure or nonce reuse. Fatal for the connection.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Peer identity verification failed. Fatal for the process.
    #[error("authentication error: {0}")]
    CryptoAuth(String),

    /// Known-hosts lookup mismatch or unknown host in non-interactive mode.
    #[error("host key error: {0}")]
    HostKey(String),

    /// Envelope framing violation (bad magic, bad inner type, oversized).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// zstd compress/decompress failure, or CRC mismatch against decompressed bytes.
    #[error("compression error: {0}")]
    Compression(String),

    /// Buffer pool capacity or allocation failure. Fatal for the process.
    #[error("memory error: {0}")]
    Memory(String),

    /// Caller misuse (e.g. double-free, invalid handle). Programming error.
    #[error("usage error: {0}")]
    Usage(String),

    /// Audio/video device failure. Non-fatal: disable the offending stream.
    #[error("device error: {0}")]
    Device(String),

    /// A configuration or call argument was out of range.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// OS/platform call failed (thread spawn, socket option, signal install).
    #[error("platform error: {0}")]
    Platform(String),

    /// Worker thread failed to join within its deadline, or panicked.
    #[error("thread error: {0}")]
    Thread(String),
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Crypto(_) => "crypto",
            Self::CryptoAuth(_) => "crypto_auth",
            Self::HostKey(_) => "host_key",
            Self::Protocol(_) => "protocol",
            Self::Compression(_) => "compression",
            Self::Memory(_) => "memory",
            Self::Usage(_) => "usage",
            Self::Device(_) => "device",
            Self::InvalidParam(_) => "invalid_param",
            Self::Platform(_) => "platform",
            Self::Thread(_) => "thread",
        }
    }
}

impl CoreError {
    /// Whether the connection FSM may attempt a reconnect after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Device(_))
    }

    /// Whether this error should terminate the whole process rather than
    /// just the current connection.
    #[must_use]
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, Self::CryptoAuth(_) | Self::HostKey(_) | Self::Memory(_))
    }
}

/// Convenient Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Thread-local last error
// ─────────────────────────────────────────────────────────────────────────────

/// Rich diagnostic context for the most recent error observed on this thread.
///
/// Independent of the propagated [`CoreError`], so an outer boundary (the
/// connection FSM's error log line, or the CLI's final diagnostic) can
/// report more detail than the kind alone carries.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Error code of the originating [`CoreError`].
    pub code: &'static str,
    /// Full human-readable message, including any `source` chain.
    pub message: String,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<ErrorContext>> = const { RefCell::new(None) };
}

/// Records `err` as the thread's last error and returns it unchanged.
///
/// Call this at the point an error is first constructed, not at every
/// propagation hop, so the context reflects the original failure.
pub fn record_context(err: CoreError) -> CoreError {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(ErrorContext {
            code: err.code(),
            message: err.to_string(),
        });
    });
    err
}

/// Returns a copy of the most recent error recorded on this thread, if any.
#[must_use]
pub fn last_error() -> Option<ErrorContext> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_error_is_retryable() {
        let err = CoreError::Network("connection reset".into());
        assert!(err.is_retryable());
        assert!(!err.is_process_fatal());
        assert_eq!(err.code(), "network");
    }

    #[test]
    fn host_key_error_is_process_fatal_and_not_retryable() {
        let err = CoreError::HostKey("fingerprint mismatch".into());
        assert!(err.is_process_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn record_context_round_trips_through_thread_local() {
        assert!(last_error().is_none());
        let err = record_context(CoreError::Protocol("bad magic".into()));
        assert_eq!(err.code(), "protocol");
        let ctx = last_error().expect("context recorded");
        assert_eq!(ctx.code, "protocol");
        assert!(ctx.message.contains("bad magic"));
    }
}
