//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current monotonic nanosecond timestamp, suitable for residence
/// and timeout arithmetic (buffer pool shrink, batch timeout, frame-rate limiter).
#[must_use]
pub fn now_nanos() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Fingerprints
// ─────────────────────────────────────────────────────────────────────────────

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Formats a public key as a `sha256:base64` fingerprint, the textual form
/// stored in the known-hosts file and printed in diagnostics.
#[must_use]
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    format!("sha256:{}", BASE64.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_input() {
        let key = [1u8, 2, 3, 4];
        assert_eq!(fingerprint(&key), fingerprint(&key));
    }

    #[test]
    fn fingerprint_differs_for_different_keys() {
        assert_ne!(fingerprint(&[1u8]), fingerprint(&[2u8]));
    }

    #[test]
    fn fingerprint_has_sha256_prefix() {
        assert!(fingerprint(&[0u8; 32]).starts_with("sha256:"));
    }

    #[test]
    fn now_nanos_is_monotonic() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
    }
}
