//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the wire protocol and changing them would
//! break compatibility with peers running an older or newer client.

// ─────────────────────────────────────────────────────────────────────────────
// Envelope framing
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed 4-byte magic tag at the start of every envelope.
pub const ENVELOPE_MAGIC: u32 = 0xA5C1_1CFA;

/// Maximum accepted envelope length (payload bytes), enforced by the codec.
pub const MAX_ENVELOPE_LEN: u32 = 16 * 1024 * 1024;

/// Payload size above which compression is attempted when enabled.
pub const COMPRESS_THRESHOLD: usize = 512;

/// Fixed size of the envelope header, in bytes:
/// `magic(4) + type(2) + flags(2) + client_id(4) + len(4) + crc32(4)`.
pub const ENVELOPE_HEADER_LEN: usize = 20;

/// AEAD nonce length in bytes (ChaCha20-Poly1305).
pub const AEAD_NONCE_LEN: usize = 12;

/// AEAD authentication tag length in bytes.
pub const AEAD_TAG_LEN: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Buffer pool
// ─────────────────────────────────────────────────────────────────────────────

/// Allocations smaller than this bypass the pool; served directly by the system allocator.
pub const MIN_POOL_SIZE: usize = 64;

/// Allocations larger than this bypass the pool.
pub const MAX_POOL_SIZE: usize = 4 * 1024 * 1024;

/// Total bytes the pool may hold resident before `alloc` falls back to the system allocator.
pub const POOL_CAP_BYTES: usize = 337 * 1024 * 1024;

/// Idle residence time after which `shrink()` physically frees a pooled buffer.
pub const SHRINK_DELAY_NS: u64 = 5_000_000_000;

/// Bucket sizes the pool grows lazily, smallest to largest.
pub const POOL_BUCKET_SIZES: &[usize] = &[256, 1024, 4096, 16384, 65536, 262144, 1048576];

// ─────────────────────────────────────────────────────────────────────────────
// Audio
// ─────────────────────────────────────────────────────────────────────────────

/// Audio sample rate (Hz).
pub const SAMPLE_RATE: u32 = 48000;

/// Opus frame duration (ms).
pub const OPUS_FRAME_DURATION_MS: u32 = 20;

/// Samples per Opus frame at `SAMPLE_RATE` and `OPUS_FRAME_DURATION_MS`.
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Default Opus encoder bitrate (bits per second).
pub const DEFAULT_OPUS_BITRATE: u32 = 128_000;

/// Maximum Opus frames accumulated per outgoing batch.
pub const MAX_BATCH_FRAMES: usize = 8;

/// Maximum age of a partial batch before it is flushed regardless of frame count.
pub const BATCH_TIMEOUT_MS: u64 = 40;

/// Audio device shutdown grace period, letting an in-flight callback observe
/// the cleared AEC reference before the pipeline is torn down.
pub const AUDIO_SHUTDOWN_GRACE_MS: u64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Send queue
// ─────────────────────────────────────────────────────────────────────────────

/// Default send queue capacity (power-of-two slot count).
pub const SEND_QUEUE_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Connection / handshake timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// TCP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 3;

/// Handshake completion timeout.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 3;

/// Worker thread join timeout before it is considered leaked.
pub const THREAD_JOIN_TIMEOUT_SECS: u64 = 5;

/// Fixed delay between reconnect attempts (no exponential backoff — a
/// single server is the typical topology).
pub const RECONNECT_DELAY_SECS: u64 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Keepalive
// ─────────────────────────────────────────────────────────────────────────────

/// Default interval between PING envelopes.
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 10;

/// Consecutive missed PONGs before the connection is declared lost.
pub const KEEPALIVE_MISS_LIMIT: u32 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in diagnostics.
pub const APP_NAME: &str = "ascii-chat";
