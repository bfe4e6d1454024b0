//! ascii-core - shared library for the ascii-chat terminal client.
//!
//! This crate provides the core functionality for ascii-chat's real-time
//! terminal video/voice client: connection lifecycle and reconnection,
//! the packet envelope protocol (framing, AEAD, compression, CRC), audio
//! capture/playback pipelines, video frame ingress, and the concurrency
//! substrate shared across all of it.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`buffer_pool`]: Lock-free buffer pool for frame/audio allocations
//! - [`lifecycle_cell`]: Atomic four-state init/shutdown guard
//! - [`config_snapshot`]: RCU-published hot-reloadable configuration
//! - [`worker_pool`]: Named, ordered cooperative worker threads
//! - [`transport`]: Byte-stream transport abstraction and AEAD context
//! - [`handshake`]: Key exchange and peer identity verification
//! - [`known_hosts`]: Trust-on-first-use server identity store
//! - [`codec`]: Envelope framing, compression, and encryption
//! - [`connection`]: Connection lifecycle/reconnection state machine
//! - [`dispatch`]: Single-reader ingress loop routing envelopes to handlers
//! - [`video`]: ASCII frame decompression, verification, and rendering
//! - [`audio`]: Capture → encode → send and receive → decode → playback
//! - [`send_queue`]: Bounded outgoing queue decoupling capture from I/O
//! - [`keepalive`]: Periodic liveness probing
//! - [`error`]: Centralized error types
//! - [`bootstrap`]: Composition root wiring the above together

#![warn(clippy::all)]

pub mod audio;
pub mod bootstrap;
pub mod buffer_pool;
pub mod codec;
pub mod config_snapshot;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod known_hosts;
pub mod lifecycle;
pub mod lifecycle_cell;
pub mod protocol_constants;
pub mod send_queue;
pub mod transport;
pub mod utils;
pub mod video;
pub mod worker_pool;

pub use bootstrap::{bootstrap_client, ClientServices};
pub use config_snapshot::{ConfigHandle, ConfigSnapshot};
pub use connection::{ConnectionFsm, ConnectionState, FailureKind, ReconnectPolicy};
pub use error::{CoreError, CoreResult, ErrorCode};
pub use utils::now_millis;
