//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::buffer_pool::BufferPool;
use crate::config_snapshot::{ConfigHandle, ConfigSnapshot};
use crate::connection::ConnectionFsm;
use crate::error::CoreResult;
use crate::handshake::Identity;
use crate::known_hosts::KnownHosts;
use crate::send_queue::SendQueue;
use crate::worker_pool::WorkerPool;

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap. It's
/// consumed by the client's connection loop to drive a connect/handshake/run
/// cycle without re-threading every dependency through the call stack.
#[derive(Clone)]
pub struct ClientServices {
    /// RCU-published, hot-reloadable configuration.
    pub config: ConfigHandle,
    /// Shared lock-free buffer pool for frame and audio allocations.
    pub buffer_pool: Arc<BufferPool>,
    /// Drop-newest outgoing audio batch queue.
    pub send_queue: Arc<SendQueue>,
    /// Named, ordered worker threads (capture, send, keepalive).
    pub workers: Arc<WorkerPool>,
    /// Trust-on-first-use server identity store.
    pub known_hosts: Arc<KnownHosts>,
    /// Connection lifecycle state machine.
    pub connection: Arc<ConnectionFsm>,
    /// Optional client identity used to sign the handshake challenge.
    pub identity: Option<Arc<Identity>>,
}

impl ClientServices {
    /// The cancellation token every worker and blocking I/O loop should
    /// poll; owned by the worker pool so `stop_all`/`destroy` and the
    /// cancellation signal always agree.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.workers.cancellation_token()
    }

    /// Initiates graceful shutdown of all services.
    pub fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.send_queue.close();
        self.workers.destroy();
        log::info!("shutdown complete");
    }
}

/// Bootstraps all client services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Configuration snapshot (every other service reads tunables from it)
/// 2. Shared infrastructure (buffer pool, send queue, cancellation token)
/// 3. Known-hosts store (depends on `data_dir`)
/// 4. Client identity (optional, loaded or generated)
/// 5. Connection FSM and worker pool (depend on nothing else, own the rest)
///
/// # Errors
///
/// Returns an error if the known-hosts file exists but cannot be read.
pub fn bootstrap_client(config: ConfigSnapshot, data_dir: &std::path::Path, generate_identity: bool) -> CoreResult<ClientServices> {
    let config = ConfigHandle::new(config);

    let buffer_pool = Arc::new(BufferPool::default());
    let send_queue = Arc::new(SendQueue::default());
    let workers = Arc::new(WorkerPool::new());

    let known_hosts_path: PathBuf = crate::known_hosts::default_path(data_dir);
    let known_hosts = Arc::new(KnownHosts::load(known_hosts_path)?);

    let identity = generate_identity.then(|| Arc::new(Identity::generate()));

    let connection = Arc::new(ConnectionFsm::new());

    Ok(ClientServices {
        config,
        buffer_pool,
        send_queue,
        workers,
        known_hosts,
        connection,
        identity,
    })
}
