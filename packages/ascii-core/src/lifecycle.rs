//! Client lifecycle abstraction.
//!
//! Provides a [`Lifecycle`] trait through which any subsystem (snapshot mode
//! after its first rendered frame, a fatal process-level error, an OS signal
//! handler) can request a graceful client shutdown without depending
//! directly on the cancellation token or the process exit path.

/// Trait for client-level lifecycle operations.
pub trait Lifecycle: Send + Sync {
    /// Requests a graceful shutdown. The implementation cancels outstanding
    /// work and lets `main` drive the actual process exit.
    fn request_shutdown(&self);
}

/// Default lifecycle backed by a [`tokio_util::sync::CancellationToken`].
///
/// `request_shutdown` only cancels the token; cleanup and the eventual
/// `std::process::exit` happen in normal control flow in `main`, not inside
/// the caller that requested the shutdown (which may be a device callback
/// or the ingress dispatcher thread).
pub struct TokenLifecycle {
    cancel: tokio_util::sync::CancellationToken,
}

impl TokenLifecycle {
    /// Creates a new lifecycle wrapping `cancel`.
    #[must_use]
    pub fn new(cancel: tokio_util::sync::CancellationToken) -> Self {
        Self { cancel }
    }
}

impl Lifecycle for TokenLifecycle {
    fn request_shutdown(&self) {
        log::info!("shutdown requested");
        self.cancel.cancel();
    }
}

/// No-op lifecycle for tests or embedded use.
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn request_shutdown(&self) {
        log::debug!("shutdown requested (no-op)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle_cancels_token_on_shutdown() {
        let token = tokio_util::sync::CancellationToken::new();
        let lifecycle = TokenLifecycle::new(token.clone());
        assert!(!token.is_cancelled());
        lifecycle.request_shutdown();
        assert!(token.is_cancelled());
    }
}
