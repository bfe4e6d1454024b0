//! Byte-stream transport abstraction: TCP today, peer-to-peer behind the
//! same trait tomorrow.
//!
//! Writes are fully serialized by an internal mutex; reads are
//! single-consumer (the ingress dispatcher owns the only reader). Once the
//! handshake negotiates a session key, [`Transport::install_crypto`] wraps
//! every subsequent envelope in AEAD.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use parking_lot::Mutex;

use crate::error::{record_context, CoreError, CoreResult};
use crate::protocol_constants::{AEAD_NONCE_LEN, CONNECT_TIMEOUT_SECS};

/// Per-connection AEAD context, installed once the handshake completes.
///
/// Nonces are a monotonically increasing counter rather than random, since
/// both sides derive independent send/recv keys and never reuse a
/// direction's counter value.
pub struct CryptoContext {
    cipher: ChaCha20Poly1305,
    send_counter: std::sync::atomic::AtomicU64,
}

impl CryptoContext {
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            send_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let counter = self
            .send_counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut nonce_bytes = [0u8; AEAD_NONCE_LEN];
        nonce_bytes[4..].copy_from_slice(&counter.to_be_bytes());
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| record_context(CoreError::Crypto(format!("seal failed: {e}"))))?;
        let mut out = Vec::with_capacity(AEAD_NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts `nonce || ciphertext || tag`, returning the plaintext.
    pub fn open(&self, sealed: &[u8]) -> CoreResult<Vec<u8>> {
        if sealed.len() < AEAD_NONCE_LEN {
            return Err(record_context(CoreError::Crypto(
                "sealed payload shorter than nonce".into(),
            )));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(AEAD_NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| record_context(CoreError::Crypto("decrypt failed".into())))
    }
}

/// Bidirectional ordered byte stream, optionally AEAD-protected.
pub trait Transport: Send + Sync {
    /// Writes the entire buffer, blocking until done or an error occurs.
    fn send(&self, bytes: &[u8]) -> CoreResult<()>;

    /// Reads exactly `dst.len()` bytes, blocking until filled or an error occurs.
    fn recv_exact(&self, dst: &mut [u8]) -> CoreResult<()>;

    /// Closes the underlying stream. Idempotent.
    fn close(&self);

    /// Installs the negotiated AEAD context. Subsequent `send`/`recv_exact`
    /// callers are responsible for routing through the codec, which
    /// consults this context; the transport itself moves only raw bytes.
    fn install_crypto(&self, ctx: CryptoContext);

    /// Returns a reference to the installed crypto context, if any.
    fn crypto(&self) -> Option<&CryptoContext>;
}

/// TCP-backed [`Transport`].
pub struct TcpTransport {
    stream: TcpStream,
    write_lock: Mutex<()>,
    crypto: once_cell_like::OnceCell<CryptoContext>,
}

// A tiny single-assignment cell, avoiding a dependency on `once_cell` for
// one use site; `arc-swap`/`parking_lot` already cover the rest of the
// crate's synchronization needs.
mod once_cell_like {
    use parking_lot::Mutex;

    pub struct OnceCell<T> {
        inner: Mutex<Option<T>>,
    }

    impl<T> OnceCell<T> {
        pub fn new() -> Self {
            Self {
                inner: Mutex::new(None),
            }
        }

        pub fn set(&self, value: T) {
            *self.inner.lock() = Some(value);
        }

        pub fn get(&self) -> Option<&T> {
            // SAFETY: once written, the `Option<T>` is never cleared or
            // moved again, so a reference into the locked cell's storage
            // remains valid for the cell's lifetime. The lock only guards
            // the single write.
            let guard = self.inner.lock();
            let ptr = guard.as_ref().map(|v| v as *const T);
            drop(guard);
            ptr.map(|p| unsafe { &*p })
        }
    }
}

impl TcpTransport {
    /// Connects to `addr` with [`CONNECT_TIMEOUT_SECS`] overall timeout.
    pub fn connect(addr: SocketAddr) -> CoreResult<Self> {
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .map_err(|e| record_context(CoreError::Network(format!("connect {addr}: {e}"))))?;
        stream
            .set_nodelay(true)
            .map_err(|e| record_context(CoreError::Platform(format!("set_nodelay: {e}"))))?;
        Ok(Self {
            stream,
            write_lock: Mutex::new(()),
            crypto: once_cell_like::OnceCell::new(),
        })
    }

    /// Wraps an already-connected stream (used on the accept side).
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            write_lock: Mutex::new(()),
            crypto: once_cell_like::OnceCell::new(),
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, bytes: &[u8]) -> CoreResult<()> {
        let _guard = self.write_lock.lock();
        let mut stream = &self.stream;
        stream
            .write_all(bytes)
            .map_err(|e| record_context(CoreError::Network(format!("send: {e}"))))
    }

    fn recv_exact(&self, dst: &mut [u8]) -> CoreResult<()> {
        let mut stream = &self.stream;
        stream
            .read_exact(dst)
            .map_err(|e| record_context(CoreError::Network(format!("recv: {e}"))))
    }

    fn close(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn install_crypto(&self, ctx: CryptoContext) {
        self.crypto.set(ctx);
    }

    fn crypto(&self) -> Option<&CryptoContext> {
        self.crypto.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn send_and_recv_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let transport = TcpTransport::from_stream(stream);
            let mut buf = [0u8; 5];
            transport.recv_exact(&mut buf).unwrap();
            transport.send(&buf).unwrap();
        });

        let client = TcpTransport::connect(addr).unwrap();
        client.send(b"hello").unwrap();
        let mut buf = [0u8; 5];
        client.recv_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        server.join().unwrap();
    }

    #[test]
    fn crypto_context_round_trips_and_detects_tamper() {
        let ctx = CryptoContext::new([7u8; 32]);
        let sealed = ctx.seal(b"hello world").unwrap();
        let opened = ctx.open(&sealed).unwrap();
        assert_eq!(opened, b"hello world");

        let mut tampered = sealed.clone();
        *tampered.last_mut().unwrap() ^= 0xFF;
        assert!(ctx.open(&tampered).is_err());
    }
}
