//! Handshake protocol layered above the raw [`Transport`].
//!
//! 1. Client sends its X25519 ephemeral public key and Ed25519 identity (if configured).
//! 2. Server replies with its ephemeral X25519 key, an Ed25519 signature over the
//!    transcript, and a random challenge.
//! 3. Client verifies the server identity against known-hosts (TOFU on first
//!    use; refuse on mismatch), signs the challenge, and sends the response.
//! 4. Server sends `HANDSHAKE_COMPLETE`.
//! 5. Both sides derive a symmetric AEAD key via HKDF over the shared secret
//!    and the transcript.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::{record_context, CoreError, CoreResult};
use crate::known_hosts::KnownHosts;
use crate::transport::{CryptoContext, Transport};

const CHALLENGE_LEN: usize = 32;

/// Local identity used to sign the handshake challenge. Optional: a client
/// with no configured identity skips step 3's signature and is accepted or
/// rejected entirely based on transport-layer policy outside this module.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// Derives the send/recv AEAD key from the shared secret and transcript via HKDF-SHA256.
fn derive_key(shared_secret: &[u8], transcript: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(transcript), shared_secret);
    let mut key = [0u8; 32];
    hk.expand(b"ascii-chat session key", &mut key)
        .expect("32 bytes is a valid HKDF output length");
    key
}

/// Runs the client side of the handshake over `transport`, verifying the
/// server's identity against `known_hosts` for `host:port`. On success,
/// installs the negotiated [`CryptoContext`] onto `transport` and returns
/// the server's verifying key (useful for diagnostics/logging).
pub fn client_handshake(
    transport: &dyn Transport,
    identity: Option<&Identity>,
    known_hosts: &KnownHosts,
    host: &str,
    port: u16,
    pin_on_unknown: bool,
) -> CoreResult<VerifyingKey> {
    let client_ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let client_ephemeral_pub = PublicKey::from(&client_ephemeral);

    let mut transcript = Vec::new();
    transcript.extend_from_slice(client_ephemeral_pub.as_bytes());
    if let Some(id) = identity {
        transcript.extend_from_slice(id.verifying_key().as_bytes());
    }
    transport.send(&transcript)?;

    let mut server_ephemeral_bytes = [0u8; 32];
    transport.recv_exact(&mut server_ephemeral_bytes)?;
    let mut server_identity_bytes = [0u8; 32];
    transport.recv_exact(&mut server_identity_bytes)?;
    let mut signature_bytes = [0u8; 64];
    transport.recv_exact(&mut signature_bytes)?;
    let mut challenge = [0u8; CHALLENGE_LEN];
    transport.recv_exact(&mut challenge)?;

    let server_verifying_key = VerifyingKey::from_bytes(&server_identity_bytes)
        .map_err(|e| record_context(CoreError::CryptoAuth(format!("bad server key: {e}"))))?;

    let mut server_transcript = Vec::new();
    server_transcript.extend_from_slice(&server_ephemeral_bytes);
    server_transcript.extend_from_slice(&transcript);
    let signature = Signature::from_bytes(&signature_bytes);
    server_verifying_key
        .verify(&server_transcript, &signature)
        .map_err(|e| record_context(CoreError::CryptoAuth(format!("bad server signature: {e}"))))?;

    known_hosts.verify(host, port, &server_identity_bytes, pin_on_unknown)?;

    if let Some(id) = identity {
        let response_sig = id.signing_key.sign(&challenge);
        transport.send(&response_sig.to_bytes())?;
    }

    let mut complete = [0u8];
    transport.recv_exact(&mut complete)?;
    if complete[0] != 1 {
        return Err(record_context(CoreError::CryptoAuth(
            "handshake did not complete".into(),
        )));
    }

    let server_ephemeral_pub = PublicKey::from(server_ephemeral_bytes);
    let shared_secret = client_ephemeral.diffie_hellman(&server_ephemeral_pub);
    let key = derive_key(shared_secret.as_bytes(), &server_transcript);
    transport.install_crypto(CryptoContext::new(key));

    Ok(server_verifying_key)
}
