//! Single-reader ingress loop: decode envelope, route to a typed handler.
//!
//! The dispatcher is the only place that converts network byte order to
//! host order (the codec already did that for header fields; handlers
//! receive parsed payload views). Handler invocations are synchronous on
//! the dispatcher thread, so handlers must not block on queues this thread
//! itself owns — the video renderer writes to stdout directly, and audio
//! playback only pushes into a lock-free ring buffer.

use std::sync::Arc;

use crate::codec::{self, Envelope, PacketType};
use crate::error::{record_context, CoreError, CoreResult};
use crate::protocol_constants::ENVELOPE_HEADER_LEN;
use crate::transport::Transport;

/// Callback table the dispatcher invokes by packet type. Each handler
/// receives the decoded [`Envelope`]; unrecognized types are logged and
/// skipped rather than erroring the connection.
pub trait EnvelopeHandlers: Send + Sync {
    fn on_ascii_frame(&self, envelope: &Envelope);
    fn on_audio_opus(&self, envelope: &Envelope);
    fn on_audio_opus_batch(&self, envelope: &Envelope);
    fn on_server_state(&self, envelope: &Envelope);
    fn on_ping(&self, envelope: &Envelope);
    fn on_pong(&self, envelope: &Envelope);
    fn on_clear_console(&self, envelope: &Envelope);
    fn on_error_message(&self, envelope: &Envelope);
    fn on_remote_log(&self, envelope: &Envelope);
    fn on_stream_start(&self, envelope: &Envelope);
    fn on_stream_stop(&self, envelope: &Envelope);
    fn on_client_capabilities(&self, envelope: &Envelope);
    fn on_crypto_rekey(&self, envelope: &Envelope);
}

/// Reads exactly one envelope from `transport`: first the fixed header,
/// then the payload whose length the header declares.
fn read_one_envelope(transport: &dyn Transport) -> CoreResult<Vec<u8>> {
    let mut header = [0u8; ENVELOPE_HEADER_LEN];
    transport.recv_exact(&mut header)?;
    let payload_len = codec::peek_payload_len(&header) as usize;
    let mut full = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload_len);
    full.extend_from_slice(&header);
    full.resize(ENVELOPE_HEADER_LEN + payload_len, 0);
    transport.recv_exact(&mut full[ENVELOPE_HEADER_LEN..])?;
    Ok(full)
}

/// Runs the ingress loop until `cancel` fires or the transport errors.
/// Returns the terminal error, if any, so the caller (the connection FSM)
/// can classify it into a reconnect decision.
pub fn run(
    transport: &Arc<dyn Transport>,
    handlers: &dyn EnvelopeHandlers,
    cancel: &tokio_util::sync::CancellationToken,
) -> CoreError {
    loop {
        if cancel.is_cancelled() {
            return record_context(CoreError::Network("cancelled".into()));
        }

        let raw = match read_one_envelope(transport.as_ref()) {
            Ok(raw) => raw,
            Err(e) => return e,
        };

        let decoded = match codec::decode(&raw, transport.crypto()) {
            Ok(env) => env,
            Err(e) => {
                log::warn!("dropping malformed envelope: {e}");
                continue;
            }
        };

        dispatch_one(&decoded, handlers);
    }
}

fn dispatch_one(envelope: &Envelope, handlers: &dyn EnvelopeHandlers) {
    match envelope.packet_type {
        PacketType::AsciiFrame => handlers.on_ascii_frame(envelope),
        PacketType::AudioOpus => handlers.on_audio_opus(envelope),
        PacketType::AudioOpusBatch => handlers.on_audio_opus_batch(envelope),
        PacketType::ServerState => handlers.on_server_state(envelope),
        PacketType::Ping => handlers.on_ping(envelope),
        PacketType::Pong => handlers.on_pong(envelope),
        PacketType::ClearConsole => handlers.on_clear_console(envelope),
        PacketType::ErrorMessage => handlers.on_error_message(envelope),
        PacketType::RemoteLog => handlers.on_remote_log(envelope),
        PacketType::StreamStart => handlers.on_stream_start(envelope),
        PacketType::StreamStop => handlers.on_stream_stop(envelope),
        PacketType::ClientCapabilities => handlers.on_client_capabilities(envelope),
        PacketType::CryptoRekeyRequest
        | PacketType::CryptoRekeyResponse
        | PacketType::CryptoRekeyComplete => handlers.on_crypto_rekey(envelope),
        PacketType::Encrypted => {
            log::warn!("received nested ENCRYPTED envelope after decrypt; dropping");
        }
        PacketType::Unknown(code) => {
            log::debug!("unknown packet type {code}; skipping");
        }
    }
}
