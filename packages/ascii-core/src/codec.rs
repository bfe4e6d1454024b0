//! Envelope framing, AEAD encrypt/decrypt, zstd compress/decompress, CRC32.
//!
//! On the wire: `{ magic(4B) | type(2B) | flags(2B) | client_id(4B) | len(4B)
//! | crc32(4B) | payload[len] }`, all multi-byte integers big-endian. When
//! AEAD is active the payload is `{nonce | ciphertext | tag}` and `type` is
//! set to [`PacketType::Encrypted`]; the original envelope (including its
//! real type) is the plaintext wrapped inside.

use crate::error::{record_context, CoreError, CoreResult};
use crate::protocol_constants::{COMPRESS_THRESHOLD, ENVELOPE_HEADER_LEN, ENVELOPE_MAGIC, MAX_ENVELOPE_LEN};
use crate::transport::CryptoContext;

/// Envelope flag bits.
pub mod flags {
    pub const COMPRESSED: u16 = 0b0001;
}

/// Packet types the ingress dispatcher recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    AsciiFrame = 1,
    AudioOpus = 2,
    AudioOpusBatch = 3,
    ServerState = 4,
    Ping = 5,
    Pong = 6,
    ClearConsole = 7,
    ErrorMessage = 8,
    RemoteLog = 9,
    StreamStart = 10,
    StreamStop = 11,
    ClientCapabilities = 12,
    CryptoRekeyRequest = 13,
    CryptoRekeyResponse = 14,
    CryptoRekeyComplete = 15,
    Encrypted = 0xFFFF,
    Unknown(u16),
}

impl PacketType {
    #[must_use]
    pub fn wire_value(self) -> u16 {
        match self {
            Self::AsciiFrame => 1,
            Self::AudioOpus => 2,
            Self::AudioOpusBatch => 3,
            Self::ServerState => 4,
            Self::Ping => 5,
            Self::Pong => 6,
            Self::ClearConsole => 7,
            Self::ErrorMessage => 8,
            Self::RemoteLog => 9,
            Self::StreamStart => 10,
            Self::StreamStop => 11,
            Self::ClientCapabilities => 12,
            Self::CryptoRekeyRequest => 13,
            Self::CryptoRekeyResponse => 14,
            Self::CryptoRekeyComplete => 15,
            Self::Encrypted => 0xFFFF,
            Self::Unknown(v) => v,
        }
    }

    #[must_use]
    pub fn from_wire(value: u16) -> Self {
        match value {
            1 => Self::AsciiFrame,
            2 => Self::AudioOpus,
            3 => Self::AudioOpusBatch,
            4 => Self::ServerState,
            5 => Self::Ping,
            6 => Self::Pong,
            7 => Self::ClearConsole,
            8 => Self::ErrorMessage,
            9 => Self::RemoteLog,
            10 => Self::StreamStart,
            11 => Self::StreamStop,
            12 => Self::ClientCapabilities,
            13 => Self::CryptoRekeyRequest,
            14 => Self::CryptoRekeyResponse,
            15 => Self::CryptoRekeyComplete,
            0xFFFF => Self::Encrypted,
            other => Self::Unknown(other),
        }
    }
}

/// A decoded envelope, ready for dispatch.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub packet_type: PacketType,
    pub flags: u16,
    pub client_id: u32,
    pub payload: Vec<u8>,
}

/// Encodes `(packet_type, payload)` into a ready-to-send byte blob,
/// applying compression above [`COMPRESS_THRESHOLD`] and AEAD when `crypto`
/// is `Some`.
pub fn encode(
    packet_type: PacketType,
    client_id: u32,
    payload: &[u8],
    compression_level: i32,
    crypto: Option<&CryptoContext>,
) -> CoreResult<Vec<u8>> {
    let (mut body, mut flags, mut wire_type) = (payload.to_vec(), 0u16, packet_type.wire_value());

    if body.len() > COMPRESS_THRESHOLD {
        let compressed = zstd::encode_all(&body[..], compression_level)
            .map_err(|e| record_context(CoreError::Compression(format!("zstd encode: {e}"))))?;
        if compressed.len() < body.len() {
            body = compressed;
            flags |= flags::COMPRESSED;
        }
    }

    let mut inner = frame(wire_type, flags, client_id, &body);

    if let Some(crypto) = crypto {
        let sealed = crypto.seal(&inner)?;
        wire_type = PacketType::Encrypted.wire_value();
        flags = 0;
        inner = frame(wire_type, flags, client_id, &sealed);
    }

    Ok(inner)
}

fn frame(wire_type: u16, flags: u16, client_id: u32, payload: &[u8]) -> Vec<u8> {
    let crc = crc32fast::hash(payload);
    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    out.extend_from_slice(&ENVELOPE_MAGIC.to_be_bytes());
    out.extend_from_slice(&wire_type.to_be_bytes());
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&client_id.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decodes a single envelope from `bytes`, which must contain exactly one
/// complete envelope (header + payload, no trailing data). Verifies CRC32,
/// decrypts if `ENCRYPTED`, and decompresses if `FLAG_COMPRESSED`.
pub fn decode(bytes: &[u8], crypto: Option<&CryptoContext>) -> CoreResult<Envelope> {
    let (wire_type, flags, client_id, payload) = parse_frame(bytes)?;

    if PacketType::from_wire(wire_type) == PacketType::Encrypted {
        let crypto = crypto.ok_or_else(|| {
            record_context(CoreError::Crypto("received ENCRYPTED envelope with no crypto installed".into()))
        })?;
        let inner = crypto.open(&payload)?;
        let (inner_type, inner_flags, inner_client_id, inner_payload) = parse_frame(&inner)?;
        return finish_decode(inner_type, inner_flags, inner_client_id, inner_payload);
    }

    finish_decode(wire_type, flags, client_id, payload)
}

fn finish_decode(wire_type: u16, flags: u16, client_id: u32, mut payload: Vec<u8>) -> CoreResult<Envelope> {
    if flags & flags::COMPRESSED != 0 {
        payload = zstd::decode_all(&payload[..])
            .map_err(|e| record_context(CoreError::Compression(format!("zstd decode: {e}"))))?;
    }
    Ok(Envelope {
        packet_type: PacketType::from_wire(wire_type),
        flags,
        client_id,
        payload,
    })
}

/// Parses one frame's header + payload (not recursing into `ENCRYPTED`),
/// validating magic, length bound, and CRC32 against the payload as stored
/// on the wire (i.e. pre-decompression, post-decryption).
fn parse_frame(bytes: &[u8]) -> CoreResult<(u16, u16, u32, Vec<u8>)> {
    if bytes.len() < ENVELOPE_HEADER_LEN {
        return Err(record_context(CoreError::Protocol("envelope shorter than header".into())));
    }
    let magic = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    if magic != ENVELOPE_MAGIC {
        return Err(record_context(CoreError::Protocol(format!(
            "bad magic: {magic:#x}"
        ))));
    }
    let wire_type = u16::from_be_bytes(bytes[4..6].try_into().unwrap());
    let flags = u16::from_be_bytes(bytes[6..8].try_into().unwrap());
    let client_id = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let len = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
    let crc = u32::from_be_bytes(bytes[16..20].try_into().unwrap());

    if len > MAX_ENVELOPE_LEN {
        return Err(record_context(CoreError::Protocol(format!(
            "oversized envelope: {len} > {MAX_ENVELOPE_LEN}"
        ))));
    }
    let payload = &bytes[ENVELOPE_HEADER_LEN..];
    if payload.len() as u32 != len {
        return Err(record_context(CoreError::Protocol(format!(
            "length mismatch: header says {len}, got {}",
            payload.len()
        ))));
    }

    let actual_crc = crc32fast::hash(payload);
    if actual_crc != crc {
        return Err(record_context(CoreError::Protocol(format!(
            "crc mismatch: header {crc:#x}, computed {actual_crc:#x}"
        ))));
    }

    Ok((wire_type, flags, client_id, payload.to_vec()))
}

/// Reads the 4-byte length field out of a raw header buffer so the caller
/// knows how many more bytes to read before calling [`decode`].
#[must_use]
pub fn peek_payload_len(header: &[u8; ENVELOPE_HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header[12..16].try_into().unwrap())
}
