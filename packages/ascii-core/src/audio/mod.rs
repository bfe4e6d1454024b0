//! Real-time audio pipelines: capture → processing → Opus encode → batched
//! send, and receive → Opus decode → jitter buffer → AEC reference → playback.

pub mod capture;
pub mod playback;
pub mod processing;

use crate::protocol_constants::MAX_BATCH_FRAMES;

/// `{sample_rate, frame_duration_ms, frame_count, frame_sizes[frame_count],
/// concatenated_opus_bytes}`. Invariant: `sum(frame_sizes) == opus_bytes.len()`
/// and `frame_count <= MAX_BATCH_FRAMES`.
#[derive(Debug, Clone)]
pub struct AudioBatch {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    pub frame_sizes: Vec<u16>,
    pub opus_bytes: Vec<u8>,
}

impl AudioBatch {
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frame_sizes.len()
    }

    /// Validates the batch invariants named in the data model.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.frame_sizes.len() <= MAX_BATCH_FRAMES
            && self.frame_sizes.iter().map(|&s| s as usize).sum::<usize>() == self.opus_bytes.len()
    }

    /// Serializes to the wire form: `sample_rate(4) | frame_duration_ms(4) |
    /// frame_count(2) | reserved(2) | frame_sizes[frame_count](2 each) |
    /// concatenated opus bytes`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.frame_sizes.len() * 2 + self.opus_bytes.len());
        out.extend_from_slice(&self.sample_rate.to_be_bytes());
        out.extend_from_slice(&self.frame_duration_ms.to_be_bytes());
        out.extend_from_slice(&(self.frame_sizes.len() as u16).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        for size in &self.frame_sizes {
            out.extend_from_slice(&size.to_be_bytes());
        }
        out.extend_from_slice(&self.opus_bytes);
        out
    }

    /// Parses the wire form produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        let sample_rate = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let frame_duration_ms = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        let frame_count = u16::from_be_bytes(bytes[8..10].try_into().ok()?) as usize;
        let mut offset = 12;
        let mut frame_sizes = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frame_sizes.push(u16::from_be_bytes(bytes.get(offset..offset + 2)?.try_into().ok()?));
            offset += 2;
        }
        let opus_bytes = bytes.get(offset..)?.to_vec();
        let batch = Self {
            sample_rate,
            frame_duration_ms,
            frame_sizes,
            opus_bytes,
        };
        batch.is_well_formed().then_some(batch)
    }
}
