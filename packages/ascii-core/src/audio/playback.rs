//! Receive → Opus decode → jitter buffer → device sink, with a side channel
//! exposing the most recently played PCM back to the capture pipeline's echo
//! canceler.
//!
//! The reference channel is a weak-style back-reference: capture holds an
//! `Arc<PlaybackPipeline>` only long enough to call [`PlaybackPipeline::take_reference`]
//! each cycle, so tearing playback down first just makes that call return
//! `None` rather than dangling.

use std::sync::Arc;

use audiopus::coder::Decoder as OpusDecoder;
use audiopus::{Channels, SampleRate};
use parking_lot::Mutex;

use crate::audio::capture::ReferenceSource;
use crate::audio::AudioBatch;
use crate::error::{record_context, CoreError, CoreResult};
use crate::protocol_constants::OPUS_FRAME_SAMPLES;

/// Sink the decoded PCM is ultimately written to (the platform audio device
/// output callback). Production code drives real hardware; tests capture.
pub trait PlaybackSink: Send {
    fn write(&mut self, pcm: &[f32]);
}

struct RingState {
    /// Most recent PCM handed to the sink, retained for AEC reference pickup.
    last_played: Vec<f32>,
}

/// Decodes incoming `AUDIO_OPUS`/`AUDIO_OPUS_BATCH` envelopes and feeds a
/// playback sink, while retaining a short reference window for echo
/// cancellation.
pub struct PlaybackPipeline {
    decoder: Mutex<OpusDecoder>,
    state: Mutex<RingState>,
    sink: Mutex<Box<dyn PlaybackSink>>,
}

impl PlaybackPipeline {
    pub fn new(sink: Box<dyn PlaybackSink>) -> CoreResult<Arc<Self>> {
        let decoder = OpusDecoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| record_context(CoreError::Device(format!("opus decoder init: {e}"))))?;
        Ok(Arc::new(Self {
            decoder: Mutex::new(decoder),
            state: Mutex::new(RingState {
                last_played: Vec::new(),
            }),
            sink: Mutex::new(sink),
        }))
    }

    /// Decodes every Opus frame in `batch` in order, writes each frame's PCM
    /// to the sink, and retains the concatenated PCM as the AEC reference.
    pub fn handle_batch(&self, batch: &AudioBatch) -> CoreResult<()> {
        let mut decoder = self.decoder.lock();
        let mut offset = 0usize;
        let mut played = Vec::with_capacity(batch.frame_count() * OPUS_FRAME_SAMPLES);

        for &size in &batch.frame_sizes {
            let size = size as usize;
            let frame_bytes = batch
                .opus_bytes
                .get(offset..offset + size)
                .ok_or_else(|| record_context(CoreError::Protocol("audio batch truncated".into())))?;
            offset += size;

            let mut pcm = vec![0f32; OPUS_FRAME_SAMPLES];
            let decoded = decoder
                .decode_float(Some(frame_bytes), &mut pcm, false)
                .map_err(|e| record_context(CoreError::Device(format!("opus decode: {e}"))))?;
            pcm.truncate(decoded);

            self.sink.lock().write(&pcm);
            played.extend_from_slice(&pcm);
        }

        self.state.lock().last_played = played;
        Ok(())
    }

    /// Signals an upcoming shutdown: the caller should stop feeding new
    /// batches, wait [`crate::protocol_constants::AUDIO_SHUTDOWN_GRACE_MS`]
    /// for any in-flight device callback to observe the cleared reference,
    /// then drop the pipeline.
    pub fn clear_reference(&self) {
        self.state.lock().last_played.clear();
    }
}

impl ReferenceSource for PlaybackPipeline {
    fn latest_reference(&self, len: usize) -> Option<Vec<f32>> {
        let state = self.state.lock();
        if state.last_played.is_empty() {
            return None;
        }
        let mut reference = state.last_played.clone();
        reference.resize(len, 0.0);
        Some(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CapturingSink {
        written: Vec<Vec<f32>>,
    }

    impl PlaybackSink for CapturingSink {
        fn write(&mut self, pcm: &[f32]) {
            self.written.push(pcm.to_vec());
        }
    }

    #[test]
    fn reference_is_none_before_any_batch_played() {
        let pipeline = PlaybackPipeline::new(Box::new(CapturingSink { written: Vec::new() })).unwrap();
        assert!(pipeline.latest_reference(960).is_none());
    }

    #[test]
    fn clear_reference_empties_the_aec_feed() {
        let pipeline = PlaybackPipeline::new(Box::new(CapturingSink { written: Vec::new() })).unwrap();
        pipeline.state.lock().last_played = vec![0.1; 960];
        assert!(pipeline.latest_reference(960).is_some());
        pipeline.clear_reference();
        assert!(pipeline.latest_reference(960).is_none());
    }

    #[test]
    fn truncated_batch_is_rejected() {
        let pipeline = PlaybackPipeline::new(Box::new(CapturingSink { written: Vec::new() })).unwrap();
        let batch = AudioBatch {
            sample_rate: 48000,
            frame_duration_ms: 20,
            frame_sizes: vec![100],
            opus_bytes: vec![0u8; 10],
        };
        assert!(pipeline.handle_batch(&batch).is_err());
    }
}
