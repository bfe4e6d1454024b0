//! Mic → normalize → filter → AEC → AGC → Opus → batch → async send.
//!
//! Runs on a dedicated worker (see [`crate::worker_pool`]). Each iteration:
//! poll the producer ring buffer fed by the platform microphone callback;
//! if nothing is available and a partial batch has aged past
//! [`BATCH_TIMEOUT_MS`], flush it; otherwise read up to
//! [`MAX_BATCH_FRAMES`] Opus-frames' worth, process, encode, and accumulate.

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use audiopus::coder::Encoder as OpusEncoder;
use audiopus::{Application, Channels, SampleRate};
use tokio_util::sync::CancellationToken;

use crate::audio::processing::{AutomaticGainControl, EchoCanceler, HighPassFilter};
use crate::audio::AudioBatch;
use crate::error::{record_context, CoreError, CoreResult};
use crate::protocol_constants::{BATCH_TIMEOUT_MS, MAX_BATCH_FRAMES, OPUS_FRAME_SAMPLES};
use crate::send_queue::{SendQueue, SendSlot};

/// Source of raw microphone samples: the platform capture callback pushes
/// 960-sample (20 ms) chunks here; the pipeline drains it.
pub type MicSamples = Receiver<Vec<f32>>;

/// Supplies the most recent playback PCM for echo cancellation. `None` if
/// playback hasn't produced anything yet, or has been torn down (the weak
/// back-reference named in the data model).
pub trait ReferenceSource: Send {
    fn latest_reference(&self, len: usize) -> Option<Vec<f32>>;
}

struct PartialBatch {
    sample_rate: u32,
    frame_duration_ms: u32,
    frame_sizes: Vec<u16>,
    opus_bytes: Vec<u8>,
    started_at: Instant,
}

impl PartialBatch {
    fn new() -> Self {
        Self {
            sample_rate: crate::protocol_constants::SAMPLE_RATE,
            frame_duration_ms: crate::protocol_constants::OPUS_FRAME_DURATION_MS,
            frame_sizes: Vec::with_capacity(MAX_BATCH_FRAMES),
            opus_bytes: Vec::new(),
            started_at: Instant::now(),
        }
    }

    fn push_frame(&mut self, encoded: &[u8]) {
        if self.frame_sizes.is_empty() {
            self.started_at = Instant::now();
        }
        self.frame_sizes.push(encoded.len() as u16);
        self.opus_bytes.extend_from_slice(encoded);
    }

    fn is_full(&self) -> bool {
        self.frame_sizes.len() >= MAX_BATCH_FRAMES
    }

    fn is_stale(&self) -> bool {
        !self.frame_sizes.is_empty()
            && self.started_at.elapsed() >= Duration::from_millis(BATCH_TIMEOUT_MS)
    }

    fn take(&mut self) -> Option<AudioBatch> {
        if self.frame_sizes.is_empty() {
            return None;
        }
        let batch = AudioBatch {
            sample_rate: self.sample_rate,
            frame_duration_ms: self.frame_duration_ms,
            frame_sizes: std::mem::take(&mut self.frame_sizes),
            opus_bytes: std::mem::take(&mut self.opus_bytes),
        };
        Some(batch)
    }
}

/// Drives the capture pipeline until `cancel` fires. On shutdown, any
/// remaining partial batch is flushed before returning.
pub fn run(
    mic: &MicSamples,
    reference: Option<&dyn ReferenceSource>,
    queue: &SendQueue,
    bitrate: u32,
    cancel: &CancellationToken,
) -> CoreResult<()> {
    let mut encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Mono, Application::Audio)
        .map_err(|e| record_context(CoreError::Device(format!("opus encoder init: {e}"))))?;
    encoder
        .set_bitrate(audiopus::Bitrate::BitsPerSecond(bitrate as i32))
        .map_err(|e| record_context(CoreError::Device(format!("opus set_bitrate: {e}"))))?;

    let mut high_pass = HighPassFilter::default();
    let mut echo_canceler = EchoCanceler::new(64);
    let mut agc = AutomaticGainControl::default();
    let mut batch = PartialBatch::new();
    let mut encode_scratch = [0u8; 4000];

    loop {
        if cancel.is_cancelled() {
            flush_batch(&mut batch, queue);
            return Ok(());
        }

        match mic.recv_timeout(Duration::from_millis(10)) {
            Ok(mut samples) => {
                if samples.len() != OPUS_FRAME_SAMPLES {
                    samples.resize(OPUS_FRAME_SAMPLES, 0.0);
                }

                crate::audio::processing::peak_normalize(&mut samples);
                high_pass.process(&mut samples);
                let reference_pcm = reference.and_then(|r| r.latest_reference(samples.len()));
                echo_canceler.process(&mut samples, reference_pcm.as_deref());
                agc.process(&mut samples);

                match encoder.encode_float(&samples, &mut encode_scratch) {
                    Ok(0) => {
                        // DTX: encoder emitted silence; skip this frame.
                    }
                    Ok(n) => {
                        batch.push_frame(&encode_scratch[..n]);
                        if batch.is_full() {
                            flush_batch(&mut batch, queue);
                        }
                    }
                    Err(e) => log::warn!("opus encode failed, dropping frame: {e}"),
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if batch.is_stale() {
                    flush_batch(&mut batch, queue);
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                flush_batch(&mut batch, queue);
                return Ok(());
            }
        }
    }
}

fn flush_batch(batch: &mut PartialBatch, queue: &SendQueue) {
    if let Some(ready) = batch.take() {
        if !queue.try_enqueue(SendSlot {
            bytes: ready.to_bytes(),
        }) {
            log::warn!("dropped an audio batch: send queue full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_batch_flushes_after_max_frames() {
        let mut batch = PartialBatch::new();
        for _ in 0..MAX_BATCH_FRAMES {
            batch.push_frame(&[1, 2, 3]);
        }
        assert!(batch.is_full());
        let ready = batch.take().unwrap();
        assert_eq!(ready.frame_count(), MAX_BATCH_FRAMES);
        assert!(batch.take().is_none());
    }

    #[test]
    fn partial_batch_becomes_stale_after_timeout() {
        let mut batch = PartialBatch::new();
        batch.push_frame(&[9]);
        assert!(!batch.is_stale());
        std::thread::sleep(Duration::from_millis(BATCH_TIMEOUT_MS + 10));
        assert!(batch.is_stale());
    }

    #[test]
    fn empty_partial_batch_is_never_stale_or_takeable() {
        let mut batch = PartialBatch::new();
        assert!(!batch.is_stale());
        assert!(batch.take().is_none());
    }
}
