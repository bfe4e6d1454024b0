//! Capture-side signal processing: peak normalization, a one-pole high-pass
//! filter, a simple adaptive echo canceler, and an AGC/compressor — applied
//! in that order before the Opus encoder, per the capture pipeline's
//! contract.

/// Peak-normalizes `samples` in place if the peak exceeds `1.0`, scaling so
/// the new peak is `0.99` (preserves headroom rather than clipping to unity).
pub fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak > 1.0 {
        let scale = 0.99 / peak;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

/// One-pole high-pass filter removing DC offset and rumble below ~80 Hz at
/// 48 kHz. Stateful across calls so streaming chunks filter continuously.
pub struct HighPassFilter {
    alpha: f32,
    prev_input: f32,
    prev_output: f32,
}

impl Default for HighPassFilter {
    fn default() -> Self {
        // alpha tuned for ~80Hz cutoff at 48kHz: alpha = RC / (RC + dt).
        Self::new(0.995)
    }
}

impl HighPassFilter {
    #[must_use]
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            prev_input: 0.0,
            prev_output: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let output = self.alpha * (self.prev_output + *s - self.prev_input);
            self.prev_input = *s;
            self.prev_output = output;
            *s = output;
        }
    }
}

/// Adaptive echo canceler using a normalized least-mean-squares filter
/// against the most recent playback reference. The reference is supplied
/// by the playback pipeline each time it hands PCM to the device sink (see
/// [`super::playback::PlaybackPipeline::latest_reference`]).
pub struct EchoCanceler {
    weights: Vec<f32>,
    history: Vec<f32>,
}

impl EchoCanceler {
    #[must_use]
    pub fn new(taps: usize) -> Self {
        Self {
            weights: vec![0.0; taps],
            history: vec![0.0; taps],
        }
    }

    /// Cancels echo in `mic` using `reference` (recent playback samples,
    /// same length as `mic`). If no reference is available, `mic` passes
    /// through unchanged.
    pub fn process(&mut self, mic: &mut [f32], reference: Option<&[f32]>) {
        let Some(reference) = reference else {
            return;
        };
        let step = 0.1;
        for (i, sample) in mic.iter_mut().enumerate() {
            let taps = self.weights.len();
            self.history.rotate_right(1);
            self.history[0] = reference.get(i).copied().unwrap_or(0.0);

            let estimate: f32 = self
                .weights
                .iter()
                .zip(self.history.iter())
                .map(|(w, h)| w * h)
                .sum();
            let error = *sample - estimate;
            let energy: f32 = self.history.iter().map(|h| h * h).sum::<f32>() + 1e-6;
            for t in 0..taps {
                self.weights[t] += step * error * self.history[t] / energy;
            }
            *sample = error;
        }
    }
}

/// Simple feed-forward AGC: tracks a running RMS level and applies gain to
/// pull it toward `target_rms`, clamped to `[min_gain, max_gain]`.
pub struct AutomaticGainControl {
    target_rms: f32,
    current_gain: f32,
    min_gain: f32,
    max_gain: f32,
}

impl Default for AutomaticGainControl {
    fn default() -> Self {
        Self::new(0.15, 0.5, 4.0)
    }
}

impl AutomaticGainControl {
    #[must_use]
    pub fn new(target_rms: f32, min_gain: f32, max_gain: f32) -> Self {
        Self {
            target_rms,
            current_gain: 1.0,
            min_gain,
            max_gain,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        if samples.is_empty() {
            return;
        }
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        if rms > 1e-6 {
            let desired_gain = (self.target_rms / rms).clamp(self.min_gain, self.max_gain);
            // Smooth toward the desired gain rather than snapping, to avoid
            // audible pumping between blocks.
            self.current_gain += (desired_gain - self.current_gain) * 0.2;
        }
        for s in samples.iter_mut() {
            *s = (*s * self.current_gain).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_normalize_scales_down_clipping_signal() {
        let mut samples = vec![2.0f32, -1.5, 0.5];
        peak_normalize(&mut samples);
        assert!(samples.iter().all(|&s| s.abs() <= 1.0));
    }

    #[test]
    fn peak_normalize_is_a_no_op_under_unity() {
        let mut samples = vec![0.1f32, -0.2, 0.3];
        let before = samples.clone();
        peak_normalize(&mut samples);
        assert_eq!(samples, before);
    }

    #[test]
    fn high_pass_filter_attenuates_dc_offset() {
        let mut filter = HighPassFilter::default();
        let mut samples = vec![0.5f32; 2000];
        filter.process(&mut samples);
        // After settling, a constant input should decay toward zero.
        assert!(samples.last().unwrap().abs() < 0.1);
    }

    #[test]
    fn agc_pulls_quiet_signal_toward_target_rms() {
        let mut agc = AutomaticGainControl::default();
        let mut samples = vec![0.01f32; 960];
        for _ in 0..50 {
            agc.process(&mut samples);
        }
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        assert!(rms > 0.01);
    }

    #[test]
    fn echo_canceler_reduces_energy_when_mic_equals_reference() {
        let mut canceler = EchoCanceler::new(16);
        let reference = vec![0.3f32; 64];
        let mut mic = reference.clone();
        for _ in 0..30 {
            let mut pass = mic.clone();
            canceler.process(&mut pass, Some(&reference));
        }
        let mut final_pass = mic.clone();
        canceler.process(&mut final_pass, Some(&reference));
        let input_energy: f32 = mic.iter().map(|s| s * s).sum();
        let output_energy: f32 = final_pass.iter().map(|s| s * s).sum();
        assert!(output_energy <= input_energy);
    }
}
