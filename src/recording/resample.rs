//! Channel mixing and sample-rate conversion for captured answers.
//!
//! Devices deliver whatever format they natively run at (commonly 44.1 or
//! 48 kHz stereo).  Answers are uploaded as mono at the configured target
//! rate, so every capture goes through [`downmix`] and then [`resample`].

// ---------------------------------------------------------------------------
// downmix
// ---------------------------------------------------------------------------

/// Average interleaved `channels` down to one channel.
///
/// A trailing partial frame is dropped.  `channels == 0` yields nothing.
///
/// ```rust
/// use assessment_runner::recording::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Convert mono `samples` from `from_rate` to `to_rate` by linear
/// interpolation.
///
/// Equal rates (or an empty input, or a zero rate on either side) return
/// the input unchanged.  Output length is `ceil(len * to_rate / from_rate)`.
///
/// ```rust
/// use assessment_runner::recording::resample;
///
/// let hi = vec![0.5_f32; 480];
/// assert_eq!(resample(&hi, 48_000, 16_000).len(), 160);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let last = samples.len() - 1;

    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let idx = (src_pos as usize).min(last);
            let frac = (src_pos - idx as f64) as f32;
            match samples.get(idx + 1) {
                Some(&next) => samples[idx] * (1.0 - frac) + next * frac,
                None => samples[idx],
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
