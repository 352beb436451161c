//! Live amplitude frames for the recording indicator.
//!
//! While a capture is armed, [`sample_frames`] periodically reduces the most
//! recent window of samples to a fixed number of RMS bars and publishes the
//! result on a `watch` channel.  Consumers only ever see the latest frame.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::buffer::ChunkBuffer;

// ---------------------------------------------------------------------------
// WaveformData
// ---------------------------------------------------------------------------

/// One amplitude frame: RMS per equal-width chunk, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformData {
    pub bars: Vec<f32>,
}

impl WaveformData {
    /// A flat frame of `num_bars` zeros.
    pub fn silent(num_bars: usize) -> Self {
        Self {
            bars: vec![0.0; num_bars],
        }
    }

    /// Reduce `audio` to `num_bars` RMS values.  Short input is padded with
    /// zeros; `num_bars == 0` yields an empty frame.
    ///
    /// ```rust
    /// use assessment_runner::recording::WaveformData;
    ///
    /// let audio: Vec<f32> = (0..16_000).map(|i| (i as f32 * 0.001).sin() * 0.5).collect();
    /// let frame = WaveformData::compute(&audio, 20);
    /// assert_eq!(frame.bars.len(), 20);
    /// assert!(frame.bars.iter().all(|&b| (0.0..=1.0).contains(&b)));
    /// ```
    pub fn compute(audio: &[f32], num_bars: usize) -> Self {
        if num_bars == 0 {
            return Self { bars: Vec::new() };
        }
        if audio.is_empty() {
            return Self::silent(num_bars);
        }

        let chunk_size = (audio.len() / num_bars).max(1);
        let mut bars: Vec<f32> = audio
            .chunks(chunk_size)
            .take(num_bars)
            .map(|chunk| {
                let mean_sq = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
                mean_sq.sqrt().min(1.0)
            })
            .collect();
        bars.resize(num_bars, 0.0);

        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn peak(&self) -> f32 {
        self.bars.iter().copied().fold(0.0_f32, f32::max)
    }
}

// ---------------------------------------------------------------------------
// Frame sampler
// ---------------------------------------------------------------------------

/// How the sampler slices the live buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub interval: Duration,
    /// Window size in raw interleaved samples.
    pub window: usize,
    pub bars: usize,
}

/// Publish a frame every `spec.interval` until every receiver is gone or the
/// task is aborted.
pub async fn sample_frames(buffer: ChunkBuffer, tx: watch::Sender<WaveformData>, spec: FrameSpec) {
    let mut ticker = tokio::time::interval(spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let frame = WaveformData::compute(&buffer.tail(spec.window), spec.bars);
        if tx.send(frame).is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
