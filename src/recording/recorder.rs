//! Microphone ownership and capture lifecycle.
//!
//! At most one capture may hold the microphone at a time.  The
//! [`Recorder`] enforces that with an atomic flag taken in
//! [`acquire_microphone`](Recorder::acquire_microphone) and released by the
//! RAII [`DeviceHandle`], so every exit path (normal stop, error, task
//! cancellation) frees the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::buffer::ChunkBuffer;
use super::device::{DeviceError, DeviceStream, Microphone, StreamFormat};
use super::encode::{self, EncodedAudio};
use super::waveform::{self, FrameSpec, WaveformData};
use crate::config::RecordingConfig;

// ---------------------------------------------------------------------------
// DeviceHandle
// ---------------------------------------------------------------------------

/// Clears the recorder's in-use flag when dropped.
struct DeviceLease(Arc<AtomicBool>);

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        log::debug!("recording: microphone released");
    }
}

/// Exclusive claim on an open microphone stream.
pub struct DeviceHandle {
    // Field order matters: the stream is closed before the lease is freed.
    stream: DeviceStream,
    buffer: ChunkBuffer,
    _lease: DeviceLease,
}

impl DeviceHandle {
    pub fn format(&self) -> StreamFormat {
        self.stream.format()
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RecordingSession
// ---------------------------------------------------------------------------

struct ActiveCapture {
    handle: DeviceHandle,
    sampler: JoinHandle<()>,
}

impl ActiveCapture {
    /// The one teardown path: stop the sampler, collect the samples, close
    /// the device.
    fn teardown(self) -> (Vec<f32>, StreamFormat) {
        self.sampler.abort();
        let samples = self.handle.buffer.disarm_and_take();
        let format = self.handle.format();
        drop(self.handle);
        (samples, format)
    }
}

/// One in-progress answer recording.
///
/// [`stop`](Self::stop) is idempotent: the first call tears the capture
/// down and returns the encoded audio, later calls return `None`.  Dropping
/// a live session discards its audio and releases the device.
pub struct RecordingSession {
    active: Mutex<Option<ActiveCapture>>,
    frames: watch::Receiver<WaveformData>,
    started_at: Instant,
    target_rate: u32,
}

impl RecordingSession {
    fn take_active(&self) -> Option<ActiveCapture> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn stop(&self) -> Option<EncodedAudio> {
        let active = self.take_active()?;
        let (samples, format) = active.teardown();
        let audio = encode::encode(&samples, format, self.target_rate);
        log::info!(
            "recording: capture stopped after {:.1}s ({} bytes)",
            audio.duration_secs,
            audio.bytes.len()
        );
        Some(audio)
    }

    /// Tear down without encoding.  Returns `true` if the capture was live.
    pub fn discard(&self) -> bool {
        match self.take_active() {
            Some(active) => {
                active.teardown();
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Latest amplitude frames while the capture is live.
    pub fn waveform(&self) -> watch::Receiver<WaveformData> {
        self.frames.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.discard() {
            log::debug!("recording: live capture dropped; audio discarded");
        }
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("live", &self.is_live())
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Shared front door to the microphone.
pub struct Recorder {
    mic: Arc<dyn Microphone>,
    in_capture: Arc<AtomicBool>,
    config: RecordingConfig,
}

impl Recorder {
    pub fn new(mic: Arc<dyn Microphone>, config: RecordingConfig) -> Self {
        Self {
            mic,
            in_capture: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// `true` while some [`DeviceHandle`] is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_capture.load(Ordering::Acquire)
    }

    /// Claim and open the microphone.
    ///
    /// Fails with [`DeviceError::Busy`] while another handle is alive.  A
    /// failed open releases the claim, so the caller may simply retry.
    pub async fn acquire_microphone(&self) -> Result<DeviceHandle, DeviceError> {
        if self
            .in_capture
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("recording: microphone requested while already in use");
            return Err(DeviceError::Busy);
        }
        let lease = DeviceLease(Arc::clone(&self.in_capture));

        let buffer = ChunkBuffer::new();
        let stream = match self.mic.open(buffer.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("recording: failed to open microphone: {e}");
                return Err(e);
            }
        };

        let format = stream.format();
        log::info!(
            "recording: microphone open ({} Hz, {} ch)",
            format.sample_rate,
            format.channels
        );
        Ok(DeviceHandle {
            stream,
            buffer,
            _lease: lease,
        })
    }

    /// Start retaining samples and publishing waveform frames.
    pub fn start_capture(&self, handle: DeviceHandle) -> RecordingSession {
        handle.buffer.arm();

        let format = handle.format();
        let window = (format.sample_rate as u64
            * format.channels as u64
            * self.config.waveform_window_ms
            / 1_000) as usize;
        let spec = FrameSpec {
            interval: Duration::from_millis(self.config.frame_interval_ms.max(1)),
            window: window.max(1),
            bars: self.config.waveform_bars,
        };

        let (tx, frames) = watch::channel(WaveformData::silent(spec.bars));
        let sampler = tokio::spawn(waveform::sample_frames(handle.buffer.clone(), tx, spec));

        log::info!("recording: capture started");
        RecordingSession {
            active: Mutex::new(Some(ActiveCapture { handle, sampler })),
            frames,
            started_at: Instant::now(),
            target_rate: self.config.target_sample_rate,
        }
    }

    /// Equivalent to [`RecordingSession::stop`].
    pub fn stop_capture(&self, session: &RecordingSession) -> Option<EncodedAudio> {
        session.stop()
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("busy", &self.is_busy())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::fake::FakeMicrophone;

    fn recorder(mic: &Arc<FakeMicrophone>) -> Recorder {
        let config = RecordingConfig {
            frame_interval_ms: 100,
            ..RecordingConfig::default()
        };
        Recorder::new(Arc::clone(mic) as Arc<dyn Microphone>, config)
    }

    #[tokio::test]
    async fn second_acquire_is_busy_until_release() {
        let mic = Arc::new(FakeMicrophone::new());
        let rec = recorder(&mic);

        let first = rec.acquire_microphone().await.expect("first acquire");
        assert!(rec.is_busy());
        assert_eq!(rec.acquire_microphone().await.unwrap_err(), DeviceError::Busy);

        drop(first);
        assert!(!rec.is_busy());
        assert!(rec.acquire_microphone().await.is_ok());
    }

    #[tokio::test]
    async fn failed_open_releases_the_claim() {
        let mic = Arc::new(FakeMicrophone::failing(DeviceError::PermissionDenied(
            "denied".into(),
        )));
        let rec = recorder(&mic);

        let err = rec.acquire_microphone().await.unwrap_err();
        assert!(matches!(err, DeviceError::PermissionDenied(_)));
        assert!(!rec.is_busy());

        mic.recover();
        assert!(rec.acquire_microphone().await.is_ok());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_once() {
        let mic = Arc::new(FakeMicrophone::new());
        let rec = recorder(&mic);

        let handle = rec.acquire_microphone().await.unwrap();
        let session = rec.start_capture(handle);
        mic.feed(&vec![0.2; 16_000]);

        let audio = rec.stop_capture(&session).expect("first stop yields audio");
        assert!((audio.duration_secs - 1.0).abs() < 1e-3);
        assert!(rec.stop_capture(&session).is_none());
        assert!(!session.is_live());
        assert_eq!(mic.releases(), 1);
        assert!(!rec.is_busy());
    }

    #[tokio::test]
    async fn samples_before_start_are_not_recorded() {
        let mic = Arc::new(FakeMicrophone::new());
        let rec = recorder(&mic);

        let handle = rec.acquire_microphone().await.unwrap();
        mic.feed(&vec![0.9; 8_000]);
        let session = rec.start_capture(handle);
        mic.feed(&vec![0.1; 1_600]);

        let audio = session.stop().unwrap();
        assert!((audio.duration_secs - 0.1).abs() < 1e-3);
    }

    #[tokio::test]
    async fn dropping_a_live_session_releases_the_device() {
        let mic = Arc::new(FakeMicrophone::new());
        let rec = recorder(&mic);

        let session = rec.start_capture(rec.acquire_microphone().await.unwrap());
        assert!(rec.is_busy());
        drop(session);

        assert!(!rec.is_busy());
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waveform_frames_follow_the_signal() {
        let mic = Arc::new(FakeMicrophone::new());
        let rec = recorder(&mic);
        let session = rec.start_capture(rec.acquire_microphone().await.unwrap());
        let mut frames = session.waveform();

        mic.feed(&vec![0.5; 16_000]);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(frames.has_changed().unwrap_or(false));
        let frame = frames.borrow_and_update().clone();
        assert_eq!(frame.len(), RecordingConfig::default().waveform_bars);
        assert!((frame.peak() - 0.5).abs() < 1e-3);

        session.stop();
    }
}
