//! Recording subsystem.
//!
//! * [`device`]   — the [`Microphone`] seam and [`DeviceError`].
//! * [`capture`]  — [`CpalMicrophone`], the default input via `cpal`.
//! * [`buffer`]   — [`ChunkBuffer`], samples retained while armed.
//! * [`recorder`] — [`Recorder`]: exclusive acquisition plus the
//!   start/stop lifecycle of a [`RecordingSession`].
//! * [`waveform`] — live amplitude frames.
//! * [`resample`] / [`encode`] — mono 16-bit WAV for upload.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod encode;
pub mod recorder;
pub mod resample;
pub mod waveform;

#[cfg(test)]
pub(crate) mod fake;

pub use buffer::ChunkBuffer;
pub use capture::{CaptureError, CpalMicrophone};
pub use device::{DeviceError, DeviceStream, Microphone, StreamFormat};
pub use encode::EncodedAudio;
pub use recorder::{DeviceHandle, Recorder, RecordingSession};
pub use resample::{downmix, resample};
pub use waveform::WaveformData;
