//! Microphone capture via `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so [`CpalMicrophone`]
//! builds and owns the stream on a dedicated `mic-capture` thread.  The
//! thread reports the negotiated format back over a oneshot channel and then
//! parks until the returned guard is dropped, at which point the stream is
//! dropped (stopping the hardware) and the thread exits.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::oneshot;

use super::buffer::ChunkBuffer;
use super::device::{DeviceError, DeviceStream, Microphone, StreamFormat};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up the cpal input stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

impl From<CaptureError> for DeviceError {
    /// Missing hardware maps to `DeviceUnavailable`; a device that exists
    /// but refuses to stream is reported as a permission problem, which is
    /// how the OS privacy layers surface a denied microphone.
    fn from(e: CaptureError) -> Self {
        let msg = e.to_string();
        match e {
            CaptureError::NoDevice
            | CaptureError::DefaultConfig(_)
            | CaptureError::BuildStream(cpal::BuildStreamError::DeviceNotAvailable)
            | CaptureError::PlayStream(cpal::PlayStreamError::DeviceNotAvailable) => {
                DeviceError::DeviceUnavailable(msg)
            }
            CaptureError::BuildStream(_) | CaptureError::PlayStream(_) => {
                DeviceError::PermissionDenied(msg)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

/// The system default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self, sink: ChunkBuffer) -> Result<DeviceStream, DeviceError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || match open_default_input(sink) {
                Ok((stream, format)) => {
                    let _ = ready_tx.send(Ok(format));
                    // Blocks until the guard sends or is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::DeviceUnavailable(e.to_string()))?;

        let format = ready_rx
            .await
            .map_err(|_| DeviceError::DeviceUnavailable("capture thread exited".into()))?
            .map_err(DeviceError::from)?;

        Ok(DeviceStream::new(
            format,
            CpalStreamGuard {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            },
        ))
    }
}

fn open_default_input(sink: ChunkBuffer) -> Result<(cpal::Stream, StreamFormat), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    let supported = device.default_input_config()?;
    let format = StreamFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let config: cpal::StreamConfig = supported.into();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| sink.push(data),
        |err: cpal::StreamError| {
            log::error!("recording: cpal stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok((stream, format))
}

/// Stops the capture thread (and with it the cpal stream) on drop.
struct CpalStreamGuard {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for CpalStreamGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("recording: capture thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_unavailable() {
        let err = DeviceError::from(CaptureError::NoDevice);
        assert!(matches!(err, DeviceError::DeviceUnavailable(_)));
    }

    #[test]
    fn disconnected_device_is_unavailable() {
        let err = DeviceError::from(CaptureError::BuildStream(
            cpal::BuildStreamError::DeviceNotAvailable,
        ));
        assert!(matches!(err, DeviceError::DeviceUnavailable(_)));
    }

    #[test]
    fn refused_stream_is_permission_denied() {
        let err = DeviceError::from(CaptureError::BuildStream(
            cpal::BuildStreamError::StreamConfigNotSupported,
        ));
        assert!(matches!(err, DeviceError::PermissionDenied(_)));
    }

    #[test]
    fn cpal_microphone_is_object_safe() {
        let mic: Box<dyn Microphone> = Box::new(CpalMicrophone::new());
        drop(mic);
    }
}
