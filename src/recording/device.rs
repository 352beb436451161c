//! Microphone seam.
//!
//! [`Microphone`] is what the [`Recorder`](super::Recorder) opens.  The real
//! backend is [`CpalMicrophone`](super::CpalMicrophone); tests substitute a
//! fake that is fed samples by hand.

use async_trait::async_trait;
use thiserror::Error;

use super::buffer::ChunkBuffer;

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Why the microphone could not be used.  Every variant is retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// Another capture already holds the microphone.
    #[error("microphone is already in use by another capture")]
    Busy,
}

// ---------------------------------------------------------------------------
// StreamFormat / DeviceStream
// ---------------------------------------------------------------------------

/// Native format of an open input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An open input stream.  Dropping it releases the device.
pub struct DeviceStream {
    format: StreamFormat,
    _guard: Box<dyn Send>,
}

impl DeviceStream {
    /// Wrap a backend-specific guard whose `Drop` stops the stream.
    pub fn new(format: StreamFormat, guard: impl Send + 'static) -> Self {
        Self {
            format,
            _guard: Box::new(guard),
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// An audio input that can be opened into a running stream.
///
/// The stream pushes interleaved `f32` samples into `sink` for as long as
/// the returned [`DeviceStream`] is alive; the sink decides whether to keep
/// them.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self, sink: ChunkBuffer) -> Result<DeviceStream, DeviceError>;
}
