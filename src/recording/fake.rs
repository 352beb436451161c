//! Scriptable microphone for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::buffer::ChunkBuffer;
use super::device::{DeviceError, DeviceStream, Microphone, StreamFormat};

pub(crate) struct FakeMicrophone {
    failure: Mutex<Option<DeviceError>>,
    sink: Mutex<Option<ChunkBuffer>>,
    opens: AtomicUsize,
    releases: Arc<AtomicUsize>,
    format: StreamFormat,
}

struct FakeGuard(Arc<AtomicUsize>);

impl Drop for FakeGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeMicrophone {
    /// Opens successfully as a 16 kHz mono device.
    pub fn new() -> Self {
        Self {
            failure: Mutex::new(None),
            sink: Mutex::new(None),
            opens: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            format: StreamFormat {
                sample_rate: 16_000,
                channels: 1,
            },
        }
    }

    /// Fails every open with `err` until [`recover`](Self::recover).
    pub fn failing(err: DeviceError) -> Self {
        let mic = Self::new();
        *mic.failure.lock().unwrap() = Some(err);
        mic
    }

    pub fn fail_with(&self, err: DeviceError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Push samples as if the device callback had delivered them.
    pub fn feed(&self, samples: &[f32]) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.push(samples);
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of streams closed so far.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self, sink: ChunkBuffer) -> Result<DeviceStream, DeviceError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(DeviceStream::new(
            self.format,
            FakeGuard(Arc::clone(&self.releases)),
        ))
    }
}
