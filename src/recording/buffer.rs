//! Capture buffer shared between the audio callback and the recorder.
//!
//! The device stream pushes into a [`ChunkBuffer`] from its own thread for
//! as long as it is open, but samples are only retained while the buffer is
//! *armed*, i.e. between `start_capture` and `stop_capture`.  Anything that
//! arrives while disarmed is dropped on the floor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ChunkState {
    samples: Vec<f32>,
    armed: bool,
}

/// Cheaply clonable handle to one capture's sample store.
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer {
    inner: Arc<Mutex<ChunkState>>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChunkState> {
        // A panicking audio callback must not wedge the recorder.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append interleaved samples.  Ignored unless armed.
    pub fn push(&self, data: &[f32]) {
        let mut state = self.state();
        if state.armed {
            state.samples.extend_from_slice(data);
        }
    }

    /// Clear any previous contents and start retaining samples.
    pub fn arm(&self) {
        let mut state = self.state();
        state.samples.clear();
        state.armed = true;
    }

    /// Stop retaining samples and hand back everything captured.
    pub fn disarm_and_take(&self) -> Vec<f32> {
        let mut state = self.state();
        state.armed = false;
        std::mem::take(&mut state.samples)
    }

    pub fn is_armed(&self) -> bool {
        self.state().armed
    }

    pub fn len(&self) -> usize {
        self.state().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the most recent `n` samples (fewer if not yet available).
    pub fn tail(&self, n: usize) -> Vec<f32> {
        let state = self.state();
        let start = state.samples.len().saturating_sub(n);
        state.samples[start..].to_vec()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
