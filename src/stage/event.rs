//! What flows into and out of a running stage.

use serde::Serialize;

use super::types::{AnswerValue, Unit, UnitId};
use crate::recording::{DeviceError, WaveformData};
use crate::timer::TimerScope;

/// An applicant action delivered to the live stage.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// Start the stage clock (timed forms, typing).
    Begin,
    /// Request the current unit's stimulus audio.
    PlayStimulus,
    StartCapture,
    StopCapture,
    NextUnit,
    Answer { unit_id: UnitId, value: AnswerValue },
    GoTo(usize),
    /// Voluntary submission of the whole stage.
    Submit,
    /// Full current contents of the typing box.
    Type(String),
    CompleteEarly,
}

/// Something the presentation layer should reflect.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    Loaded {
        total: usize,
        resume_at: usize,
    },
    UnitPresented {
        index: usize,
        unit: Unit,
    },
    StimulusReady {
        index: usize,
        url: String,
    },
    CaptureStarted {
        index: usize,
    },
    CaptureStopped {
        index: usize,
        duration_secs: f32,
    },
    Waveform(WaveformData),
    Tick {
        scope: TimerScope,
        remaining: u32,
    },
    TimeUp {
        scope: TimerScope,
    },
    FormAnswered {
        answered: usize,
        total: usize,
    },
    SubmitDispatched {
        label: String,
    },
    SubmitFailed {
        label: String,
        message: String,
    },
    DeviceFailed(DeviceError),
    /// An action that is not allowed right now.
    Rejected {
        reason: String,
    },
    /// Non-blocking notice, e.g. a network retry.
    Banner(String),
}

/// Why a stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The applicant finished or submitted.
    Voluntary,
    /// A countdown ran out.
    Forced(TimerScope),
    /// The server already had the stage complete.
    ServerComplete,
    /// Every unit was already answered, or there were none.
    NothingLeft,
}
