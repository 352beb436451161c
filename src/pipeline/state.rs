//! Pipeline state machine and the shared assessment state.
//!
//! [`PipelineState`] is the orchestrator's position in the assessment.  A
//! presentation layer reads it, along with the live stage's last unit,
//! countdowns and waveform, through [`SharedState`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::runner::PipelineEvent;
use crate::stage::{StageEvent, StageId, StageReport, Unit};
use crate::timer::TimerScope;

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// Where the assessment is.
///
/// ```text
/// Loading ──status──▶ Stage(first incomplete) ──complete──▶ Stage(next) … ──▶ Finalizing ──▶ Done
/// Loading ──all complete──▶ Finalizing
/// any state ──session lost──▶ Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Asking the server where to resume.
    #[default]
    Loading,

    /// A stage engine is running.
    Stage(StageId),

    /// Every stage is complete; finishing the evaluation.
    Finalizing,

    Done,

    /// The session is gone.  Nothing further can be submitted.
    Error,
}

impl PipelineState {
    /// Returns `true` while the orchestrator still has work to do.
    ///
    /// ```
    /// use assessment_runner::pipeline::PipelineState;
    /// use assessment_runner::stage::StageId;
    ///
    /// assert!(PipelineState::Loading.is_busy());
    /// assert!(PipelineState::Stage(StageId::Typing).is_busy());
    /// assert!(!PipelineState::Done.is_busy());
    /// assert!(!PipelineState::Error.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            PipelineState::Loading | PipelineState::Stage(_) | PipelineState::Finalizing
        )
    }

    /// A short label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Loading => "Loading",
            PipelineState::Stage(StageId::Listening) => "Listening test",
            PipelineState::Stage(StageId::Written) => "Written test",
            PipelineState::Stage(StageId::Speech) => "Speech interview",
            PipelineState::Stage(StageId::Typing) => "Typing test",
            PipelineState::Stage(StageId::Personality) => "Personality test",
            PipelineState::Finalizing => "Finishing",
            PipelineState::Done => "Done",
            PipelineState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// AssessmentState
// ---------------------------------------------------------------------------

/// Everything a presentation layer needs, mirrored from [`PipelineEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct AssessmentState {
    pub pipeline: PipelineState,

    pub session_id: Option<String>,

    /// The unit currently on screen and its index within the stage.
    pub unit: Option<(usize, Unit)>,

    /// Last reported seconds left per running countdown.
    pub countdowns: BTreeMap<TimerScope, u32>,

    pub recording: bool,

    /// Latest waveform frame while recording; empty otherwise.
    pub waveform: Vec<f32>,

    /// Non-blocking notice (network retry, failed submit, device trouble).
    pub banner: Option<String>,

    /// Set when `pipeline == PipelineState::Error`.
    pub error_message: Option<String>,

    /// Reports of the stages completed during this run, in order.
    pub reports: Vec<StageReport>,
}

impl AssessmentState {
    /// Fold one pipeline event into the mirror.
    pub fn apply(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageEntered(stage) => {
                self.pipeline = PipelineState::Stage(*stage);
                self.unit = None;
                self.countdowns.clear();
                self.recording = false;
                self.waveform.clear();
                self.banner = None;
            }
            PipelineEvent::Stage { event, .. } => self.apply_stage(event),
            PipelineEvent::StageCompleted(report) => {
                self.countdowns.clear();
                self.recording = false;
                self.waveform.clear();
                self.reports.push(report.clone());
            }
            PipelineEvent::Finalizing => self.pipeline = PipelineState::Finalizing,
            PipelineEvent::Finished => self.pipeline = PipelineState::Done,
            PipelineEvent::Failed(message) => {
                self.pipeline = PipelineState::Error;
                self.error_message = Some(message.clone());
            }
        }
    }

    fn apply_stage(&mut self, event: &StageEvent) {
        match event {
            StageEvent::UnitPresented { index, unit } => {
                self.unit = Some((*index, unit.clone()));
                self.banner = None;
            }
            StageEvent::CaptureStarted { .. } => self.recording = true,
            StageEvent::CaptureStopped { .. } => {
                self.recording = false;
                self.waveform.clear();
            }
            StageEvent::Waveform(frame) => {
                if self.recording {
                    self.waveform.clone_from(&frame.bars);
                }
            }
            StageEvent::Tick { scope, remaining } => {
                self.countdowns.insert(*scope, *remaining);
            }
            StageEvent::TimeUp { scope } => {
                self.countdowns.insert(*scope, 0);
            }
            StageEvent::Banner(message) => self.banner = Some(message.clone()),
            StageEvent::SubmitFailed { label, message } => {
                self.banner = Some(format!("Could not save the {label}: {message}"));
            }
            StageEvent::DeviceFailed(e) => {
                self.banner = Some(format!("Microphone problem: {e}"));
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`AssessmentState`].
///
/// Lock with [`lock_state`] for a short critical section; do **not** hold the
/// lock across `.await` points.
pub type SharedState = Arc<Mutex<AssessmentState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(AssessmentState::default()))
}

/// Lock `state`, recovering the data if a previous holder panicked.
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, AssessmentState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::WaveformData;
    use crate::stage::{CompletionReason, InputSpec, UnitId};

    fn unit() -> Unit {
        Unit {
            id: UnitId::from("q1"),
            prompt: "Describe your last job".into(),
            media: None,
            input: InputSpec::AudioCapture,
            ordinal: 0,
        }
    }

    fn stage_event(event: StageEvent) -> PipelineEvent {
        PipelineEvent::Stage {
            stage: StageId::Speech,
            event,
        }
    }

    #[test]
    fn default_is_loading() {
        let state = AssessmentState::default();
        assert_eq!(state.pipeline, PipelineState::Loading);
        assert!(state.unit.is_none());
        assert!(state.reports.is_empty());
    }

    #[test]
    fn labels_name_the_stage() {
        assert_eq!(
            PipelineState::Stage(StageId::Speech).label(),
            "Speech interview"
        );
        assert_eq!(PipelineState::Finalizing.label(), "Finishing");
    }

    #[test]
    fn waveform_is_mirrored_only_while_recording() {
        let mut state = AssessmentState::default();
        state.apply(&PipelineEvent::StageEntered(StageId::Speech));
        state.apply(&stage_event(StageEvent::Waveform(WaveformData {
            bars: vec![0.5; 4],
        })));
        assert!(state.waveform.is_empty());

        state.apply(&stage_event(StageEvent::CaptureStarted { index: 0 }));
        state.apply(&stage_event(StageEvent::Waveform(WaveformData {
            bars: vec![0.5; 4],
        })));
        assert_eq!(state.waveform.len(), 4);

        state.apply(&stage_event(StageEvent::CaptureStopped {
            index: 0,
            duration_secs: 1.0,
        }));
        assert!(!state.recording);
        assert!(state.waveform.is_empty());
    }

    #[test]
    fn stage_lifecycle_is_mirrored() {
        let mut state = AssessmentState::default();
        state.apply(&PipelineEvent::StageEntered(StageId::Speech));
        state.apply(&stage_event(StageEvent::UnitPresented {
            index: 0,
            unit: unit(),
        }));
        state.apply(&stage_event(StageEvent::Tick {
            scope: TimerScope::Session,
            remaining: 899,
        }));
        state.apply(&stage_event(StageEvent::Banner("retrying".into())));

        assert_eq!(state.pipeline, PipelineState::Stage(StageId::Speech));
        assert_eq!(state.unit.as_ref().map(|(i, _)| *i), Some(0));
        assert_eq!(state.countdowns.get(&TimerScope::Session), Some(&899));
        assert_eq!(state.banner.as_deref(), Some("retrying"));

        state.apply(&PipelineEvent::StageCompleted(StageReport {
            stage: StageId::Speech,
            reason: CompletionReason::Voluntary,
            answered: 1,
            total: 1,
            dispatched: 1,
        }));
        assert!(state.countdowns.is_empty());
        assert_eq!(state.reports.len(), 1);

        state.apply(&PipelineEvent::Failed("session lost".into()));
        assert_eq!(state.pipeline, PipelineState::Error);
        assert!(!state.pipeline.is_busy());
    }

    #[test]
    fn shared_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedState>();
    }
}
