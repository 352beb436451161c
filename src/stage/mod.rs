//! Stage engines.
//!
//! Every stage implements [`StageEngine`]: fetch its units, work out where
//! to resume, then run an event loop that races applicant actions against
//! its countdowns until the stage completes.  The orchestrator selects a
//! variant through the tagged [`Stage`] enum:
//!
//! | stage                 | variant                          |
//! |-----------------------|----------------------------------|
//! | listening             | [`AudioResponseStage`]           |
//! | speech                | [`InterviewStage`]               |
//! | written, personality  | [`TimedFormStage`]               |
//! | typing                | [`TypingStage`]                  |
//!
//! A unit counts as answered as soon as it is *attempted* (recording
//! started, form committed).  Submits are fire-and-forget; a failed submit is
//! surfaced as a banner and never re-opens the unit.

pub mod audio_response;
pub mod event;
pub mod interview;
pub mod resume;
pub mod timed_form;
pub mod types;
pub mod typing;

mod capture_flow;
mod load;
mod submit;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, TimerConfig};
use crate::progress::{ProgressError, ProgressService, StageProgress};
use crate::recording::Recorder;
use crate::session::SessionContext;

pub use audio_response::AudioResponseStage;
pub use event::{CompletionReason, StageEvent, UserAction};
pub use interview::InterviewStage;
pub use resume::ResumePoint;
pub use timed_form::TimedFormStage;
pub use types::{Answer, AnswerValue, InputSpec, StageId, StageKind, Unit, UnitId};
pub use typing::TypingStage;

// ---------------------------------------------------------------------------
// Outcome / error
// ---------------------------------------------------------------------------

/// Summary of a completed stage run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: StageId,
    pub reason: CompletionReason,
    /// Units answered (attempted) as of completion.
    pub answered: usize,
    pub total: usize,
    /// Submissions dispatched during this run.
    pub dispatched: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(StageReport),
    /// The action channel closed before the stage finished.
    Abandoned,
}

/// Failures a stage cannot absorb on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("session was lost during the {0} stage")]
    SessionLost(StageId),
}

// ---------------------------------------------------------------------------
// StageContext
// ---------------------------------------------------------------------------

/// Everything a stage run needs, injected by the orchestrator.
#[derive(Clone)]
pub struct StageContext {
    pub session: SessionContext,
    pub progress: Arc<dyn ProgressService>,
    pub recorder: Arc<Recorder>,
    pub config: Arc<AppConfig>,
    pub events: mpsc::UnboundedSender<StageEvent>,
}

impl StageContext {
    pub fn emit(&self, event: StageEvent) {
        // The receiver goes away when the UI does; nothing to do then.
        let _ = self.events.send(event);
    }

    pub fn reject(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!("stage: action rejected: {reason}");
        self.emit(StageEvent::Rejected { reason });
    }
}

// ---------------------------------------------------------------------------
// StageEngine
// ---------------------------------------------------------------------------

/// The capability set shared by all stage variants.
#[async_trait]
pub trait StageEngine: Send + Sync {
    fn stage(&self) -> StageId;

    /// Ordered units for this stage.
    async fn fetch_units(&self, ctx: &StageContext) -> Result<Vec<Unit>, ProgressError> {
        ctx.progress.fetch_units(&ctx.session, self.stage()).await
    }

    /// Where to pick up given the server's view of the stage.
    fn resume_index(&self, units: &[Unit], progress: &StageProgress) -> ResumePoint {
        resume::first_unanswered(units, progress)
    }

    /// Drive the stage to completion.
    async fn run(
        &mut self,
        ctx: &StageContext,
        actions: &mut mpsc::UnboundedReceiver<UserAction>,
    ) -> Result<StageOutcome, StageError>;
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A stage engine selected by stage-type tag.
pub enum Stage {
    AudioResponse(AudioResponseStage),
    Interview(InterviewStage),
    TimedForm(TimedFormStage),
    Typing(TypingStage),
}

impl Stage {
    /// Build the engine for `id` with durations from `timers`.
    pub fn for_stage(id: StageId, timers: &TimerConfig) -> Self {
        match id.kind() {
            StageKind::AudioResponse => Stage::AudioResponse(AudioResponseStage::new(
                id,
                timers.listening_unit_secs,
                timers.listening_session_secs,
            )),
            StageKind::Interview => Stage::Interview(InterviewStage::new(
                id,
                timers.interview_unit_secs,
                timers.interview_session_secs,
            )),
            StageKind::TimedForm => {
                let secs = if id == StageId::Personality {
                    timers.personality_secs
                } else {
                    timers.written_secs
                };
                Stage::TimedForm(TimedFormStage::new(id, secs))
            }
            StageKind::Typing => Stage::Typing(TypingStage::new(id, timers.typing_secs)),
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Stage::AudioResponse(_) => StageKind::AudioResponse,
            Stage::Interview(_) => StageKind::Interview,
            Stage::TimedForm(_) => StageKind::TimedForm,
            Stage::Typing(_) => StageKind::Typing,
        }
    }

    fn engine(&self) -> &dyn StageEngine {
        match self {
            Stage::AudioResponse(s) => s,
            Stage::Interview(s) => s,
            Stage::TimedForm(s) => s,
            Stage::Typing(s) => s,
        }
    }

    fn engine_mut(&mut self) -> &mut dyn StageEngine {
        match self {
            Stage::AudioResponse(s) => s,
            Stage::Interview(s) => s,
            Stage::TimedForm(s) => s,
            Stage::Typing(s) => s,
        }
    }

    pub fn id(&self) -> StageId {
        self.engine().stage()
    }

    pub async fn run(
        &mut self,
        ctx: &StageContext,
        actions: &mut mpsc::UnboundedReceiver<UserAction>,
    ) -> Result<StageOutcome, StageError> {
        self.engine_mut().run(ctx, actions).await
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Auxiliary tasks of one stage run (stimulus lookups, narration).
/// Aborted when the run ends so late results never reach a finished stage.
#[derive(Default)]
pub(crate) struct TaskGroup(Vec<JoinHandle<()>>);

impl TaskGroup {
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.0.retain(|h| !h.is_finished());
        self.0.push(tokio::spawn(fut));
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
