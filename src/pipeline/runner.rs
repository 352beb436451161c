//! Pipeline orchestrator: drives the assessment stage by stage.
//!
//! [`PipelineOrchestrator`] owns the [`SharedState`] and runs one stage
//! engine at a time, feeding it applicant actions from a
//! `tokio::sync::mpsc` channel.
//!
//! # Pipeline flow
//!
//! ```text
//! initialize
//!   └─▶ completion_status → first incomplete stage         [Stage(id)]
//!
//! Stage(id)
//!   └─▶ Stage::for_stage(id).run(actions)
//!         ├─ Completed → mark_stage_complete → next stage  [Stage(next)]
//!         │                                  └─ none left  [Finalizing]
//!         ├─ Abandoned → stop; the server resumes us later
//!         └─ SessionLost                                    [Error]
//!
//! Finalizing
//!   └─▶ finalize                                            [Done]
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use super::state::{lock_state, PipelineState, SharedState};
use crate::config::AppConfig;
use crate::progress::{ProgressError, ProgressService};
use crate::recording::Recorder;
use crate::session::{Session, SessionContext};
use crate::stage::{
    Stage, StageContext, StageError, StageEvent, StageId, StageOutcome, StageReport, UserAction,
};

/// Attempts at the finalize call before giving up.
const FINALIZE_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("the assessment session is no longer known to the server")]
    SessionLost,

    #[error("could not finish the evaluation: {0}")]
    Finalize(ProgressError),
}

impl From<StageError> for PipelineError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::SessionLost(_) => PipelineError::SessionLost,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Progress notifications for a presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageEntered(StageId),
    /// Something the live stage reported.
    Stage { stage: StageId, event: StageEvent },
    StageCompleted(StageReport),
    Finalizing,
    Finished,
    Failed(String),
}

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

/// Sequences the stages of one assessment session.
pub struct PipelineOrchestrator {
    state: SharedState,
    progress: Arc<dyn ProgressService>,
    recorder: Arc<Recorder>,
    config: Arc<AppConfig>,
    order: Vec<StageId>,
    /// Stages known complete, from the server or this run.
    completed: BTreeSet<StageId>,
    finalized: bool,
}

impl PipelineOrchestrator {
    pub fn new(
        state: SharedState,
        progress: Arc<dyn ProgressService>,
        recorder: Arc<Recorder>,
        config: Arc<AppConfig>,
    ) -> Self {
        let mut order = vec![
            StageId::Listening,
            StageId::Written,
            StageId::Speech,
            StageId::Typing,
        ];
        if config.pipeline.include_personality {
            order.push(StageId::Personality);
        }

        Self {
            state,
            progress,
            recorder,
            config,
            order,
            completed: BTreeSet::new(),
            finalized: false,
        }
    }

    /// The fixed stage order for this run.
    pub fn stage_order(&self) -> &[StageId] {
        &self.order
    }

    pub fn state(&self) -> PipelineState {
        lock_state(&self.state).pipeline
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Ask the server where to resume and enter that stage.
    pub async fn initialize(&mut self, session: &Session) -> Result<PipelineState, PipelineError> {
        {
            let mut st = lock_state(&self.state);
            st.pipeline = PipelineState::Loading;
            st.session_id = Some(session.id().to_owned());
        }

        match self.progress.completion_status(session).await {
            Ok(status) => {
                self.completed
                    .extend(self.order.iter().copied().filter(|s| status.is_complete(*s)));
            }
            Err(ProgressError::SessionLost) => return Err(self.fail(PipelineError::SessionLost)),
            Err(e) => {
                // Stages re-check their own progress on entry.
                log::warn!("pipeline: completion status unavailable ({e}); starting from the first stage");
            }
        }

        let next = self.next_state();
        log::info!(
            "pipeline: session {} resumes at {}",
            session.id(),
            next.label()
        );
        self.set_pipeline(next);
        Ok(next)
    }

    /// Record `stage` as complete on the server and move past it.
    pub async fn on_stage_complete(
        &mut self,
        session: &Session,
        stage: StageId,
    ) -> Result<PipelineState, PipelineError> {
        if self.completed.contains(&stage) {
            log::debug!("pipeline: {stage} already marked complete");
        } else {
            match self.progress.mark_stage_complete(session, stage).await {
                Ok(()) => log::info!("pipeline: {stage} marked complete"),
                Err(ProgressError::SessionLost) => {
                    return Err(self.fail(PipelineError::SessionLost))
                }
                Err(e) => {
                    // The stage's own progress query fast-forwards it next time.
                    log::warn!("pipeline: marking {stage} complete failed ({e}); continuing");
                }
            }
            self.completed.insert(stage);
        }

        let next = self.next_state();
        self.set_pipeline(next);
        Ok(next)
    }

    /// Finish the evaluation.  Finalizing an already finalized session is a
    /// no-op.
    pub async fn finalize(&mut self, session: &Session) -> Result<PipelineState, PipelineError> {
        if self.finalized {
            log::debug!("pipeline: session {} already finalized", session.id());
            self.set_pipeline(PipelineState::Done);
            return Ok(PipelineState::Done);
        }
        self.set_pipeline(PipelineState::Finalizing);

        let mut attempt = 0;
        loop {
            match self.progress.finalize(session).await {
                Ok(()) => break,
                Err(ProgressError::SessionLost) => {
                    return Err(self.fail(PipelineError::SessionLost))
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= FINALIZE_ATTEMPTS {
                        return Err(self.fail(PipelineError::Finalize(e)));
                    }
                    let delay = self.config.api.backoff(attempt - 1);
                    log::warn!("pipeline: finalize failed ({e}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        log::info!("pipeline: session {} finalized", session.id());
        self.finalized = true;
        self.set_pipeline(PipelineState::Done);
        Ok(PipelineState::Done)
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run the assessment until it is done, abandoned or the session is lost.
    ///
    /// `actions` carries applicant input for whichever stage is live;
    /// closing it abandons the current stage and returns `Ok(())` with the
    /// state left at that stage.
    pub async fn run(
        mut self,
        session: SessionContext,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Result<(), PipelineError> {
        let mut next = match self.initialize(&session).await {
            Ok(next) => next,
            Err(e) => {
                self.publish(&events, PipelineEvent::Failed(e.to_string()));
                return Err(e);
            }
        };

        loop {
            let result = match next {
                PipelineState::Stage(stage) => {
                    match self.run_stage(&session, stage, &mut actions, &events).await {
                        Ok(Some(state)) => Ok(state),
                        Ok(None) => return Ok(()),
                        Err(e) => Err(e),
                    }
                }
                PipelineState::Finalizing => {
                    self.publish(&events, PipelineEvent::Finalizing);
                    self.finalize(&session).await
                }
                PipelineState::Done => {
                    self.publish(&events, PipelineEvent::Finished);
                    return Ok(());
                }
                PipelineState::Loading | PipelineState::Error => return Ok(()),
            };

            next = match result {
                Ok(state) => state,
                Err(e) => {
                    self.publish(&events, PipelineEvent::Failed(e.to_string()));
                    return Err(e);
                }
            };
        }
    }

    /// Run one stage.  `Ok(None)` when the applicant went away.
    async fn run_stage(
        &mut self,
        session: &SessionContext,
        stage: StageId,
        actions: &mut mpsc::UnboundedReceiver<UserAction>,
        events: &mpsc::UnboundedSender<PipelineEvent>,
    ) -> Result<Option<PipelineState>, PipelineError> {
        log::info!("pipeline: entering {stage}");
        self.publish(events, PipelineEvent::StageEntered(stage));

        let (stage_tx, mut stage_rx) = mpsc::unbounded_channel();
        let ctx = StageContext {
            session: Arc::clone(session),
            progress: Arc::clone(&self.progress),
            recorder: Arc::clone(&self.recorder),
            config: Arc::clone(&self.config),
            events: stage_tx,
        };
        let mut engine = Stage::for_stage(stage, &self.config.timers);

        let outcome = {
            let run = engine.run(&ctx, actions);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    biased;

                    Some(event) = stage_rx.recv() => self.publish(events, PipelineEvent::Stage { stage, event }),
                    outcome = &mut run => break outcome,
                }
            }
        };
        while let Ok(event) = stage_rx.try_recv() {
            self.publish(events, PipelineEvent::Stage { stage, event });
        }

        let report = match outcome {
            Ok(StageOutcome::Completed(report)) => report,
            Ok(StageOutcome::Abandoned) => {
                log::info!("pipeline: {stage} abandoned; will resume there");
                return Ok(None);
            }
            Err(e) => return Err(self.fail(e.into())),
        };
        self.publish(events, PipelineEvent::StageCompleted(report));

        // Input aimed at the finished stage must not leak into the next one.
        let mut stale = 0usize;
        while actions.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            log::debug!("pipeline: dropped {stale} stale actions after {stage}");
        }

        self.on_stage_complete(session, stage).await.map(Some)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn next_state(&self) -> PipelineState {
        self.order
            .iter()
            .copied()
            .find(|s| !self.completed.contains(s))
            .map_or(PipelineState::Finalizing, PipelineState::Stage)
    }

    fn set_pipeline(&self, state: PipelineState) {
        lock_state(&self.state).pipeline = state;
    }

    fn fail(&self, err: PipelineError) -> PipelineError {
        log::error!("pipeline error: {err}");
        let mut st = lock_state(&self.state);
        st.pipeline = PipelineState::Error;
        st.error_message = Some(err.to_string());
        err
    }

    fn publish(&self, events: &mpsc::UnboundedSender<PipelineEvent>, event: PipelineEvent) {
        lock_state(&self.state).apply(&event);
        let _ = events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
