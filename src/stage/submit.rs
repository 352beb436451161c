//! Fire-and-forget unit submission.
//!
//! A submit is dispatched on its own task and reports back over a channel
//! the stage loop polls.  Once the stage has finished the receiver is gone
//! and a late result is simply dropped; the upload itself still completes.

use tokio::sync::mpsc;

use super::{StageContext, StageError, StageEvent, StageId};
use crate::progress::{ProgressError, SubmitAck, UnitSubmission};

pub(crate) struct SubmitResult {
    label: String,
    result: Result<SubmitAck, ProgressError>,
}

pub(crate) struct SubmitTracker {
    stage: StageId,
    tx: mpsc::UnboundedSender<SubmitResult>,
    dispatched: usize,
}

impl SubmitTracker {
    pub fn new(stage: StageId) -> (Self, mpsc::UnboundedReceiver<SubmitResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            stage,
            tx,
            dispatched: 0,
        };
        (tracker, rx)
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Dispatch `submission` without waiting for the server.
    pub fn submit_unit(&mut self, ctx: &StageContext, submission: UnitSubmission) {
        self.dispatched += 1;

        let label = submission.label();
        log::info!("stage: submitting {label} for {}", self.stage);
        ctx.emit(StageEvent::SubmitDispatched {
            label: label.clone(),
        });

        let progress = ctx.progress.clone();
        let session = ctx.session.clone();
        let stage = self.stage;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = progress.submit_unit(&session, stage, submission).await;
            let _ = tx.send(SubmitResult { label, result });
        });
    }

    /// Absorb a submit result.  Only session loss escapes.
    pub fn settle(&self, ctx: &StageContext, done: SubmitResult) -> Result<(), StageError> {
        match done.result {
            Ok(_) => {
                log::debug!("stage: {} accepted", done.label);
                Ok(())
            }
            Err(ProgressError::SessionLost) => Err(StageError::SessionLost(self.stage)),
            Err(e) => {
                log::warn!("stage: submitting {} failed: {e}", done.label);
                ctx.emit(StageEvent::SubmitFailed {
                    label: done.label,
                    message: e.to_string(),
                });
                Ok(())
            }
        }
    }
}
