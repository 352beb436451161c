//! Stage entry: progress query, unit fetch and resume decision.

use std::collections::BTreeSet;

use tokio::sync::mpsc;

use super::resume::ResumePoint;
use super::{
    CompletionReason, StageContext, StageEngine, StageError, StageEvent, StageOutcome,
    StageReport, Unit, UnitId, UserAction,
};
use crate::progress::ProgressError;

pub(crate) enum Loaded {
    Ready {
        units: Vec<Unit>,
        resume_at: usize,
        /// Units the server already lists as answered.
        answered: BTreeSet<UnitId>,
    },
    /// Nothing to run; the outcome is final.
    Finished(StageOutcome),
}

/// Load the stage, retrying transient failures with backoff until it works,
/// the session is lost, or the applicant goes away.
pub(crate) async fn load<E: StageEngine + ?Sized>(
    engine: &E,
    ctx: &StageContext,
    actions: &mut mpsc::UnboundedReceiver<UserAction>,
) -> Result<Loaded, StageError> {
    let stage = engine.stage();
    let mut attempt = 0u32;

    loop {
        let err = match fetch(engine, ctx).await {
            Ok(loaded) => return Ok(loaded),
            Err(ProgressError::SessionLost) => return Err(StageError::SessionLost(stage)),
            Err(e) => e,
        };

        let delay = ctx.config.api.backoff(attempt);
        attempt = attempt.saturating_add(1);
        log::warn!("stage: loading {stage} failed (attempt {attempt}): {err}; retrying in {delay:?}");
        ctx.emit(StageEvent::Banner(format!(
            "Could not load the {stage} test ({err}). Retrying…"
        )));

        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => break,
                action = actions.recv() => match action {
                    None => return Ok(Loaded::Finished(StageOutcome::Abandoned)),
                    Some(action) => log::debug!("stage: ignoring {action:?} while loading"),
                },
            }
        }
    }
}

async fn fetch<E: StageEngine + ?Sized>(
    engine: &E,
    ctx: &StageContext,
) -> Result<Loaded, ProgressError> {
    let stage = engine.stage();
    let progress = ctx.progress.stage_progress(&ctx.session, stage).await?;
    if progress.completed {
        log::info!("stage: server reports {stage} already complete; fast-forwarding");
        return Ok(skipped(engine, CompletionReason::ServerComplete, progress.total_units));
    }

    let units = engine.fetch_units(ctx).await?;
    match engine.resume_index(&units, &progress) {
        ResumePoint::At(resume_at) => {
            log::info!(
                "stage: {stage} resuming at unit {} of {}",
                resume_at + 1,
                units.len()
            );
            Ok(Loaded::Ready {
                units,
                resume_at,
                answered: progress.answered_unit_ids,
            })
        }
        ResumePoint::Complete => {
            log::info!("stage: {stage} has no unanswered units");
            Ok(skipped(engine, CompletionReason::NothingLeft, units.len()))
        }
    }
}

fn skipped<E: StageEngine + ?Sized>(engine: &E, reason: CompletionReason, total: usize) -> Loaded {
    Loaded::Finished(StageOutcome::Completed(StageReport {
        stage: engine.stage(),
        reason,
        answered: total,
        total,
        dispatched: 0,
    }))
}
