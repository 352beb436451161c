//! Typing test: one passage, one stage clock, one submission.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::load::{load, Loaded};
use super::submit::SubmitTracker;
use super::{
    CompletionReason, InputSpec, StageContext, StageEngine, StageError, StageEvent, StageId,
    StageOutcome, StageReport, Unit, UserAction,
};
use crate::progress::UnitSubmission;
use crate::timer::{TimerScope, TimerSet, TimerSignal};

pub struct TypingStage {
    stage: StageId,
    duration_secs: u32,
}

impl TypingStage {
    pub fn new(stage: StageId, duration_secs: u32) -> Self {
        Self {
            stage,
            duration_secs,
        }
    }
}

/// Percentage (0-100, rounded) of typed words that match the passage word
/// at the same position.
///
/// ```
/// use assessment_runner::stage::typing::accuracy;
/// assert_eq!(accuracy("the quick brown fox", "the quick brwn fox"), 75);
/// ```
pub fn accuracy(expected: &str, typed: &str) -> u32 {
    let typed: Vec<&str> = typed.split_whitespace().collect();
    if typed.is_empty() {
        return 0;
    }
    let matching = expected
        .split_whitespace()
        .zip(&typed)
        .filter(|(want, got)| want == *got)
        .count();
    ((matching as f64 / typed.len() as f64) * 100.0).round() as u32
}

/// Typed words per minute, rounded to two decimals.
pub fn words_per_minute(typed: &str, secs: u32) -> f64 {
    if secs == 0 {
        return 0.0;
    }
    let words = typed.split_whitespace().count() as f64;
    (words / (f64::from(secs) / 60.0) * 100.0).round() / 100.0
}

#[async_trait]
impl StageEngine for TypingStage {
    fn stage(&self) -> StageId {
        self.stage
    }

    async fn run(
        &mut self,
        ctx: &StageContext,
        actions: &mut mpsc::UnboundedReceiver<UserAction>,
    ) -> Result<StageOutcome, StageError> {
        let (unit, resume_at) = match load(&*self, ctx, actions).await? {
            Loaded::Ready {
                mut units,
                resume_at,
                ..
            } if resume_at < units.len() => (units.swap_remove(resume_at), resume_at),
            Loaded::Ready { .. } => {
                return Ok(StageOutcome::Completed(StageReport {
                    stage: self.stage,
                    reason: CompletionReason::NothingLeft,
                    answered: 0,
                    total: 0,
                    dispatched: 0,
                }))
            }
            Loaded::Finished(outcome) => return Ok(outcome),
        };

        let (timers, mut timer_rx) = TimerSet::new();
        let (submits, mut submit_rx) = SubmitTracker::new(self.stage);
        let mut typing = TypingRun {
            stage: self.stage,
            duration_secs: self.duration_secs,
            ctx,
            unit,
            resume_at,
            text: String::new(),
            started_at: None,
            timers,
            submits,
        };
        ctx.emit(StageEvent::Loaded {
            total: 1,
            resume_at: 0,
        });

        loop {
            tokio::select! {
                biased;

                Some(signal) = timer_rx.recv() => {
                    if let Some(outcome) = typing.on_timer(signal, &mut timer_rx).await {
                        return Ok(outcome);
                    }
                }
                Some(done) = submit_rx.recv() => typing.submits.settle(ctx, done)?,
                action = actions.recv() => match action {
                    None => {
                        log::info!("stage: {} abandoned", self.stage);
                        return Ok(StageOutcome::Abandoned);
                    }
                    Some(action) => {
                        if let Some(outcome) = typing.on_action(action) {
                            return Ok(outcome);
                        }
                    }
                },
            }
        }
    }
}

struct TypingRun<'a> {
    stage: StageId,
    duration_secs: u32,
    ctx: &'a StageContext,
    unit: Unit,
    resume_at: usize,
    text: String,
    started_at: Option<Instant>,
    timers: TimerSet,
    submits: SubmitTracker,
}

impl TypingRun<'_> {
    fn passage(&self) -> &str {
        match &self.unit.input {
            InputSpec::Passage { text } => text,
            _ => &self.unit.prompt,
        }
    }

    fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    async fn on_timer(
        &mut self,
        signal: TimerSignal,
        rx: &mut mpsc::UnboundedReceiver<TimerSignal>,
    ) -> Option<StageOutcome> {
        match signal {
            TimerSignal::Tick {
                scope,
                timer,
                remaining,
            } => {
                if self.timers.is_current(scope, timer) {
                    self.ctx.emit(StageEvent::Tick { scope, remaining });
                }
                None
            }
            TimerSignal::Expired { scope, timer } => {
                match self.timers.resolve(scope, timer, rx).await {
                    Some(TimerScope::Stage) => {
                        self.ctx.emit(StageEvent::TimeUp {
                            scope: TimerScope::Stage,
                        });
                        Some(self.finish(
                            CompletionReason::Forced(TimerScope::Stage),
                            self.duration_secs,
                        ))
                    }
                    _ => None,
                }
            }
        }
    }

    fn on_action(&mut self, action: UserAction) -> Option<StageOutcome> {
        match action {
            UserAction::Begin if self.is_active() => self.ctx.reject("the test is already running"),
            UserAction::Begin => {
                log::info!("stage: {} started ({} s)", self.stage, self.duration_secs);
                self.started_at = Some(Instant::now());
                self.timers.start(TimerScope::Stage, self.duration_secs);
                self.ctx.emit(StageEvent::UnitPresented {
                    index: self.resume_at,
                    unit: self.unit.clone(),
                });
            }
            UserAction::Type(text) => {
                if self.is_active() {
                    self.text = text;
                } else {
                    log::debug!("stage: typing ignored before the test starts");
                }
            }
            UserAction::CompleteEarly | UserAction::Submit => {
                if !self.is_active() {
                    self.ctx.reject("the test has not started yet");
                } else if self.text.trim().is_empty() {
                    self.ctx.reject("type some text before finishing");
                } else {
                    let elapsed = self
                        .started_at
                        .map(|t| t.elapsed().as_secs())
                        .unwrap_or_default();
                    let secs = u32::try_from(elapsed)
                        .unwrap_or(u32::MAX)
                        .clamp(1, self.duration_secs.max(1));
                    return Some(self.finish(CompletionReason::Voluntary, secs));
                }
            }
            other => self
                .ctx
                .reject(format!("{other:?} is not available in this test")),
        }
        None
    }

    fn finish(&mut self, reason: CompletionReason, time_taken_secs: u32) -> StageOutcome {
        self.timers.cancel_all();
        let accuracy = accuracy(self.passage(), &self.text);
        let wpm = words_per_minute(&self.text, time_taken_secs);
        log::info!(
            "stage: {} finished ({reason:?}) in {time_taken_secs} s: {accuracy}% accuracy, {wpm} wpm",
            self.stage
        );

        // Expiry submits whatever exists, even nothing.
        let answered = if self.text.trim().is_empty() {
            log::warn!("stage: {} ended with nothing typed", self.stage);
            0
        } else {
            1
        };
        self.submits.submit_unit(
            self.ctx,
            UnitSubmission::Typing {
                unit_id: self.unit.id.clone(),
                typed_text: std::mem::take(&mut self.text),
                time_taken_secs,
                accuracy,
                wpm,
            },
        );

        StageOutcome::Completed(StageReport {
            stage: self.stage,
            reason,
            answered,
            total: 1,
            dispatched: self.submits.dispatched(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
