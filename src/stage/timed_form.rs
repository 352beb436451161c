//! Timed multi-question form (written and personality stages).
//!
//! Answers are held locally until a single commit of the whole form.  The
//! applicant can move freely between questions and change answers while the
//! stage clock runs; voluntary submission needs every question answered, the
//! clock running out commits whatever is held.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::load::{load, Loaded};
use super::submit::SubmitTracker;
use super::{
    Answer, AnswerValue, CompletionReason, StageContext, StageEngine, StageError, StageEvent,
    StageId, StageOutcome, StageReport, Unit, UnitId, UserAction,
};
use crate::progress::UnitSubmission;
use crate::timer::{TimerScope, TimerSet, TimerSignal};

pub struct TimedFormStage {
    stage: StageId,
    duration_secs: u32,
}

impl TimedFormStage {
    pub fn new(stage: StageId, duration_secs: u32) -> Self {
        Self {
            stage,
            duration_secs,
        }
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }
}

#[async_trait]
impl StageEngine for TimedFormStage {
    fn stage(&self) -> StageId {
        self.stage
    }

    async fn run(
        &mut self,
        ctx: &StageContext,
        actions: &mut mpsc::UnboundedReceiver<UserAction>,
    ) -> Result<StageOutcome, StageError> {
        let (units, resume_at) = match load(&*self, ctx, actions).await? {
            Loaded::Ready {
                units, resume_at, ..
            } => (units, resume_at),
            Loaded::Finished(outcome) => return Ok(outcome),
        };

        let (timers, mut timer_rx) = TimerSet::new();
        let (submits, mut submit_rx) = SubmitTracker::new(self.stage);
        let mut form = FormRun {
            stage: self.stage,
            duration_secs: self.duration_secs,
            ctx,
            units,
            answers: BTreeMap::new(),
            current: resume_at,
            started_at: None,
            timers,
            submits,
        };
        ctx.emit(StageEvent::Loaded {
            total: form.units.len(),
            resume_at,
        });

        loop {
            tokio::select! {
                biased;

                Some(signal) = timer_rx.recv() => {
                    if let Some(outcome) = form.on_timer(signal, &mut timer_rx).await {
                        return Ok(outcome);
                    }
                }
                Some(done) = submit_rx.recv() => form.submits.settle(ctx, done)?,
                action = actions.recv() => match action {
                    None => {
                        log::info!("stage: {} abandoned with {} held answers", self.stage, form.answers.len());
                        return Ok(StageOutcome::Abandoned);
                    }
                    Some(action) => {
                        if let Some(outcome) = form.on_action(action) {
                            return Ok(outcome);
                        }
                    }
                },
            }
        }
    }
}

struct FormRun<'a> {
    stage: StageId,
    duration_secs: u32,
    ctx: &'a StageContext,
    units: Vec<Unit>,
    answers: BTreeMap<UnitId, Answer>,
    current: usize,
    started_at: Option<Instant>,
    timers: TimerSet,
    submits: SubmitTracker,
}

impl FormRun<'_> {
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
                        log::info!(
                            "stage: {} time is up with {}/{} answered",
                            self.stage,
                            self.answers.len(),
                            self.units.len()
                        );
                        self.ctx.emit(StageEvent::TimeUp {
                            scope: TimerScope::Stage,
                        });
                        Some(self.commit(CompletionReason::Forced(TimerScope::Stage)))
                    }
                    _ => None,
                }
            }
        }
    }

    fn on_action(&mut self, action: UserAction) -> Option<StageOutcome> {
        match action {
            UserAction::Begin => self.begin(),
            _ if self.started_at.is_none() => self.ctx.reject("the test has not started yet"),
            UserAction::Answer { unit_id, value } => self.answer(unit_id, value),
            UserAction::NextUnit => self.go_to(self.current.saturating_add(1)),
            UserAction::GoTo(index) => self.go_to(index),
            UserAction::Submit => {
                if self.answers.len() < self.units.len() {
                    self.ctx.reject(format!(
                        "answer all questions before submitting ({}/{} answered)",
                        self.answers.len(),
                        self.units.len()
                    ));
                } else {
                    return Some(self.commit(CompletionReason::Voluntary));
                }
            }
            other => self
                .ctx
                .reject(format!("{other:?} is not available in this test")),
        }
        None
    }

    fn begin(&mut self) {
        if self.started_at.is_some() {
            return self.ctx.reject("the test is already running");
        }
        log::info!("stage: {} started ({} s)", self.stage, self.duration_secs);
        self.started_at = Some(Instant::now());
        self.timers.start(TimerScope::Stage, self.duration_secs);
        self.present();
    }

    fn answer(&mut self, unit_id: UnitId, value: AnswerValue) {
        let Some(unit) = self.units.iter().find(|u| u.id == unit_id) else {
            return self.ctx.reject(format!("unknown question {unit_id}"));
        };
        if !value.fits(&unit.input) {
            return self.ctx.reject(format!("not a valid answer for question {unit_id}"));
        }
        self.answers
            .insert(unit_id.clone(), Answer::now(unit_id, value));
        self.ctx.emit(StageEvent::FormAnswered {
            answered: self.answers.len(),
            total: self.units.len(),
        });
    }

    fn go_to(&mut self, index: usize) {
        let last = self.units.len().saturating_sub(1);
        self.current = index.min(last);
        self.present();
    }

    fn present(&self) {
        if let Some(unit) = self.units.get(self.current) {
            self.ctx.emit(StageEvent::UnitPresented {
                index: self.current,
                unit: unit.clone(),
            });
        }
    }

    fn commit(&mut self, reason: CompletionReason) -> StageOutcome {
        self.timers.cancel_all();
        let completion_secs = self
            .started_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or_default();

        if self.answers.is_empty() {
            log::warn!("stage: {} ended with no answers; nothing to submit", self.stage);
        } else {
            let answers = self
                .answers
                .values()
                .map(|a| (a.unit_id.clone(), a.value.clone()))
                .collect();
            self.submits.submit_unit(
                self.ctx,
                UnitSubmission::Form {
                    answers,
                    completion_secs,
                },
            );
        }

        StageOutcome::Completed(StageReport {
            stage: self.stage,
            reason,
            answered: self.answers.len(),
            total: self.units.len(),
            dispatched: self.submits.dispatched(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
