//! Event loop shared by the recorded-answer stages.
//!
//! One unit is presented at a time.  Starting a capture spends the unit
//! (it is marked answered at that moment) and starts its answer window.
//! Whether the capture ends by the applicant pressing stop, the unit window
//! running out, or the session cap running out, it goes through
//! [`CaptureRun::finish_capture`]: cancel the unit timer, stop the recording
//! once, dispatch its submit.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::load::{load, Loaded};
use super::resume;
use super::submit::SubmitTracker;
use super::{
    CompletionReason, StageContext, StageEngine, StageError, StageEvent, StageId, StageOutcome,
    StageReport, TaskGroup, Unit, UnitId, UserAction,
};
use crate::progress::UnitSubmission;
use crate::recording::{RecordingSession, WaveformData};
use crate::timer::{TimerScope, TimerSet, TimerSignal};

/// How a unit's prompt reaches the applicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prompting {
    /// Stimulus audio, fetched on request.
    Stimulus,
    /// Prompt text spoken by the server on presentation.
    Narrated,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CaptureProfile {
    pub stage: StageId,
    pub unit_secs: u32,
    pub session_secs: u32,
    pub prompting: Prompting,
}

struct LiveCapture {
    index: usize,
    recording: RecordingSession,
    forwarder: JoinHandle<()>,
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

struct CaptureRun<'a> {
    profile: CaptureProfile,
    ctx: &'a StageContext,
    units: Vec<Unit>,
    answered: BTreeSet<UnitId>,
    current: usize,
    timers: TimerSet,
    live: Option<LiveCapture>,
    submits: SubmitTracker,
    background: TaskGroup,
}

pub(crate) async fn run<E: StageEngine + ?Sized>(
    engine: &E,
    profile: CaptureProfile,
    ctx: &StageContext,
    actions: &mut mpsc::UnboundedReceiver<UserAction>,
) -> Result<StageOutcome, StageError> {
    let (units, resume_at, answered) = match load(engine, ctx, actions).await? {
        Loaded::Ready {
            units,
            resume_at,
            answered,
        } => (units, resume_at, answered),
        Loaded::Finished(outcome) => return Ok(outcome),
    };

    let (timers, mut timer_rx) = TimerSet::new();
    let (submits, mut submit_rx) = SubmitTracker::new(profile.stage);
    let mut run = CaptureRun {
        profile,
        ctx,
        units,
        answered,
        current: resume_at,
        timers,
        live: None,
        submits,
        background: TaskGroup::default(),
    };

    // Fresh full-duration cap on every entry, resumed or not.
    run.timers.start(TimerScope::Session, profile.session_secs);
    ctx.emit(StageEvent::Loaded {
        total: run.units.len(),
        resume_at,
    });
    run.present();

    loop {
        tokio::select! {
            biased;

            Some(signal) = timer_rx.recv() => {
                if let Some(outcome) = run.on_timer(signal, &mut timer_rx).await {
                    return Ok(outcome);
                }
            }
            Some(done) = submit_rx.recv() => run.submits.settle(ctx, done)?,
            action = actions.recv() => match action {
                None => {
                    log::info!("stage: {} abandoned", profile.stage);
                    return Ok(StageOutcome::Abandoned);
                }
                Some(action) => {
                    if let Some(outcome) = run.on_action(action).await {
                        return Ok(outcome);
                    }
                }
            },
        }
    }
}

impl CaptureRun<'_> {
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
            TimerSignal::Expired { scope, timer } => match self.timers.resolve(scope, timer, rx).await
            {
                Some(TimerScope::Session) => {
                    log::info!("stage: {} session time is up", self.profile.stage);
                    self.ctx.emit(StageEvent::TimeUp {
                        scope: TimerScope::Session,
                    });
                    self.finish_capture();
                    Some(self.complete(CompletionReason::Forced(TimerScope::Session)))
                }
                Some(TimerScope::Unit) => {
                    log::info!(
                        "stage: {} answer window for question {} is up",
                        self.profile.stage,
                        self.current + 1
                    );
                    self.ctx.emit(StageEvent::TimeUp {
                        scope: TimerScope::Unit,
                    });
                    self.finish_capture();
                    None
                }
                Some(TimerScope::Stage) | None => None,
            },
        }
    }

    async fn on_action(&mut self, action: UserAction) -> Option<StageOutcome> {
        match action {
            UserAction::PlayStimulus => self.play_stimulus(),
            UserAction::StartCapture => self.start_capture().await,
            UserAction::StopCapture => {
                if self.live.is_some() {
                    self.finish_capture();
                } else {
                    self.ctx.reject("not recording");
                }
            }
            UserAction::NextUnit | UserAction::Submit => return self.advance(),
            other => self.ctx.reject(format!("{other:?} is not available in this test")),
        }
        None
    }

    fn present(&mut self) {
        let Some(unit) = self.units.get(self.current) else {
            return;
        };
        self.ctx.emit(StageEvent::UnitPresented {
            index: self.current,
            unit: unit.clone(),
        });

        if self.profile.prompting == Prompting::Narrated {
            let progress = self.ctx.progress.clone();
            let text = unit.prompt.clone();
            self.background.spawn(async move {
                if let Err(e) = progress.narrate(&text).await {
                    log::warn!("stage: narration failed: {e}");
                }
            });
        }
    }

    fn play_stimulus(&mut self) {
        let index = self.current;
        let Some(unit) = self.units.get(index) else {
            return self.ctx.reject("no question to play");
        };
        if self.answered.contains(&unit.id) {
            return self.ctx.reject("this question has already been answered");
        }
        let Some(media) = unit.media.clone() else {
            return self.ctx.reject("this question has no audio");
        };

        let progress = self.ctx.progress.clone();
        let events = self.ctx.events.clone();
        self.background.spawn(async move {
            let event = match progress.resolve_stimulus(&media).await {
                Ok(url) => StageEvent::StimulusReady { index, url },
                Err(e) => {
                    log::warn!("stage: stimulus {media} unavailable: {e}");
                    StageEvent::Banner(format!("Could not load the audio ({e}). Try again."))
                }
            };
            let _ = events.send(event);
        });
    }

    async fn start_capture(&mut self) {
        if self.live.is_some() {
            return self.ctx.reject("already recording");
        }
        let index = self.current;
        let Some(unit_id) = self.units.get(index).map(|u| u.id.clone()) else {
            return self.ctx.reject("no question to answer");
        };
        if self.answered.contains(&unit_id) {
            return self.ctx.reject("this question has already been answered");
        }

        let handle = match self.ctx.recorder.acquire_microphone().await {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!(
                    "stage: cannot record question {} of {}: {e}",
                    index + 1,
                    self.profile.stage
                );
                return self.ctx.emit(StageEvent::DeviceFailed(e));
            }
        };

        let recording = self.ctx.recorder.start_capture(handle);
        self.answered.insert(unit_id);
        self.timers.start(TimerScope::Unit, self.profile.unit_secs);
        let forwarder = tokio::spawn(forward_waveform(
            recording.waveform(),
            self.ctx.events.clone(),
        ));
        self.live = Some(LiveCapture {
            index,
            recording,
            forwarder,
        });
        self.ctx.emit(StageEvent::CaptureStarted { index });
    }

    /// The single stop / submit / teardown path.
    fn finish_capture(&mut self) {
        self.timers.cancel(TimerScope::Unit);
        let Some(live) = self.live.take() else {
            return;
        };
        let index = live.index;
        let Some(audio) = live.recording.stop() else {
            return;
        };
        drop(live);

        self.ctx.emit(StageEvent::CaptureStopped {
            index,
            duration_secs: audio.duration_secs,
        });
        let unit = &self.units[index];
        let submission = UnitSubmission::Recording {
            unit_id: unit.id.clone(),
            unit_index: index,
            prompt: unit.prompt.clone(),
            audio,
        };
        self.submits.submit_unit(self.ctx, submission);
    }

    fn advance(&mut self) -> Option<StageOutcome> {
        if self.live.is_some() {
            self.ctx.reject("stop recording before moving on");
            return None;
        }
        let blocked = self
            .units
            .get(self.current)
            .is_some_and(|u| u.requires_capture() && !self.answered.contains(&u.id));
        if blocked {
            self.ctx.reject("answer this question before moving on");
            return None;
        }

        match resume::next_unanswered(&self.units, &self.answered, self.current) {
            Some(next) => {
                self.current = next;
                self.present();
                None
            }
            None => Some(self.complete(CompletionReason::Voluntary)),
        }
    }

    fn complete(&mut self, reason: CompletionReason) -> StageOutcome {
        self.timers.cancel_all();
        let answered = self
            .units
            .iter()
            .filter(|u| self.answered.contains(&u.id))
            .count();
        let report = StageReport {
            stage: self.profile.stage,
            reason,
            answered,
            total: self.units.len(),
            dispatched: self.submits.dispatched(),
        };
        log::info!(
            "stage: {} complete ({reason:?}): {answered}/{} answered, {} submitted",
            report.stage,
            report.total,
            report.dispatched
        );
        StageOutcome::Completed(report)
    }
}

async fn forward_waveform(
    mut frames: watch::Receiver<WaveformData>,
    events: mpsc::UnboundedSender<StageEvent>,
) {
    while frames.changed().await.is_ok() {
        let frame = frames.borrow_and_update().clone();
        if events.send(StageEvent::Waveform(frame)).is_err() {
            break;
        }
    }
}
