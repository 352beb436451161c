//! Test harness for driving a stage engine with scripted actions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{StageContext, StageEngine, StageError, StageEvent, StageOutcome, UserAction};
use crate::config::AppConfig;
use crate::progress::mock::MockProgress;
use crate::progress::ProgressService;
use crate::recording::fake::FakeMicrophone;
use crate::recording::{Microphone, Recorder};
use crate::session::Session;

pub(crate) fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    // Fewer waveform events over long paused-clock sleeps.
    config.recording.frame_interval_ms = 1_000;
    config
}

pub(crate) struct Harness {
    pub progress: Arc<MockProgress>,
    pub mic: Arc<FakeMicrophone>,
    pub recorder: Arc<Recorder>,
    pub ctx: StageContext,
    events_rx: mpsc::UnboundedReceiver<StageEvent>,
    actions_tx: Option<mpsc::UnboundedSender<UserAction>>,
    actions_rx: Option<mpsc::UnboundedReceiver<UserAction>>,
    seen: Vec<StageEvent>,
}

impl Harness {
    pub fn new(progress: MockProgress) -> Self {
        let config = test_config();
        let progress = Arc::new(progress);
        let mic = Arc::new(FakeMicrophone::new());
        let recorder = Arc::new(Recorder::new(
            Arc::clone(&mic) as Arc<dyn Microphone>,
            config.recording.clone(),
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();

        let ctx = StageContext {
            session: Arc::new(Session::new(serde_json::json!({ "name": "Test Applicant" }))),
            progress: Arc::clone(&progress) as Arc<dyn ProgressService>,
            recorder: Arc::clone(&recorder),
            config: Arc::new(config),
            events: events_tx,
        };

        Self {
            progress,
            mic,
            recorder,
            ctx,
            events_rx,
            actions_tx: Some(actions_tx),
            actions_rx: Some(actions_rx),
            seen: Vec::new(),
        }
    }

    /// Run `engine` on its own task.  Can be called once.
    pub fn spawn<E>(&mut self, engine: E) -> JoinHandle<Result<StageOutcome, StageError>>
    where
        E: StageEngine + 'static,
    {
        let mut actions = self.actions_rx.take().expect("harness already spawned a stage");
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let mut engine = engine;
            engine.run(&ctx, &mut actions).await
        })
    }

    /// Let spawned tasks run without moving the clock meaningfully.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pub async fn act(&self, action: UserAction) {
        if let Some(tx) = &self.actions_tx {
            let _ = tx.send(action);
        }
        self.settle().await;
    }

    pub async fn record_for(&self, duration: Duration) {
        self.act(UserAction::StartCapture).await;
        self.mic.feed(&vec![0.1; 1_600]);
        tokio::time::sleep(duration).await;
        self.act(UserAction::StopCapture).await;
    }

    /// Close the action channel, as when the applicant navigates away.
    pub fn close(&mut self) {
        self.actions_tx = None;
    }

    pub fn recorder_busy(&self) -> bool {
        self.recorder.is_busy()
    }

    /// Every event emitted so far.
    pub fn events(&mut self) -> Vec<StageEvent> {
        while let Ok(event) = self.events_rx.try_recv() {
            self.seen.push(event);
        }
        self.seen.clone()
    }
}
