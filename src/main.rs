//! Application entry point: headless assessment runner.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Load the persisted session, or start a new one from the applicant
//!    JSON given as the first argument.
//! 4. Build the progress client and the microphone recorder.
//! 5. Spawn the pipeline orchestrator.
//! 6. Read applicant commands from stdin until the pipeline finishes.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use assessment_runner::{
    config::AppConfig,
    pipeline::{
        lock_state, new_shared_state, PipelineError, PipelineEvent, PipelineOrchestrator,
        PipelineState,
    },
    progress::HttpProgressService,
    recording::{CpalMicrophone, Recorder},
    session::SessionStore,
    stage::{AnswerValue, StageEvent, UnitId, UserAction},
};

const HELP: &str = "commands: begin | play | start | stop | next | goto N | \
answer ID CHOICE|TEXT | submit | type TEXT | done | quit";

// ---------------------------------------------------------------------------
// Command parsing
// ---------------------------------------------------------------------------

fn parse_command(line: &str) -> Option<UserAction> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match word {
        "begin" => Some(UserAction::Begin),
        "play" => Some(UserAction::PlayStimulus),
        "start" => Some(UserAction::StartCapture),
        "stop" => Some(UserAction::StopCapture),
        "next" => Some(UserAction::NextUnit),
        "submit" => Some(UserAction::Submit),
        "done" => Some(UserAction::CompleteEarly),
        "type" => Some(UserAction::Type(rest.to_owned())),
        "goto" => rest
            .parse::<usize>()
            .ok()
            .map(|n| UserAction::GoTo(n.saturating_sub(1))),
        "answer" => {
            let (id, value) = rest.split_once(' ')?;
            let value = match value.trim().parse::<usize>() {
                Ok(choice) => AnswerValue::Choice(choice),
                Err(_) => AnswerValue::Text(value.trim().to_owned()),
            };
            Some(UserAction::Answer {
                unit_id: UnitId::from(id),
                value,
            })
        }
        _ => None,
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::StageEntered(stage) => log::info!("── {stage} ──"),
        PipelineEvent::Stage { event, .. } => match event {
            // Too chatty for a console.
            StageEvent::Waveform(_) => {}
            StageEvent::Tick { scope, remaining } => {
                if remaining % 30 == 0 {
                    log::info!("{scope:?} time left: {remaining}s");
                }
            }
            StageEvent::UnitPresented { index, unit } => {
                log::info!("question {} [{}]: {}", index + 1, unit.id, unit.prompt);
            }
            other => log::info!("{other:?}"),
        },
        PipelineEvent::StageCompleted(report) => log::info!(
            "{} finished ({:?}): {}/{} answered",
            report.stage,
            report.reason,
            report.answered,
            report.total
        ),
        PipelineEvent::Finalizing => log::info!("finishing the evaluation…"),
        PipelineEvent::Finished => log::info!("assessment complete"),
        PipelineEvent::Failed(message) => log::error!("{message}"),
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("assessment runner starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    let config = Arc::new(config);

    // 3. Session
    let store = SessionStore::default_location();
    let session = match (store.load()?, std::env::args().nth(1)) {
        (Some(session), None) => {
            log::info!("resuming session {}", session.id());
            session
        }
        (_, Some(applicant)) => {
            let applicant: serde_json::Value =
                serde_json::from_str(&applicant).context("applicant must be a JSON object")?;
            store.start_new_session(applicant)?
        }
        (None, None) => anyhow::bail!("no stored session; pass the applicant JSON to start one"),
    };
    let session = Arc::new(session);

    // 4. Services
    let progress = Arc::new(HttpProgressService::from_config(&config.api));
    let recorder = Arc::new(Recorder::new(
        Arc::new(CpalMicrophone::new()),
        config.recording.clone(),
    ));

    // 5. Orchestrator
    let state = new_shared_state();
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let orchestrator =
        PipelineOrchestrator::new(Arc::clone(&state), progress, recorder, Arc::clone(&config));
    let pipeline = tokio::spawn(orchestrator.run(Arc::clone(&session), actions_rx, events_tx));

    // 6. Console loop
    log::info!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut actions_tx = Some(actions_tx);
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            line = lines.next_line(), if actions_tx.is_some() => match line? {
                Some(line) if line.trim() == "quit" => actions_tx = None,
                Some(line) => match (parse_command(&line), &actions_tx) {
                    (Some(action), Some(tx)) => {
                        let _ = tx.send(action);
                    }
                    _ => log::warn!("unknown command; {HELP}"),
                },
                None => actions_tx = None,
            },
        }
    }

    let outcome = pipeline.await?;
    let finished = lock_state(&state).pipeline == PipelineState::Done;
    match outcome {
        Ok(()) if finished => {
            store.clear()?;
            Ok(())
        }
        Ok(()) => {
            log::info!("session {} saved; run again to resume", session.id());
            Ok(())
        }
        Err(e) => {
            // The server no longer recognises this session.
            if e == PipelineError::SessionLost {
                store.clear()?;
            }
            Err(e.into())
        }
    }
}
