//! Assessment pipeline: stage sequencing, resume and finalization.
//!
//! # Architecture
//!
//! ```text
//! UserAction (mpsc)
//!        │
//!        ▼
//! PipelineOrchestrator::run()  ← async tokio task
//!        │
//!        ├─ initialize       → completion flags → first incomplete stage
//!        ├─ Stage::run       → one engine at a time, actions forwarded
//!        ├─ on_stage_complete→ mark complete, advance strictly forward
//!        └─ finalize         → finish the evaluation once
//!
//! SharedState (Arc<Mutex<AssessmentState>>) ←─── polled by a presentation layer
//! PipelineEvent (mpsc)                      ───▶ pushed to a presentation layer
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use assessment_runner::config::AppConfig;
//! use assessment_runner::pipeline::{new_shared_state, PipelineOrchestrator};
//! use assessment_runner::progress::HttpProgressService;
//! use assessment_runner::recording::{CpalMicrophone, Recorder};
//! use assessment_runner::session::Session;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(AppConfig::default());
//!     let progress = Arc::new(HttpProgressService::from_config(&config.api));
//!     let recorder = Arc::new(Recorder::new(
//!         Arc::new(CpalMicrophone::new()),
//!         config.recording.clone(),
//!     ));
//!     let session = Arc::new(Session::new(serde_json::json!({ "name": "A. Applicant" })));
//!
//!     let (_actions_tx, actions_rx) = mpsc::unbounded_channel();
//!     let (events_tx, _events_rx) = mpsc::unbounded_channel();
//!     let orchestrator =
//!         PipelineOrchestrator::new(new_shared_state(), progress, recorder, config);
//!     let _ = orchestrator.run(session, actions_rx, events_tx).await;
//! }
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{PipelineError, PipelineEvent, PipelineOrchestrator};
pub use state::{lock_state, new_shared_state, AssessmentState, PipelineState, SharedState};
