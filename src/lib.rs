//! Applicant assessment runner.
//!
//! Sequences the assessment stages (listening, written, speech, typing and
//! optionally personality), resumes an interrupted session at the first
//! unanswered unit, and races per-unit / per-stage / per-session countdowns
//! against applicant actions so that every stage completes exactly once.
//!
//! # Layers
//!
//! ```text
//! pipeline::PipelineOrchestrator      ← sequences stages, finalizes
//!        │
//!        ▼
//! stage::Stage  (AudioResponse | Interview | TimedForm | Typing)
//!        │
//!        ├── timer::TimerSet          ← unit / stage / session countdowns
//!        ├── recording::Recorder      ← exclusive microphone + WAV encoding
//!        └── progress::ProgressService← server of record (HTTP)
//! ```

pub mod config;
pub mod pipeline;
pub mod progress;
pub mod recording;
pub mod session;
pub mod stage;
pub mod timer;
