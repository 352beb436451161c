//! Progress Service client.
//!
//! * [`ProgressService`] — the async trait stage engines and the
//!   orchestrator talk to.
//! * [`HttpProgressService`] — `reqwest` implementation against the
//!   assessment server.
//! * [`types`] — envelopes, completion flags, stage progress, submissions.

pub mod client;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{HttpProgressService, ProgressService};
pub use types::{
    CompletionStatus, Envelope, ProgressError, StageProgress, SubmitAck, UnitSubmission,
};
