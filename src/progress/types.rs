//! Progress Service data shapes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recording::EncodedAudio;
use crate::stage::{AnswerValue, StageId, UnitId};

// ---------------------------------------------------------------------------
// ProgressError
// ---------------------------------------------------------------------------

/// Errors talking to the Progress Service.
///
/// Everything except [`SessionLost`](Self::SessionLost) is a transient
/// network problem: it is shown as a banner and never undoes local state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProgressError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("failed to parse server response: {0}")]
    Parse(String),

    /// `success: false` in the response envelope.
    #[error("server rejected request: {0}")]
    Rejected(String),

    /// The server no longer knows this session.
    #[error("session is no longer known to the server")]
    SessionLost,
}

impl ProgressError {
    pub fn is_session_lost(&self) -> bool {
        matches!(self, ProgressError::SessionLost)
    }
}

impl From<reqwest::Error> for ProgressError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProgressError::Timeout
        } else if e.is_decode() {
            ProgressError::Parse(e.to_string())
        } else {
            ProgressError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Uniform `{success, message, data}` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// `data` on success, `Rejected(message)` otherwise.
    pub fn into_result(self) -> Result<Option<T>, ProgressError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ProgressError::Rejected(
                self.message.unwrap_or_else(|| "request rejected".into()),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Completion / progress
// ---------------------------------------------------------------------------

/// Per-stage completion flags.  Stages the server omits are incomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionStatus(BTreeMap<StageId, bool>);

impl CompletionStatus {
    /// Build from the server's `{test_type: bool}` map, ignoring names this
    /// client does not know.
    pub fn from_wire(raw: BTreeMap<String, bool>) -> Self {
        Self(
            raw.into_iter()
                .filter_map(|(name, done)| StageId::parse(&name).map(|id| (id, done)))
                .collect(),
        )
    }

    pub fn is_complete(&self, stage: StageId) -> bool {
        self.0.get(&stage).copied().unwrap_or(false)
    }

    pub fn set(&mut self, stage: StageId, done: bool) {
        self.0.insert(stage, done);
    }

    /// First stage of `order` not yet complete.
    pub fn first_incomplete(&self, order: &[StageId]) -> Option<StageId> {
        order.iter().copied().find(|s| !self.is_complete(*s))
    }
}

impl FromIterator<(StageId, bool)> for CompletionStatus {
    fn from_iter<I: IntoIterator<Item = (StageId, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Server-side view of one stage.  Re-queried for every resume decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    pub stage_id: StageId,
    pub completed: bool,
    pub answered_unit_ids: BTreeSet<UnitId>,
    pub total_units: usize,
}

impl StageProgress {
    /// Nothing answered yet.
    pub fn fresh(stage_id: StageId, total_units: usize) -> Self {
        Self {
            stage_id,
            completed: false,
            answered_unit_ids: BTreeSet::new(),
            total_units,
        }
    }

    pub fn is_answered(&self, unit: &UnitId) -> bool {
        self.answered_unit_ids.contains(unit)
    }
}

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

/// What a stage sends for one committed answer (or whole form).
#[derive(Debug, Clone, PartialEq)]
pub enum UnitSubmission {
    /// A recorded spoken answer.
    Recording {
        unit_id: UnitId,
        unit_index: usize,
        prompt: String,
        audio: EncodedAudio,
    },
    /// All held answers of a timed form.
    Form {
        answers: BTreeMap<UnitId, AnswerValue>,
        completion_secs: u64,
    },
    /// The typing test result.
    Typing {
        unit_id: UnitId,
        typed_text: String,
        time_taken_secs: u32,
        accuracy: u32,
        wpm: f64,
    },
}

impl UnitSubmission {
    /// Short description for logs and banners.
    pub fn label(&self) -> String {
        match self {
            UnitSubmission::Recording { unit_index, .. } => {
                format!("recording for question {}", unit_index + 1)
            }
            UnitSubmission::Form { answers, .. } => format!("{} form answers", answers.len()),
            UnitSubmission::Typing { .. } => "typing result".into(),
        }
    }

    /// Units this submission commits.
    pub fn unit_ids(&self) -> Vec<UnitId> {
        match self {
            UnitSubmission::Recording { unit_id, .. } | UnitSubmission::Typing { unit_id, .. } => {
                vec![unit_id.clone()]
            }
            UnitSubmission::Form { answers, .. } => answers.keys().cloned().collect(),
        }
    }
}

/// Server acknowledgement of a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitAck {
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_success_yields_data() {
        let env: Envelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": true, "data": [1, 2]}"#).unwrap();
        assert_eq!(env.into_result().unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn envelope_failure_carries_message() {
        let env: Envelope<()> =
            serde_json::from_str(r#"{"success": false, "message": "Answers are required"}"#)
                .unwrap();
        assert_eq!(
            env.into_result().unwrap_err(),
            ProgressError::Rejected("Answers are required".into())
        );
    }

    #[test]
    fn completion_status_ignores_unknown_stages() {
        let raw: BTreeMap<String, bool> = [
            ("listening".to_string(), true),
            ("karaoke".to_string(), true),
            ("written".to_string(), false),
        ]
        .into_iter()
        .collect();
        let status = CompletionStatus::from_wire(raw);

        assert!(status.is_complete(StageId::Listening));
        assert!(!status.is_complete(StageId::Written));
        assert!(!status.is_complete(StageId::Typing));
    }

    #[test]
    fn first_incomplete_follows_order() {
        let status: CompletionStatus = [(StageId::Listening, true), (StageId::Written, true)]
            .into_iter()
            .collect();
        let order = [StageId::Listening, StageId::Written, StageId::Speech];
        assert_eq!(status.first_incomplete(&order), Some(StageId::Speech));

        let all: CompletionStatus = order.iter().map(|s| (*s, true)).collect();
        assert_eq!(all.first_incomplete(&order), None);
    }

    #[test]
    fn form_submission_lists_its_units() {
        let answers: BTreeMap<UnitId, AnswerValue> = [
            (UnitId::from("a"), AnswerValue::Choice(0)),
            (UnitId::from("b"), AnswerValue::Text("yes".into())),
        ]
        .into_iter()
        .collect();
        let sub = UnitSubmission::Form {
            answers,
            completion_secs: 42,
        };
        assert_eq!(sub.unit_ids(), vec![UnitId::from("a"), UnitId::from("b")]);
        assert_eq!(sub.label(), "2 form answers");
    }
}
