//! Stage identity, units and answers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// StageId / StageKind
// ---------------------------------------------------------------------------

/// One phase of the assessment.  The serialized names are the server's
/// `test_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Listening,
    Written,
    Speech,
    Typing,
    Personality,
}

impl StageId {
    pub const ALL: [StageId; 5] = [
        StageId::Listening,
        StageId::Written,
        StageId::Speech,
        StageId::Typing,
        StageId::Personality,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Listening => "listening",
            StageId::Written => "written",
            StageId::Speech => "speech",
            StageId::Typing => "typing",
            StageId::Personality => "personality",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_str() == s)
    }

    /// Which engine variant runs this stage.
    pub fn kind(self) -> StageKind {
        match self {
            StageId::Listening => StageKind::AudioResponse,
            StageId::Speech => StageKind::Interview,
            StageId::Written | StageId::Personality => StageKind::TimedForm,
            StageId::Typing => StageKind::Typing,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Play a stimulus, record a spoken answer (listening).
    AudioResponse,
    /// Read or hear a prompt, record a spoken answer (speech).
    Interview,
    /// Multi-question form with one deadline (written, personality).
    TimedForm,
    /// Copy a passage against the clock.
    Typing,
}

// ---------------------------------------------------------------------------
// UnitId
// ---------------------------------------------------------------------------

/// Server-assigned unit identifier.
///
/// Some endpoints send numeric ids and some send strings; both normalise to
/// the same textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl<'de> Deserialize<'de> for UnitId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => UnitId(s),
            Raw::Int(n) => UnitId(n.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// How the applicant answers a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSpec {
    #[default]
    AudioCapture,
    Choice {
        options: Vec<String>,
    },
    Text {
        #[serde(default)]
        placeholder: Option<String>,
    },
    /// Passage to reproduce in the typing test.
    Passage {
        text: String,
    },
}

/// A single question or prompt.  Immutable once fetched for a stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub prompt: String,
    /// Stimulus reference, resolved to a playable URL on demand.
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub input: InputSpec,
    #[serde(default)]
    pub ordinal: u32,
}

impl Unit {
    pub fn requires_capture(&self) -> bool {
        matches!(self.input, InputSpec::AudioCapture)
    }
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    /// Index into `InputSpec::Choice::options`.
    Choice(usize),
    Text(String),
}

impl AnswerValue {
    /// Whether this value is acceptable for `input`.
    pub fn fits(&self, input: &InputSpec) -> bool {
        match (self, input) {
            (AnswerValue::Choice(i), InputSpec::Choice { options }) => *i < options.len(),
            (AnswerValue::Text(t), InputSpec::Text { .. }) => !t.trim().is_empty(),
            _ => false,
        }
    }
}

/// A held answer.  Write-once per unit once committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub unit_id: UnitId,
    pub value: AnswerValue,
    pub submitted_at: DateTime<Utc>,
}

impl Answer {
    pub fn now(unit_id: UnitId, value: AnswerValue) -> Self {
        Self {
            unit_id,
            value,
            submitted_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
