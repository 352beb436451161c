//! `ProgressService` trait and its HTTP implementation.
//!
//! The Progress Service is the server of record for which stages and units
//! are done.  Stage engines never cache what it says beyond a single resume
//! decision.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::types::{
    CompletionStatus, Envelope, ProgressError, StageProgress, SubmitAck, UnitSubmission,
};
use crate::config::ApiConfig;
use crate::recording::EncodedAudio;
use crate::session::Session;
use crate::stage::{StageId, Unit, UnitId};

// ---------------------------------------------------------------------------
// ProgressService trait
// ---------------------------------------------------------------------------

/// Async client for the assessment server.
///
/// Implementors must be `Send + Sync`; engines hold it as
/// `Arc<dyn ProgressService>` and submit from spawned tasks.
#[async_trait]
pub trait ProgressService: Send + Sync {
    async fn completion_status(&self, session: &Session) -> Result<CompletionStatus, ProgressError>;

    /// Idempotent: marking an already complete stage succeeds again.
    async fn mark_stage_complete(
        &self,
        session: &Session,
        stage: StageId,
    ) -> Result<(), ProgressError>;

    /// Idempotent: finalizing twice is not an error.
    async fn finalize(&self, session: &Session) -> Result<(), ProgressError>;

    async fn fetch_units(&self, session: &Session, stage: StageId)
        -> Result<Vec<Unit>, ProgressError>;

    async fn stage_progress(
        &self,
        session: &Session,
        stage: StageId,
    ) -> Result<StageProgress, ProgressError>;

    async fn submit_unit(
        &self,
        session: &Session,
        stage: StageId,
        submission: UnitSubmission,
    ) -> Result<SubmitAck, ProgressError>;

    /// Resolve a stimulus reference to a short-lived streamable URL.
    async fn resolve_stimulus(&self, media: &str) -> Result<String, ProgressError>;

    /// Have the server speak `text` aloud.
    async fn narrate(&self, text: &str) -> Result<(), ProgressError>;
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

struct StageRoutes {
    units: &'static str,
    progress: &'static str,
    submit: &'static str,
}

fn routes(stage: StageId) -> StageRoutes {
    match stage {
        StageId::Listening => StageRoutes {
            units: "/listening-test/questions",
            progress: "/listening-test/progress",
            submit: "/evaluate-listening-test",
        },
        StageId::Speech => StageRoutes {
            units: "/speech/questions",
            progress: "/speech/progress",
            submit: "/evaluate",
        },
        StageId::Written => StageRoutes {
            units: "/written/questions",
            progress: "/written/progress",
            submit: "/written/submit",
        },
        StageId::Personality => StageRoutes {
            units: "/personality/questions",
            progress: "/personality/progress",
            submit: "/personality/submit",
        },
        StageId::Typing => StageRoutes {
            units: "/typing/test",
            progress: "/typing/progress",
            submit: "/typing/submit",
        },
    }
}

#[derive(Deserialize)]
struct CompletionWire {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    completion_status: BTreeMap<String, bool>,
}

#[derive(Deserialize)]
struct ProgressWire {
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    answered_unit_ids: BTreeSet<UnitId>,
    #[serde(default)]
    total_units: usize,
}

#[derive(Deserialize)]
struct StimulusWire {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
}

/// Whether a 404 means the session itself is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Session,
    Resource,
}

// ---------------------------------------------------------------------------
// HttpProgressService
// ---------------------------------------------------------------------------

/// `reqwest` client for the assessment server.
pub struct HttpProgressService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProgressService {
    /// The HTTP client carries the per-request timeout from `config`.
    pub fn from_config(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Absolute URL for a possibly server-relative `audio_url`.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            self.url(url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        session: &Session,
        scope: Scope,
    ) -> Result<T, ProgressError> {
        let response = self
            .client
            .get(self.url(path))
            .query(&[("session_id", session.id())])
            .send()
            .await?;
        read(response, scope).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        scope: Scope,
    ) -> Result<T, ProgressError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        read(response, scope).await
    }

    async fn post_recording(
        &self,
        path: &str,
        session: &Session,
        unit_id: &UnitId,
        unit_index: usize,
        prompt: &str,
        audio: EncodedAudio,
    ) -> Result<Envelope<serde_json::Value>, ProgressError> {
        let part = multipart::Part::bytes(audio.bytes)
            .file_name(EncodedAudio::FILE_NAME)
            .mime_str(EncodedAudio::MIME)?;
        let form = multipart::Form::new()
            .text("session_id", session.id().to_string())
            .text("question_index", unit_index.to_string())
            .text("unit_id", unit_id.to_string())
            .text("question", prompt.to_string())
            .part("audio", part);

        let response = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await?;
        read(response, Scope::Resource).await
    }
}

/// Map HTTP status, then decode the body.
async fn read<T: DeserializeOwned>(
    response: reqwest::Response,
    scope: Scope,
) -> Result<T, ProgressError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify(status, scope, &body)
            .unwrap_or(ProgressError::Status(status.as_u16())));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProgressError::Parse(e.to_string()))
}

/// The error a response status stands for, or `None` on success.
///
/// 410 always means the session is gone; 404 only on session-scoped calls.
/// A client error whose body still carries an envelope message is
/// `Rejected` with that message.
fn classify(status: StatusCode, scope: Scope, body: &str) -> Option<ProgressError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::GONE || (status == StatusCode::NOT_FOUND && scope == Scope::Session) {
        return Some(ProgressError::SessionLost);
    }
    Some(match serde_json::from_str::<Envelope<serde_json::Value>>(body) {
        Ok(Envelope {
            message: Some(m), ..
        }) if status.is_client_error() => ProgressError::Rejected(m),
        _ => ProgressError::Status(status.as_u16()),
    })
}

fn ack(envelope: Envelope<serde_json::Value>) -> Result<SubmitAck, ProgressError> {
    let message = envelope.message.clone();
    envelope.into_result()?;
    Ok(SubmitAck { message })
}

#[async_trait]
impl ProgressService for HttpProgressService {
    async fn completion_status(&self, session: &Session) -> Result<CompletionStatus, ProgressError> {
        let wire: CompletionWire = self
            .get("/get_test_completion_status", session, Scope::Session)
            .await?;
        if !wire.success {
            return Err(ProgressError::Rejected(
                wire.message.unwrap_or_else(|| "completion status unavailable".into()),
            ));
        }
        Ok(CompletionStatus::from_wire(wire.completion_status))
    }

    async fn mark_stage_complete(
        &self,
        session: &Session,
        stage: StageId,
    ) -> Result<(), ProgressError> {
        let body = json!({ "session_id": session.id(), "test_type": stage.as_str() });
        let envelope: Envelope<serde_json::Value> =
            self.post("/mark_test_completed", &body, Scope::Session).await?;
        envelope.into_result().map(|_| ())
    }

    async fn finalize(&self, session: &Session) -> Result<(), ProgressError> {
        let body = json!({ "session_id": session.id() });
        let envelope: Envelope<serde_json::Value> =
            self.post("/finish_evaluation", &body, Scope::Session).await?;
        envelope.into_result().map(|_| ())
    }

    async fn fetch_units(
        &self,
        session: &Session,
        stage: StageId,
    ) -> Result<Vec<Unit>, ProgressError> {
        let envelope: Envelope<Vec<Unit>> =
            self.get(routes(stage).units, session, Scope::Resource).await?;
        Ok(envelope.into_result()?.unwrap_or_default())
    }

    async fn stage_progress(
        &self,
        session: &Session,
        stage: StageId,
    ) -> Result<StageProgress, ProgressError> {
        let envelope: Envelope<ProgressWire> =
            self.get(routes(stage).progress, session, Scope::Session).await?;
        Ok(match envelope.into_result()? {
            Some(wire) => StageProgress {
                stage_id: stage,
                completed: wire.completed,
                answered_unit_ids: wire.answered_unit_ids,
                total_units: wire.total_units,
            },
            None => StageProgress::fresh(stage, 0),
        })
    }

    async fn submit_unit(
        &self,
        session: &Session,
        stage: StageId,
        submission: UnitSubmission,
    ) -> Result<SubmitAck, ProgressError> {
        let path = routes(stage).submit;
        let envelope = match submission {
            UnitSubmission::Recording {
                unit_id,
                unit_index,
                prompt,
                audio,
            } => {
                self.post_recording(path, session, &unit_id, unit_index, &prompt, audio)
                    .await?
            }
            UnitSubmission::Form {
                answers,
                completion_secs,
            } => {
                let body = json!({
                    "session_id": session.id(),
                    "answers": answers,
                    "completion_time": completion_secs,
                });
                self.post(path, &body, Scope::Resource).await?
            }
            UnitSubmission::Typing {
                unit_id,
                typed_text,
                time_taken_secs,
                accuracy,
                wpm,
            } => {
                let body = json!({
                    "session_id": session.id(),
                    "test_id": unit_id,
                    "typed_text": typed_text,
                    "time_taken": time_taken_secs,
                    "accuracy": accuracy,
                    "wpm": wpm,
                });
                self.post(path, &body, Scope::Resource).await?
            }
        };
        ack(envelope)
    }

    async fn resolve_stimulus(&self, media: &str) -> Result<String, ProgressError> {
        let wire: StimulusWire = self
            .post("/speak-audio", &json!({ "id": media }), Scope::Resource)
            .await?;
        match (wire.success, wire.audio_url) {
            (true, Some(url)) => Ok(self.absolute(&url)),
            (_, _) => Err(ProgressError::Rejected(
                wire.message.unwrap_or_else(|| "stimulus unavailable".into()),
            )),
        }
    }

    async fn narrate(&self, text: &str) -> Result<(), ProgressError> {
        let response = self
            .client
            .post(self.url("/speak"))
            .json(&json!({ "text": text }))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProgressError::Status(response.status().as_u16()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
