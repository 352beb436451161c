//! In-memory `ProgressService` that records every call.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::ProgressService;
use super::types::{CompletionStatus, ProgressError, StageProgress, SubmitAck, UnitSubmission};
use crate::session::Session;
use crate::stage::{InputSpec, StageId, StageKind, Unit, UnitId};

#[derive(Default)]
struct MockState {
    units: HashMap<StageId, Vec<Unit>>,
    answered: HashMap<StageId, BTreeSet<UnitId>>,
    completed: BTreeSet<StageId>,
    submissions: Vec<(StageId, UnitSubmission)>,
    mark_calls: Vec<StageId>,
    finalize_calls: usize,
    progress_calls: usize,
    stimulus_calls: Vec<String>,
    narrations: Vec<String>,
    fail_submits: bool,
    fail_status: bool,
    fail_progress: usize,
    session_lost: bool,
}

#[derive(Default)]
pub(crate) struct MockProgress {
    state: Mutex<MockState>,
}

pub(crate) fn unit_id(stage: StageId, index: usize) -> UnitId {
    UnitId(format!("{stage}-{index}"))
}

fn make_unit(stage: StageId, index: usize) -> Unit {
    let (media, input) = match stage.kind() {
        StageKind::AudioResponse => (Some(format!("stimulus-{index}")), InputSpec::AudioCapture),
        StageKind::Interview => (None, InputSpec::AudioCapture),
        StageKind::TimedForm => (
            None,
            InputSpec::Choice {
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            },
        ),
        StageKind::Typing => (
            None,
            InputSpec::Passage {
                text: "the quick brown fox jumps over the lazy dog".into(),
            },
        ),
    };
    Unit {
        id: unit_id(stage, index),
        prompt: format!("{stage} question {}", index + 1),
        media,
        input,
        ordinal: index as u32,
    }
}

impl MockProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// `n` units shaped for the stage's engine kind.
    pub fn with_units(self, stage: StageId, n: usize) -> Self {
        self.with(|s| {
            s.units
                .insert(stage, (0..n).map(|i| make_unit(stage, i)).collect());
        })
    }

    /// Mark the given unit indices as already answered server-side.
    pub fn with_answered(self, stage: StageId, indices: &[usize]) -> Self {
        self.with(|s| {
            s.answered
                .entry(stage)
                .or_default()
                .extend(indices.iter().map(|&i| unit_id(stage, i)));
        })
    }

    pub fn with_completed(self, stage: StageId) -> Self {
        self.with(|s| {
            s.completed.insert(stage);
        })
    }

    pub fn failing_submits(self) -> Self {
        self.with(|s| s.fail_submits = true)
    }

    pub fn failing_status(self) -> Self {
        self.with(|s| s.fail_status = true)
    }

    /// The next `n` progress queries fail with a network error.
    pub fn flaky_progress(self, n: usize) -> Self {
        self.with(|s| s.fail_progress = n)
    }

    pub fn session_lost(self) -> Self {
        self.with(|s| s.session_lost = true)
    }

    pub fn lose_session(&self) {
        self.state.lock().unwrap().session_lost = true;
    }

    pub fn submissions(&self, stage: StageId) -> Vec<UnitSubmission> {
        self.state
            .lock()
            .unwrap()
            .submissions
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, sub)| sub.clone())
            .collect()
    }

    pub fn mark_calls(&self) -> Vec<StageId> {
        self.state.lock().unwrap().mark_calls.clone()
    }

    pub fn finalize_calls(&self) -> usize {
        self.state.lock().unwrap().finalize_calls
    }

    pub fn progress_calls(&self) -> usize {
        self.state.lock().unwrap().progress_calls
    }

    pub fn is_completed(&self, stage: StageId) -> bool {
        self.state.lock().unwrap().completed.contains(&stage)
    }

    pub fn stimulus_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().stimulus_calls.clone()
    }

    pub fn narrations(&self) -> Vec<String> {
        self.state.lock().unwrap().narrations.clone()
    }
}

#[async_trait]
impl ProgressService for MockProgress {
    async fn completion_status(&self, _session: &Session) -> Result<CompletionStatus, ProgressError> {
        let s = self.state.lock().unwrap();
        if s.session_lost {
            return Err(ProgressError::SessionLost);
        }
        if s.fail_status {
            return Err(ProgressError::Request("connection refused".into()));
        }
        Ok(StageId::ALL
            .into_iter()
            .map(|id| (id, s.completed.contains(&id)))
            .collect())
    }

    async fn mark_stage_complete(
        &self,
        _session: &Session,
        stage: StageId,
    ) -> Result<(), ProgressError> {
        let mut s = self.state.lock().unwrap();
        if s.session_lost {
            return Err(ProgressError::SessionLost);
        }
        s.mark_calls.push(stage);
        s.completed.insert(stage);
        Ok(())
    }

    async fn finalize(&self, _session: &Session) -> Result<(), ProgressError> {
        let mut s = self.state.lock().unwrap();
        if s.session_lost {
            return Err(ProgressError::SessionLost);
        }
        s.finalize_calls += 1;
        Ok(())
    }

    async fn fetch_units(
        &self,
        _session: &Session,
        stage: StageId,
    ) -> Result<Vec<Unit>, ProgressError> {
        let s = self.state.lock().unwrap();
        if s.session_lost {
            return Err(ProgressError::SessionLost);
        }
        Ok(s.units.get(&stage).cloned().unwrap_or_default())
    }

    async fn stage_progress(
        &self,
        _session: &Session,
        stage: StageId,
    ) -> Result<StageProgress, ProgressError> {
        let mut s = self.state.lock().unwrap();
        s.progress_calls += 1;
        if s.session_lost {
            return Err(ProgressError::SessionLost);
        }
        if s.fail_progress > 0 {
            s.fail_progress -= 1;
            return Err(ProgressError::Timeout);
        }
        Ok(StageProgress {
            stage_id: stage,
            completed: s.completed.contains(&stage),
            answered_unit_ids: s.answered.get(&stage).cloned().unwrap_or_default(),
            total_units: s.units.get(&stage).map_or(0, Vec::len),
        })
    }

    async fn submit_unit(
        &self,
        _session: &Session,
        stage: StageId,
        submission: UnitSubmission,
    ) -> Result<SubmitAck, ProgressError> {
        let mut s = self.state.lock().unwrap();
        s.submissions.push((stage, submission.clone()));
        if s.session_lost {
            return Err(ProgressError::SessionLost);
        }
        if s.fail_submits {
            return Err(ProgressError::Status(500));
        }
        s.answered
            .entry(stage)
            .or_default()
            .extend(submission.unit_ids());
        Ok(SubmitAck::default())
    }

    async fn resolve_stimulus(&self, media: &str) -> Result<String, ProgressError> {
        self.state
            .lock()
            .unwrap()
            .stimulus_calls
            .push(media.to_string());
        Ok(format!("http://localhost:5000/audio/{media}.mp3"))
    }

    async fn narrate(&self, text: &str) -> Result<(), ProgressError> {
        self.state.lock().unwrap().narrations.push(text.to_string());
        Ok(())
    }
}
