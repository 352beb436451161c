//! Speech interview: a spoken prompt per unit, recorded answers, overall cap.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::capture_flow::{self, CaptureProfile, Prompting};
use super::{StageContext, StageEngine, StageError, StageId, StageOutcome, UserAction};

pub struct InterviewStage {
    profile: CaptureProfile,
}

impl InterviewStage {
    pub fn new(stage: StageId, unit_secs: u32, session_secs: u32) -> Self {
        Self {
            profile: CaptureProfile {
                stage,
                unit_secs,
                session_secs,
                prompting: Prompting::Narrated,
            },
        }
    }
}

#[async_trait]
impl StageEngine for InterviewStage {
    fn stage(&self) -> StageId {
        self.profile.stage
    }

    async fn run(
        &mut self,
        ctx: &StageContext,
        actions: &mut mpsc::UnboundedReceiver<UserAction>,
    ) -> Result<StageOutcome, StageError> {
        capture_flow::run(&*self, self.profile, ctx, actions).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::progress::mock::{unit_id, MockProgress};
    use crate::progress::UnitSubmission;
    use crate::stage::testing::Harness;
    use crate::stage::{CompletionReason, StageEvent, StageReport};
    use crate::timer::TimerScope;

    fn interview() -> InterviewStage {
        InterviewStage::new(StageId::Speech, 60, 900)
    }

    #[tokio::test(start_paused = true)]
    async fn session_cap_mid_recording_submits_once_and_skips_the_rest() {
        let mut h = Harness::new(MockProgress::new().with_units(StageId::Speech, 5));
        let task = h.spawn(interview());

        h.record_for(Duration::from_secs(20)).await;
        h.act(UserAction::NextUnit).await;
        h.record_for(Duration::from_secs(20)).await;
        h.act(UserAction::NextUnit).await;

        // Start unit 2 thirty seconds before the 900 s cap.
        let elapsed = 40;
        tokio::time::sleep(Duration::from_secs(870 - elapsed)).await;
        h.act(UserAction::StartCapture).await;
        h.mic.feed(&vec![0.2; 8_000]);

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Completed(StageReport {
                stage: StageId::Speech,
                reason: CompletionReason::Forced(TimerScope::Session),
                answered: 3,
                total: 5,
                dispatched: 3,
            })
        );

        h.settle().await;
        let submitted: Vec<_> = h
            .progress
            .submissions(StageId::Speech)
            .into_iter()
            .map(|s| match s {
                UnitSubmission::Recording { unit_id, .. } => unit_id,
                other => panic!("unexpected submission {other:?}"),
            })
            .collect();
        assert_eq!(
            submitted,
            vec![
                unit_id(StageId::Speech, 0),
                unit_id(StageId::Speech, 1),
                unit_id(StageId::Speech, 2)
            ]
        );
        // One stop per capture, and the microphone is free again.
        assert_eq!(h.mic.releases(), 3);
        assert!(!h.recorder_busy());

        let stops = h
            .events()
            .iter()
            .filter(|e| matches!(e, StageEvent::CaptureStopped { index: 2, .. }))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn prompts_are_narrated_on_presentation() {
        let mut h = Harness::new(MockProgress::new().with_units(StageId::Speech, 2));
        let task = h.spawn(interview());

        h.settle().await;
        assert_eq!(h.progress.narrations(), vec!["speech question 1".to_string()]);

        h.record_for(Duration::from_secs(2)).await;
        h.act(UserAction::NextUnit).await;
        assert_eq!(
            h.progress.narrations(),
            vec!["speech question 1".to_string(), "speech question 2".to_string()]
        );

        h.close();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_unit_timeout_racing_stop_only_once() {
        let mut h = Harness::new(MockProgress::new().with_units(StageId::Speech, 1));
        let task = h.spawn(interview());

        h.act(UserAction::StartCapture).await;
        tokio::time::sleep(Duration::from_secs(60) - Duration::from_millis(10)).await;
        // Stop lands in the same instant the unit window closes.
        h.act(UserAction::StopCapture).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        h.settle().await;
        assert_eq!(h.progress.submissions(StageId::Speech).len(), 1);
        assert_eq!(h.mic.releases(), 1);

        h.act(UserAction::NextUnit).await;
        match task.await.unwrap().unwrap() {
            StageOutcome::Completed(report) => {
                assert_eq!(report.reason, CompletionReason::Voluntary);
                assert_eq!(report.dispatched, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_while_recording_is_rejected() {
        let mut h = Harness::new(MockProgress::new().with_units(StageId::Speech, 2));
        let task = h.spawn(interview());

        h.act(UserAction::StartCapture).await;
        h.act(UserAction::StartCapture).await;
        h.act(UserAction::NextUnit).await;

        let events = h.events();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, StageEvent::CaptureStarted { .. }))
                .count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, StageEvent::Rejected { .. }))
                .count(),
            2
        );
        assert_eq!(h.mic.opens(), 1);

        h.close();
        task.await.unwrap().unwrap();
    }
}
