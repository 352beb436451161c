//! Listening stage: play a stimulus, record the spoken response.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::capture_flow::{self, CaptureProfile, Prompting};
use super::{StageContext, StageEngine, StageError, StageId, StageOutcome, UserAction};

pub struct AudioResponseStage {
    profile: CaptureProfile,
}

impl AudioResponseStage {
    pub fn new(stage: StageId, unit_secs: u32, session_secs: u32) -> Self {
        Self {
            profile: CaptureProfile {
                stage,
                unit_secs,
                session_secs,
                prompting: Prompting::Stimulus,
            },
        }
    }
}

#[async_trait]
impl StageEngine for AudioResponseStage {
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
