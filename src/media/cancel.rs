use tokio_util::sync::CancellationToken;

use crate::error::TranscodeError;

/// Cancellation for one run.
///
/// The caller's token is the parent. Stages watch a child of it, so a stage
/// failure can stop its siblings without looking like a user cancel.
#[derive(Clone, Debug)]
pub struct CancelController {
    user: CancellationToken,
    stages: CancellationToken,
}

impl CancelController {
    pub fn new() -> Self {
        let user = CancellationToken::new();
        let stages = user.child_token();
        Self { user, stages }
    }

    /// Requested by the caller.
    pub fn cancel(&self) {
        self.user.cancel();
    }

    /// Called when a stage fails.
    pub fn fail(&self) {
        self.stages.cancel();
    }

    pub fn is_user_cancelled(&self) -> bool {
        self.user.is_cancelled()
    }

    pub fn stage_token(&self) -> CancellationToken {
        self.stages.clone()
    }
}

impl Default for CancelController {
    fn default() -> Self {
        Self::new()
    }
}

/// Stages call this between units of work.
pub fn checkpoint(token: &CancellationToken) -> Result<(), TranscodeError> {
    if token.is_cancelled() {
        Err(TranscodeError::Cancel)
    } else {
        Ok(())
    }
}
