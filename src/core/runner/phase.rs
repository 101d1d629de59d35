use crate::core::store::RunStatus;

/// In-process lifecycle of a single run. Only the terminal phases are
/// persisted (as [`RunStatus`]); intermediate phases exist for logging and
/// for rejecting out-of-order steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    ConversationPending,
    Polling,
    Extracting,
    FetchingContent,
    Finalizing,
    Completed,
    CompletedNoNew,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Starting => "starting",
            RunPhase::ConversationPending => "conversation_pending",
            RunPhase::Polling => "polling",
            RunPhase::Extracting => "extracting",
            RunPhase::FetchingContent => "fetching_content",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Completed => "completed",
            RunPhase::CompletedNoNew => "completed_no_new",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::CompletedNoNew | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    /// Terminal phase matching a persisted run status. A still-running row has
    /// no terminal phase.
    pub fn for_status(status: RunStatus) -> Option<Self> {
        match status {
            RunStatus::Running => None,
            RunStatus::Completed => Some(RunPhase::Completed),
            RunStatus::CompletedNoNew => Some(RunPhase::CompletedNoNew),
            RunStatus::Failed => Some(RunPhase::Failed),
            RunStatus::Cancelled => Some(RunPhase::Cancelled),
        }
    }
}

pub fn can_transition(from: RunPhase, to: RunPhase) -> bool {
    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }
    // Any failure short-circuits straight to finalization.
    if to == RunPhase::Finalizing {
        return true;
    }
    match from {
        RunPhase::Starting => matches!(to, RunPhase::ConversationPending),
        RunPhase::ConversationPending => matches!(to, RunPhase::Polling),
        RunPhase::Polling => matches!(to, RunPhase::Extracting),
        RunPhase::Extracting => matches!(to, RunPhase::FetchingContent),
        RunPhase::FetchingContent => false,
        RunPhase::Finalizing => to.is_terminal(),
        RunPhase::Completed | RunPhase::CompletedNoNew | RunPhase::Failed | RunPhase::Cancelled => {
            false
        }
    }
}
