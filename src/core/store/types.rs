use crate::core::schedule::Frequency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "stopped" => Some(JobStatus::Stopped),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    CompletedNoNew,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedNoNew => "completed_no_new",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "completed_no_new" => Some(RunStatus::CompletedNoNew),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub prompt: String,
    pub keywords: String,
    pub sources: String,
    pub region: String,
    pub frequency: Frequency,
    pub is_one_time: bool,
    pub is_active: bool,
    pub status: JobStatus,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub current_conversation_id: Option<String>,
}

impl JobRecord {
    /// The stored conversation reference, treating an empty string as absent.
    pub fn conversation_ref(&self) -> Option<&str> {
        self.current_conversation_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// Fields a caller supplies when creating a job; everything else is defaulted.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub user_id: i64,
    pub name: String,
    pub prompt: String,
    pub keywords: String,
    pub sources: String,
    pub region: String,
    pub frequency: Frequency,
    pub is_one_time: bool,
}

#[derive(Debug, Clone)]
pub struct JobRunRecord {
    pub id: i64,
    pub job_id: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub articles_saved: i64,
    pub duplicates_skipped: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub log_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct Preferences {
    pub user_id: i64,
    pub system_prompt: String,
    pub discord_webhook: String,
    pub notify_success: bool,
    pub notify_failure: bool,
}

#[derive(Debug, Clone)]
pub struct NewArticle<'a> {
    pub job_id: i64,
    pub user_id: i64,
    pub title: &'a str,
    pub url: &'a str,
    pub summary: &'a str,
    pub content_path: &'a str,
}

/// A run surfaced by the troubleshooting scan.
#[derive(Debug, Clone)]
pub struct ProblemRun {
    pub run_id: i64,
    pub job_id: i64,
    pub job_name: String,
    pub status: String,
    pub error_message: String,
    pub started_at: String,
    pub completed_at: String,
    pub article_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_matches_stored_values() {
        let jobs = [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Stopped,
            JobStatus::Cancelled,
        ];
        for status in jobs {
            assert_eq!(JobStatus::from_status(status.as_str()), Some(status));
        }
        let runs = [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::CompletedNoNew,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ];
        for status in runs {
            assert_eq!(RunStatus::from_status(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::CompletedNoNew.as_str(), "completed_no_new");
        assert_eq!(JobStatus::from_status("Running"), None);
    }
}
