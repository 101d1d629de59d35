use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_ATTEMPTS: u32 = 3;
pub const BASE_DELAY: Duration = Duration::from_secs(2);
/// Hard ceiling on requests, including rate-limited ones.
pub const MAX_REQUESTS: u32 = 10;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook failed with status {0}")]
    Status(u16),
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Outcome of a run as far as the notification text is concerned.
pub enum RunOutcome<'a> {
    Failed { error: &'a str },
    Completed { articles_saved: i64 },
}

/// Builds the message for a finished run, or `None` when the user's toggles
/// suppress it.
pub fn build_message(
    job_name: &str,
    outcome: &RunOutcome<'_>,
    notify_success: bool,
    notify_failure: bool,
) -> Option<String> {
    match outcome {
        RunOutcome::Failed { error } => {
            notify_failure.then(|| format!("❌ News job '{}' failed: {}", job_name, error))
        }
        RunOutcome::Completed { articles_saved: 0 } => notify_success
            .then(|| format!("ℹ️ News job '{}' completed - no new articles found", job_name)),
        RunOutcome::Completed { articles_saved } => notify_success.then(|| {
            format!(
                "✅ News job '{}' completed! ({} new articles)",
                job_name, articles_saved
            )
        }),
    }
}

/// Posts `{"content": message}` to a chat webhook with retry and backoff.
pub struct Notifier {
    client: reqwest::Client,
    base_delay: Duration,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_base_delay(BASE_DELAY)
    }

    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_delay,
        }
    }

    /// An empty webhook is a no-op. 200/204 succeed. 429 backs off without
    /// spending an attempt; other failures are retried up to [`MAX_ATTEMPTS`]
    /// times with a doubling delay, then the last error is returned.
    pub async fn send(&self, webhook: &str, message: &str) -> Result<(), NotifyError> {
        if webhook.trim().is_empty() {
            return Ok(());
        }

        let payload = json!({ "content": message });
        let mut delay = self.base_delay;
        let mut attempts = 0;
        let mut requests = 0;

        loop {
            requests += 1;
            let failure = match self.client.post(webhook).json(&payload).send().await {
                Ok(res) => {
                    let status = res.status().as_u16();
                    if status == 200 || status == 204 {
                        debug!(requests, "notification delivered");
                        return Ok(());
                    }
                    if status == 429 && requests < MAX_REQUESTS {
                        warn!(?delay, "webhook rate limited, backing off");
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }
                    NotifyError::Status(status)
                }
                Err(e) => NotifyError::Transport(e),
            };

            attempts += 1;
            if attempts >= MAX_ATTEMPTS || requests >= MAX_REQUESTS {
                return Err(failure);
            }
            warn!(attempt = attempts, error = %failure, "notification failed, retrying");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}
