//! Drives one job run from start to a persisted terminal status.
//!
//! `run` starts a fresh run for a job; `resume` picks up a run that an earlier
//! process left in `running`. Both converge on [`Runner::execute`]. A
//! cancellation while polling returns [`RunExit::Interrupted`] without touching
//! the run row so the next `resume` can continue it.

mod articles;
mod phase;
mod prompt;

#[cfg(test)]
mod tests;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::RunnerConfig;
use crate::core::content::ContentFetcher;
use crate::core::conversation::{Conversation, ConversationService, job_identity};
use crate::core::extract::{ExtractError, extract_candidates};
use crate::core::notify::{Notifier, RunOutcome, build_message};
use crate::core::schedule::retry_run_at;
use crate::core::store::{
    JobRecord, JobStatus, Preferences, RunStatus, Store, format_ts, now_ts,
};
use crate::logging::RunLogSlot;

pub use articles::PersistCounts;
pub use phase::{RunPhase, can_transition};
pub use prompt::build_prompt;

/// Terminal failures of a run. The display text is stored as the run's
/// error message.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("create conversation: {0}")]
    ConversationCreate(String),
    #[error("job timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("failed to extract articles: {0}")]
    Extraction(#[from] ExtractError),
    #[error("{0}")]
    Setup(String),
}

/// What `execute` produced before finalization.
#[derive(Debug, Default)]
pub struct JobResult {
    pub articles_saved: i64,
    pub duplicates_skipped: i64,
    pub conversation_id: Option<String>,
    pub error: Option<RunError>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: i64,
    pub job_id: i64,
    pub status: RunStatus,
    pub articles_saved: i64,
    pub duplicates_skipped: i64,
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum RunExit {
    Finished(RunReport),
    /// Cancelled mid-run; the run row is still `running`.
    Interrupted { run_id: i64 },
}

enum PollStop {
    Cancelled,
    TimedOut,
}

/// Logs phase changes for one run and refuses illegal ones.
struct PhaseTracker {
    run_id: i64,
    current: RunPhase,
}

impl PhaseTracker {
    fn new(run_id: i64) -> Self {
        Self {
            run_id,
            current: RunPhase::Starting,
        }
    }

    fn advance(&mut self, to: RunPhase) {
        if !can_transition(self.current, to) {
            warn!(
                run_id = self.run_id,
                from = self.current.as_str(),
                to = to.as_str(),
                "refusing illegal run phase transition"
            );
            return;
        }
        if self.current != to {
            info!(
                run_id = self.run_id,
                from = self.current.as_str(),
                to = to.as_str(),
                "run phase"
            );
            self.current = to;
        }
    }
}

pub struct Runner {
    config: RunnerConfig,
    store: Store,
    agent: Arc<dyn ConversationService>,
    fetcher: ContentFetcher,
    notifier: Notifier,
    log: RunLogSlot,
}

impl Runner {
    pub fn new(config: RunnerConfig, store: Store, agent: Arc<dyn ConversationService>) -> Result<Self> {
        let fetcher = ContentFetcher::new(config.max_parallel)?;
        Ok(Self {
            config,
            store,
            agent,
            fetcher,
            notifier: Notifier::new(),
            log: RunLogSlot::default(),
        })
    }

    pub(crate) fn with_log_slot(mut self, log: RunLogSlot) -> Self {
        self.log = log;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub async fn run(&self, job_id: i64, cancel: &CancellationToken) -> Result<RunExit> {
        if !self.config.start_delay.is_zero() {
            let max_ms = self.config.start_delay.as_millis().max(1) as u64;
            let delay = Duration::from_millis(rand::thread_rng().gen_range(0..max_ms));
            info!(job_id, ?delay, "delaying job start");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => bail!("cancelled before job {} started", job_id),
            }
        }

        let job = self.load_job(job_id).await?;
        let prefs = self.load_preferences(&job).await?;

        match self.store.cancel_orphaned_runs(job_id, None).await {
            Ok(0) => {}
            Ok(n) => info!(job_id, cancelled = n, "cancelled orphaned runs"),
            Err(e) => warn!(job_id, error = %e, "cancel orphaned runs"),
        }

        let run = self.store.create_job_run(job_id).await?;
        self.store
            .update_job_status(job_id, JobStatus::Running, None, None)
            .await?;

        let log_path = self.config.logs_dir.join(format!(
            "run_{}_{}.log",
            run.id,
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        self.store
            .set_run_log_path(run.id, &log_path.to_string_lossy())
            .await?;
        if let Err(e) = self.log.attach(&log_path, false) {
            warn!(run_id = run.id, error = %e, "setup run log");
        }

        info!(job_id, run_id = run.id, job_name = %job.name, "job run started");
        let exit = self.drive(&job, &prefs, run.id, cancel).await;
        self.log.detach();
        exit
    }

    pub async fn resume(&self, run_id: i64, cancel: &CancellationToken) -> Result<RunExit> {
        let run = self
            .store
            .get_job_run(run_id)
            .await?
            .ok_or_else(|| anyhow!("run {} not found", run_id))?;
        if run.status != RunStatus::Running {
            bail!(
                "run {} is not in running state (status: {})",
                run_id,
                run.status.as_str()
            );
        }

        let job = self.load_job(run.job_id).await?;
        let prefs = self.load_preferences(&job).await?;

        // Never leave two running rows for one job.
        if let Err(e) = self.store.cancel_orphaned_runs(job.id, Some(run_id)).await {
            warn!(job_id = job.id, error = %e, "cancel orphaned runs");
        }
        // A concurrent run or resume of the same job may have superseded this one.
        if self.store.run_status(run_id).await? != Some(RunStatus::Running) {
            if self.store.release_idle_job(job.id).await? {
                info!(job_id = job.id, "released job with no running runs");
            }
            bail!("run {} is no longer running", run_id);
        }

        let log_path = if run.log_path.is_empty() {
            let path = self
                .config
                .logs_dir
                .join(format!("run_{}_{}.log", run_id, Utc::now().format("%Y%m%d_%H%M%S")));
            self.store
                .set_run_log_path(run_id, &path.to_string_lossy())
                .await?;
            path
        } else {
            run.log_path.clone().into()
        };
        if let Err(e) = self.log.attach(&log_path, true) {
            warn!(run_id, error = %e, "setup run log");
        }

        info!(job_id = job.id, run_id, job_name = %job.name, "resuming job run");
        let exit = self.drive(&job, &prefs, run_id, cancel).await;
        self.log.detach();
        exit
    }

    async fn drive(
        &self,
        job: &JobRecord,
        prefs: &Preferences,
        run_id: i64,
        cancel: &CancellationToken,
    ) -> Result<RunExit> {
        let mut phases = PhaseTracker::new(run_id);
        let result = self.execute(job, prefs, &mut phases, cancel).await;

        if cancel.is_cancelled() {
            info!(run_id, "run cancelled, leaving it running for resume");
            return Ok(RunExit::Interrupted { run_id });
        }

        let report = self.finalize(job, prefs, run_id, result, &mut phases).await?;
        Ok(RunExit::Finished(report))
    }

    async fn load_job(&self, job_id: i64) -> Result<JobRecord> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| anyhow!("job {} not found", job_id))
    }

    async fn load_preferences(&self, job: &JobRecord) -> Result<Preferences> {
        Ok(self
            .store
            .get_preferences(job.user_id)
            .await?
            .unwrap_or_else(|| Preferences {
                user_id: job.user_id,
                ..Default::default()
            }))
    }

    async fn execute(
        &self,
        job: &JobRecord,
        prefs: &Preferences,
        phases: &mut PhaseTracker,
        cancel: &CancellationToken,
    ) -> JobResult {
        let mut result = JobResult::default();
        let prompt = build_prompt(job, prefs);

        let articles_dir = self.job_articles_dir(job.id);
        if let Err(e) = tokio::fs::create_dir_all(&articles_dir).await {
            result.error = Some(RunError::Setup(format!("create articles dir: {}", e)));
            return result;
        }

        phases.advance(RunPhase::ConversationPending);
        let conversation_id = match self.resolve_conversation(job, &prompt).await {
            Ok(id) => id,
            Err(e) => {
                warn!(job_id = job.id, error = %e, "conversation unavailable");
                result.error = Some(e);
                return result;
            }
        };
        result.conversation_id = Some(conversation_id.clone());
        if let Err(e) = self
            .store
            .set_job_conversation(job.id, Some(&conversation_id))
            .await
        {
            warn!(job_id = job.id, error = %e, "store conversation reference");
        }

        phases.advance(RunPhase::Polling);
        let conversation = match self.poll_for_completion(job.id, &conversation_id, cancel).await {
            Ok(conversation) => conversation,
            Err(PollStop::Cancelled) => return result,
            Err(PollStop::TimedOut) => {
                result.error = Some(RunError::Timeout(self.config.job_timeout));
                return result;
            }
        };

        phases.advance(RunPhase::Extracting);
        let candidates = match extract_candidates(&conversation.last_agent_text()) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(job_id = job.id, error = %e, "extract articles JSON");
                result.error = Some(RunError::Extraction(e));
                return result;
            }
        };
        info!(job_id = job.id, count = candidates.len(), "extracted candidates");

        if !candidates.is_empty() {
            phases.advance(RunPhase::FetchingContent);
            let counts = self
                .persist_candidates(job, &candidates, &articles_dir)
                .await;
            result.articles_saved = counts.saved;
            result.duplicates_skipped = counts.duplicates;
        }

        self.archive_conversation(job.id, &conversation_id).await;
        result
    }

    /// Reuses the job's in-flight conversation when there is one, otherwise
    /// opens a new one. A stale or finished reference is discarded.
    async fn resolve_conversation(&self, job: &JobRecord, prompt: &str) -> Result<String, RunError> {
        let identity = job_identity(job.id);

        if let Some(existing) = job.conversation_ref() {
            info!(conversation_id = existing, "checking existing conversation");
            match self.agent.get(&identity, existing).await {
                Ok(conversation) if !conversation.is_complete() => {
                    info!(conversation_id = existing, "resuming existing conversation");
                    return Ok(existing.to_string());
                }
                Ok(_) => info!("existing conversation already complete, creating new"),
                Err(e) => info!(error = %e, "existing conversation not found, creating new"),
            }
        }

        let id = self
            .agent
            .create(&identity, prompt)
            .await
            .map_err(|e| RunError::ConversationCreate(format!("{:#}", e)))?;
        info!(conversation_id = %id, "created conversation");
        Ok(id)
    }

    /// Waits one interval, then checks status, until completion, timeout or
    /// cancellation. Errors from the service are logged and retried.
    async fn poll_for_completion(
        &self,
        job_id: i64,
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Conversation, PollStop> {
        let identity = job_identity(job_id);
        let interval = self.config.poll_interval.max(Duration::from_millis(1));
        let deadline = tokio::time::sleep(self.config.job_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut waited = Duration::ZERO;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PollStop::Cancelled),
                _ = &mut deadline => {
                    warn!(job_id, conversation_id, "job timed out, cancelling conversation");
                    if let Err(e) = self.agent.delete(&identity, conversation_id).await {
                        warn!(conversation_id, error = %e, "cancel conversation");
                    }
                    return Err(PollStop::TimedOut);
                }
                _ = ticker.tick() => {
                    waited += interval;
                    match self.agent.get(&identity, conversation_id).await {
                        Ok(conversation) if conversation.is_complete() => {
                            info!(?waited, "agent finished");
                            return Ok(conversation);
                        }
                        Ok(_) => debug!(?waited, "waiting for agent"),
                        Err(e) => warn!(?waited, error = %e, "poll conversation"),
                    }
                }
            }
        }
    }

    async fn archive_conversation(&self, job_id: i64, conversation_id: &str) {
        let identity = job_identity(job_id);
        info!(conversation_id, "archiving conversation");
        if let Err(e) = self.agent.archive(&identity, conversation_id).await {
            warn!(conversation_id, error = %e, "archive conversation");
        }

        let children = match self.agent.list_children(&identity, conversation_id).await {
            Ok(children) => children,
            Err(e) => {
                warn!(conversation_id, error = %e, "list subagents");
                return;
            }
        };
        for child in children {
            info!(conversation_id = %child, "archiving subagent");
            if let Err(e) = self.agent.archive(&identity, &child).await {
                warn!(conversation_id = %child, error = %e, "archive subagent");
            }
        }
    }

    async fn finalize(
        &self,
        job: &JobRecord,
        prefs: &Preferences,
        run_id: i64,
        result: JobResult,
        phases: &mut PhaseTracker,
    ) -> Result<RunReport> {
        phases.advance(RunPhase::Finalizing);
        let error = result.error.as_ref().map(ToString::to_string);

        let status = match &result.error {
            Some(_) => RunStatus::Failed,
            None if result.articles_saved == 0 => RunStatus::CompletedNoNew,
            None => RunStatus::Completed,
        };
        let report = RunReport {
            run_id,
            job_id: job.id,
            status,
            articles_saved: result.articles_saved,
            duplicates_skipped: result.duplicates_skipped,
            error: error.clone(),
        };

        let finalized = self
            .store
            .complete_job_run(
                run_id,
                status,
                error.as_deref(),
                result.articles_saved,
                result.duplicates_skipped,
            )
            .await?;
        if !finalized {
            let current = self.store.run_status(run_id).await?;
            info!(run_id, current_status = ?current, "run already finalized, skipping");
            if let Some(phase) = current.and_then(RunPhase::for_status) {
                phases.advance(phase);
            }
            return Ok(RunReport {
                status: current.unwrap_or(status),
                ..report
            });
        }

        let now = Utc::now();
        let next_run_at = if job.is_one_time {
            None
        } else if result.error.is_none() {
            Some(job.frequency.next_run_after(now))
        } else {
            retry_run_at(job.frequency, job.next_run_at.as_deref(), now)
        }
        .map(format_ts);
        let job_status = if result.error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        if job.is_one_time {
            self.store.deactivate_job(job.id).await?;
        }
        self.store
            .update_job_status(job.id, job_status, Some(&now_ts()), next_run_at.as_deref())
            .await?;
        self.store.set_job_conversation(job.id, None).await?;

        self.send_notification(job, prefs, &result).await;

        if let Some(phase) = RunPhase::for_status(status) {
            phases.advance(phase);
        }
        info!(
            run_id,
            status = status.as_str(),
            articles_saved = result.articles_saved,
            duplicates_skipped = result.duplicates_skipped,
            conversation_id = result.conversation_id.as_deref().unwrap_or(""),
            "job run completed"
        );
        Ok(report)
    }

    async fn send_notification(&self, job: &JobRecord, prefs: &Preferences, result: &JobResult) {
        if prefs.discord_webhook.is_empty() {
            return;
        }
        let error_text = result.error.as_ref().map(ToString::to_string);
        let outcome = match &error_text {
            Some(error) => RunOutcome::Failed {
                error: error.as_str(),
            },
            None => RunOutcome::Completed {
                articles_saved: result.articles_saved,
            },
        };
        let Some(message) =
            build_message(&job.name, &outcome, prefs.notify_success, prefs.notify_failure)
        else {
            return;
        };
        if let Err(e) = self.notifier.send(&prefs.discord_webhook, &message).await {
            warn!(job_id = job.id, error = %e, "send notification");
        }
    }
}
