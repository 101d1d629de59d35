use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::path::Path;
use tracing::info;

use super::run::open_runner;
use crate::core::config::RunnerConfig;
use crate::core::extract::extract_candidates;
use crate::core::schedule::retry_run_at;
use crate::core::store::{JobStatus, Store, USER_CANCEL_MESSAGE, format_ts};
use crate::core::terminal::{GuideSection, print_success, print_warn};
use crate::logging::RunLogSlot;

/// Marks a running run cancelled by the user and, when its job is still
/// marked running, moves the job to cancelled. A future slot is kept; a
/// passed one moves to the next cadence slot. Returns false if the run had
/// already finished.
pub(super) async fn cancel_run(store: &Store, run_id: i64) -> Result<bool> {
    let run = store
        .get_job_run(run_id)
        .await?
        .ok_or_else(|| anyhow!("run {} not found", run_id))?;

    if !store.cancel_job_run(run_id, USER_CANCEL_MESSAGE).await? {
        return Ok(false);
    }
    info!(run_id, job_id = run.job_id, "run cancelled by user");

    if let Some(job) = store.get_job(run.job_id).await?
        && job.status == JobStatus::Running
    {
        let next_run_at = if job.is_one_time {
            None
        } else {
            retry_run_at(job.frequency, job.next_run_at.as_deref(), Utc::now()).map(format_ts)
        };
        store
            .update_job_status(job.id, JobStatus::Cancelled, None, next_run_at.as_deref())
            .await?;
    }
    Ok(true)
}

pub async fn run_cancel(config: &RunnerConfig, run_id: i64) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    if cancel_run(&store, run_id).await? {
        print_success(&format!("Run {} cancelled.", run_id));
    } else {
        print_warn(&format!("Run {} is not running; nothing to cancel.", run_id));
    }
    Ok(())
}

pub async fn run_process_articles(
    config: &RunnerConfig,
    log: RunLogSlot,
    job_id: i64,
    file: &Path,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;
    let candidates = extract_candidates(&text)
        .with_context(|| format!("parse articles from {}", file.display()))?;

    let runner = open_runner(config, log)?;
    let counts = runner.process_articles(job_id, &candidates).await?;

    GuideSection::new("Articles Processed")
        .status("Job", &job_id.to_string())
        .status("Candidates", &candidates.len().to_string())
        .status("Saved", &counts.saved.to_string())
        .status("Duplicates", &counts.duplicates.to_string())
        .print();
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schedule::Frequency;
    use crate::core::store::{NewJob, RunStatus, now_ts};

    async fn running_job(store: &Store) -> (i64, i64) {
        let job = store
            .create_job(&NewJob {
                user_id: 5,
                name: "Markets".to_string(),
                prompt: "p".to_string(),
                frequency: Frequency::Weekly,
                ..Default::default()
            })
            .await
            .unwrap();
        let run = store.create_job_run(job.id).await.unwrap();
        store
            .update_job_status(job.id, JobStatus::Running, None, None)
            .await
            .unwrap();
        (job.id, run.id)
    }

    #[tokio::test]
    async fn cancel_marks_run_and_running_job() {
        let store = Store::open_in_memory().unwrap();
        let (job_id, run_id) = running_job(&store).await;
        let before = store.get_job(job_id).await.unwrap().unwrap();

        assert!(cancel_run(&store, run_id).await.unwrap());

        let run = store.get_job_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.error_message.as_deref(), Some(USER_CANCEL_MESSAGE));
        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.next_run_at, before.next_run_at);
    }

    #[tokio::test]
    async fn cancelling_an_overdue_job_does_not_make_it_due_again() {
        let store = Store::open_in_memory().unwrap();
        let (job_id, run_id) = running_job(&store).await;
        store
            .update_job_status(job_id, JobStatus::Running, None, Some("2020-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(cancel_run(&store, run_id).await.unwrap());

        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.next_run_at.as_deref().unwrap() > now_ts().as_str());
        assert!(store.due_jobs(&now_ts()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_for_finished_runs() {
        let store = Store::open_in_memory().unwrap();
        let (job_id, run_id) = running_job(&store).await;
        store
            .complete_job_run(run_id, RunStatus::Completed, None, 2, 0)
            .await
            .unwrap();
        store
            .update_job_status(job_id, JobStatus::Completed, None, None)
            .await
            .unwrap();

        assert!(!cancel_run(&store, run_id).await.unwrap());
        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        assert!(cancel_run(&store, 404).await.is_err());
    }
}
