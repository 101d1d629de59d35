use anyhow::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::process::Child;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use super::reconcile::{resume_interrupted, spawn_detached};
use crate::core::config::RunnerConfig;
use crate::core::store::{JobRecord, Store, now_ts};
use crate::core::terminal::GuideSection;

pub const DEFAULT_TICK_SECS: u64 = 60;
const SCHEDULER_LOG: &str = "scheduler.log";

/// Due jobs that have no child process of ours still alive.
fn launchable(due: &[JobRecord], busy: &HashSet<i64>) -> Vec<i64> {
    due.iter()
        .map(|job| job.id)
        .filter(|id| !busy.contains(id))
        .collect()
}

struct Dispatcher {
    store: Store,
    config: RunnerConfig,
    /// Live children keyed by job id. Resume children from startup are kept
    /// under their run's job id too.
    children: Mutex<HashMap<i64, Child>>,
}

impl Dispatcher {
    /// Drops children that have exited and returns the job ids still busy.
    async fn reap(&self) -> HashSet<i64> {
        let mut children = self.children.lock().await;
        children.retain(|job_id, child| match child.try_wait() {
            Ok(Some(status)) => {
                info!(job_id, %status, "job process exited");
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(job_id, error = %e, "poll job process");
                false
            }
        });
        children.keys().copied().collect()
    }

    async fn tick(&self) -> Result<usize> {
        let busy = self.reap().await;
        match self.store.schedule_unscheduled_jobs(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "scheduled new jobs"),
            Err(e) => warn!(error = %e, "schedule new jobs"),
        }
        let due = self.store.due_jobs(&now_ts()).await?;
        let log_path = self.config.logs_dir.join(SCHEDULER_LOG);

        let mut launched = 0;
        for job_id in launchable(&due, &busy) {
            let args = vec!["run-job".to_string(), job_id.to_string()];
            match spawn_detached(&args, &log_path) {
                Ok(child) => {
                    info!(job_id, pid = child.id(), "launched job run");
                    self.children.lock().await.insert(job_id, child);
                    launched += 1;
                }
                Err(e) => error!(job_id, error = %e, "launch job run"),
            }
        }
        Ok(launched)
    }
}

/// Resumes interrupted runs once, then launches due jobs on every tick until
/// interrupted.
pub async fn run_scheduler(config: &RunnerConfig, tick: Duration) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let dispatcher = Arc::new(Dispatcher {
        store: store.clone(),
        config: config.clone(),
        children: Mutex::new(HashMap::new()),
    });

    for (run_id, child) in resume_interrupted(&store, config).await? {
        match store.get_job_run(run_id).await? {
            Some(run) => {
                dispatcher.children.lock().await.insert(run.job_id, child);
            }
            None => warn!(run_id, "resumed run vanished"),
        }
    }

    let scheduler = JobScheduler::new().await?;
    let ticker = dispatcher.clone();
    let job = Job::new_repeated_async(tick, move |_uuid, mut _l| {
        let dispatcher = ticker.clone();
        Box::pin(async move {
            if let Err(e) = dispatcher.tick().await {
                error!(error = %e, "scheduler tick");
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    GuideSection::new("Scheduler Started")
        .status("Database", &config.db_path.display().to_string())
        .status("Tick", &format!("every {}s", tick.as_secs()))
        .blank()
        .info("Press Ctrl+C to stop. Running jobs keep going.")
        .print();
    println!();

    // First pass right away instead of waiting a full tick.
    if let Err(e) = dispatcher.tick().await {
        error!(error = %e, "scheduler tick");
    }

    tokio::signal::ctrl_c().await?;
    info!("scheduler stopping");
    let mut scheduler = scheduler;
    scheduler.shutdown().await?;
    Ok(())
}
