use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::{info, warn};

use crate::core::config::RunnerConfig;
use crate::core::store::{ORPHAN_CANCEL_MESSAGE, Store};
use crate::core::terminal::{GuideSection, print_info};
use crate::platform::{NativePlatform, Platform};

pub(super) const RESUME_LOG: &str = "resume.log";

/// Starts `newsrunner <args>` as its own process group with stdout and
/// stderr appended to `log_path`.
pub(super) fn spawn_detached(args: &[String], log_path: &Path) -> Result<Child> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open {}", log_path.display()))?;

    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file);
    NativePlatform::detach(&mut cmd);
    Ok(cmd.spawn()?)
}

/// Splits `(run_id, job_id)` pairs into the newest run of each job, in run
/// order, and the older runs of the same jobs.
fn newest_per_job(runs: &[(i64, i64)]) -> (Vec<(i64, i64)>, Vec<i64>) {
    let mut newest: BTreeMap<i64, i64> = BTreeMap::new();
    for &(run_id, job_id) in runs {
        let entry = newest.entry(job_id).or_insert(run_id);
        *entry = (*entry).max(run_id);
    }
    let superseded = runs
        .iter()
        .filter(|(run_id, job_id)| newest.get(job_id) != Some(run_id))
        .map(|&(run_id, _)| run_id)
        .collect();
    let mut keep: Vec<(i64, i64)> = newest.into_iter().map(|(job_id, run_id)| (run_id, job_id)).collect();
    keep.sort_unstable();
    (keep, superseded)
}

/// Spawns one `resume` child per job that still has a run marked running.
/// Older running rows of the same job are cancelled first. Returns the
/// children so a long-lived caller can reap them.
pub(super) async fn resume_interrupted(store: &Store, config: &RunnerConfig) -> Result<Vec<(i64, Child)>> {
    let runs: Vec<(i64, i64)> = store
        .list_running_runs()
        .await?
        .iter()
        .map(|r| (r.id, r.job_id))
        .collect();
    if runs.is_empty() {
        info!("no interrupted runs to resume");
        return Ok(Vec::new());
    }

    let (resumable, superseded) = newest_per_job(&runs);
    for run_id in superseded {
        match store.cancel_job_run(run_id, ORPHAN_CANCEL_MESSAGE).await {
            Ok(_) => info!(run_id, "cancelled superseded run"),
            Err(e) => warn!(run_id, error = %e, "cancel superseded run"),
        }
    }

    info!(count = resumable.len(), "resuming interrupted runs");
    let log_path = config.logs_dir.join(RESUME_LOG);
    let mut children = Vec::new();
    for (run_id, job_id) in resumable {
        let args = vec!["resume".to_string(), run_id.to_string()];
        match spawn_detached(&args, &log_path) {
            Ok(child) => {
                info!(run_id, job_id, pid = child.id(), "spawned resume");
                children.push((run_id, child));
            }
            Err(e) => warn!(run_id, error = %e, "spawn resume"),
        }
    }
    Ok(children)
}

pub async fn run_reconcile(config: &RunnerConfig) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let children = resume_interrupted(&store, config).await?;
    if children.is_empty() {
        print_info("No interrupted runs to resume.");
        return Ok(());
    }

    let mut section = GuideSection::new("Reconcile");
    for (run_id, child) in &children {
        section = section.status(&format!("Run {}", run_id), &format!("resuming (PID {})", child.id()));
    }
    section
        .blank()
        .info(&format!(
            "Output is appended to {}",
            config.logs_dir.join(RESUME_LOG).display()
        ))
        .print();
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_newest_run_of_each_job_is_resumed() {
        let runs = [(3, 1), (4, 2), (7, 1), (9, 1)];
        let (keep, superseded) = newest_per_job(&runs);
        assert_eq!(keep, vec![(4, 2), (9, 1)]);
        assert_eq!(superseded, vec![3, 7]);

        let (keep, superseded) = newest_per_job(&[]);
        assert!(keep.is_empty());
        assert!(superseded.is_empty());
    }
}
