use anyhow::{Result, bail};
use console::style;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::config::RunnerConfig;
use crate::core::conversation::{AgentClient, ConversationService};
use crate::core::runner::{RunExit, Runner};
use crate::core::store::{RunStatus, Store};
use crate::core::terminal::GuideSection;
use crate::logging::RunLogSlot;

/// How long a signalled run gets to unwind before the process gives up on it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub(super) fn open_runner(config: &RunnerConfig, log: RunLogSlot) -> Result<Runner> {
    let store = Store::open(&config.db_path)?;
    let agent: Arc<dyn ConversationService> = Arc::new(AgentClient::new(&config.agent_api)?);
    Ok(Runner::new(config.clone(), store, agent)?.with_log_slot(log))
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Drives `run` to completion unless a shutdown signal arrives first, in
/// which case `cancel` fires and the run gets [`SHUTDOWN_GRACE`] to return.
async fn until_signalled<F>(run: F, cancel: CancellationToken) -> Result<RunExit>
where
    F: Future<Output = Result<RunExit>>,
{
    tokio::pin!(run);
    tokio::select! {
        exit = &mut run => return exit,
        _ = shutdown_signal() => {
            warn!("shutdown signal received, cancelling run");
            cancel.cancel();
        }
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, run).await {
        Ok(exit) => exit,
        Err(_) => bail!(
            "run did not stop within {}s of the shutdown signal",
            SHUTDOWN_GRACE.as_secs()
        ),
    }
}

fn report_exit(exit: RunExit) -> Result<()> {
    match exit {
        RunExit::Finished(report) => {
            let status = match report.status {
                RunStatus::Completed | RunStatus::CompletedNoNew => {
                    style(report.status.as_str()).green().bold()
                }
                _ => style(report.status.as_str()).red().bold(),
            };
            let mut section = GuideSection::new("Run Finished")
                .status("Run", &report.run_id.to_string())
                .status("Job", &report.job_id.to_string())
                .status("Status", &status.to_string())
                .status("New articles", &report.articles_saved.to_string())
                .status("Duplicates", &report.duplicates_skipped.to_string());
            if let Some(error) = &report.error {
                section = section.status("Error", error);
            }
            section.print();
            println!();
            Ok(())
        }
        RunExit::Interrupted { run_id } => bail!(
            "run {} interrupted and left running; continue it with `newsrunner resume {}`",
            run_id,
            run_id
        ),
    }
}

pub async fn run_job(config: &RunnerConfig, log: RunLogSlot, job_id: i64) -> Result<()> {
    let runner = open_runner(config, log)?;
    let cancel = CancellationToken::new();
    let exit = until_signalled(runner.run(job_id, &cancel), cancel.clone()).await?;
    report_exit(exit)
}

pub async fn resume_run(config: &RunnerConfig, log: RunLogSlot, run_id: i64) -> Result<()> {
    let runner = open_runner(config, log)?;
    let cancel = CancellationToken::new();
    let exit = until_signalled(runner.resume(run_id, &cancel), cancel.clone()).await?;
    report_exit(exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::RunReport;

    #[tokio::test]
    async fn finished_run_passes_through_without_signal() {
        let exit = until_signalled(
            async {
                Ok(RunExit::Finished(RunReport {
                    run_id: 4,
                    job_id: 2,
                    status: RunStatus::Failed,
                    articles_saved: 0,
                    duplicates_skipped: 0,
                    error: Some("create conversation: API error 503".to_string()),
                }))
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

        // Terminal failures still exit cleanly.
        assert!(report_exit(exit).is_ok());
    }

    #[test]
    fn interrupted_run_is_an_error_naming_the_resume_command() {
        let err = report_exit(RunExit::Interrupted { run_id: 9 }).unwrap_err();
        assert!(err.to_string().contains("newsrunner resume 9"));
    }
}
