use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::config::RunnerConfig;
use crate::core::conversation::{ConversationService, TROUBLESHOOT_IDENTITY};
use crate::core::store::{ProblemRun, Store, format_ts};

#[derive(Debug, Clone)]
pub struct TroubleshootOptions {
    pub lookback: Duration,
    /// Where the agent is asked to write its report.
    pub log_dir: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct TroubleshootReport {
    pub problems: Vec<ProblemRun>,
    pub conversation_id: Option<String>,
}

pub fn build_troubleshoot_prompt(
    problems: &[ProblemRun],
    options: &TroubleshootOptions,
    config: &RunnerConfig,
    now: DateTime<Utc>,
) -> String {
    let mut prompt = format!(
        "I need you to troubleshoot issues with the news job runs. Here are the problematic runs from the last {} hours:\n\n",
        options.lookback.num_hours()
    );

    for p in problems {
        let _ = writeln!(prompt, "- Run ID {} (Job '{}', ID {}):", p.run_id, p.job_name, p.job_id);
        let _ = writeln!(prompt, "  Status: {}", p.status);
        let _ = writeln!(prompt, "  Started: {}", p.started_at);
        if !p.completed_at.is_empty() {
            let _ = writeln!(prompt, "  Completed: {}", p.completed_at);
        }
        let _ = writeln!(prompt, "  Articles retrieved: {}", p.article_count);
        if !p.error_message.is_empty() {
            let _ = writeln!(prompt, "  Error: {}", p.error_message);
        }
        prompt.push('\n');
    }

    let _ = write!(
        prompt,
        "
Please investigate:
1. Read the per-run log files for these runs: {logs}/run_<run_id>_*.log
2. Check if the conversations were created and completed properly
3. Look for patterns in failures (timeouts, JSON parsing, network issues)
4. Suggest fixes if you find systematic issues

Key files:
- {db} - The database
- {logs} - Per-run logs
- Agent API at {api}

When you've completed your investigation, write a troubleshooting report to:
  {report_dir}/report-{date}.md

The report should include:
- Summary of issues found
- Root cause analysis
- Recommended fixes
- Any actions you took

Start by examining the logs for the most recent failed run.",
        logs = config.logs_dir.display(),
        db = config.db_path.display(),
        api = config.agent_api,
        report_dir = options.log_dir.display(),
        date = now.format("%Y-%m-%d"),
    );

    prompt
}

fn absolute(dir: &Path) -> PathBuf {
    std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// Scans recent runs and, unless dry-running, opens one diagnostic
/// conversation listing them. No problems means no conversation.
pub async fn troubleshoot(
    store: &Store,
    agent: &dyn ConversationService,
    config: &RunnerConfig,
    options: &TroubleshootOptions,
    now: DateTime<Utc>,
) -> Result<TroubleshootReport> {
    tokio::fs::create_dir_all(&options.log_dir)
        .await
        .with_context(|| format!("create log dir {}", options.log_dir.display()))?;
    let options = TroubleshootOptions {
        log_dir: absolute(&options.log_dir),
        ..options.clone()
    };

    let since = format_ts(now - options.lookback);
    let problems = store
        .find_problem_runs(&since)
        .await
        .context("find problem runs")?;
    let mut report = TroubleshootReport {
        problems,
        conversation_id: None,
    };

    if report.problems.is_empty() {
        info!(lookback_hours = options.lookback.num_hours(), "no problematic runs found");
        return Ok(report);
    }

    info!(count = report.problems.len(), "found problematic runs");
    for p in &report.problems {
        info!(
            run_id = p.run_id,
            job_id = p.job_id,
            job_name = %p.job_name,
            status = %p.status,
            articles = p.article_count,
            error = %p.error_message,
            "problem run"
        );
    }

    if options.dry_run {
        info!("dry run - not creating conversation");
        return Ok(report);
    }

    let prompt = build_troubleshoot_prompt(&report.problems, &options, config, now);
    let conversation_id = agent
        .create(TROUBLESHOOT_IDENTITY, &prompt)
        .await
        .context("create conversation")?;
    info!(conversation_id = %conversation_id, "created troubleshooting conversation");
    report.conversation_id = Some(conversation_id);
    Ok(report)
}
