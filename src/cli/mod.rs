mod maintenance;
mod reconcile;
mod run;
mod runs;
mod scheduler;

use anyhow::{Result, anyhow};
use console::style;
use std::path::Path;
use std::time::Duration;

use crate::core::config::RunnerConfig;
use crate::core::maintenance::{DEFAULT_CLEANUP_MAX_AGE_HOURS, DEFAULT_TROUBLESHOOT_LOOKBACK_HOURS};
use crate::core::terminal::GuideSection;
use crate::logging;

fn print_help() {
    GuideSection::new("Runs")
        .command("run-job <job_id>", "Execute one run of a job")
        .command("resume <run_id>", "Continue a run left in the running state")
        .command("cancel-run <run_id>", "Mark a running run as cancelled")
        .command(
            "process-articles <job_id> <file>",
            "Fetch and store articles from a JSON file",
        )
        .print();

    GuideSection::new("Scheduling")
        .command("reconcile", "Resume every interrupted run in the background")
        .command("scheduler [--tick-secs N]", "Launch due jobs on a timer")
        .print();

    GuideSection::new("Maintenance")
        .command("cleanup [--max-age H] [--dry-run]", "Delete old agent conversations")
        .command(
            "troubleshoot [--lookback H] [--log-dir D] [--dry-run]",
            "Open a diagnostic conversation about failed runs",
        )
        .print();

    println!(
        "\n {} {} <command> [args]\n",
        style("Usage:").bold(),
        style("newsrunner").green()
    );
}

pub(crate) fn parse_id(args: &[String], index: usize, what: &str) -> Result<i64> {
    let raw = args
        .get(index)
        .ok_or_else(|| anyhow!("missing {}", what))?;
    raw.parse()
        .map_err(|_| anyhow!("invalid {}: {}", what, raw))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MaintenanceFlags {
    pub hours: i64,
    pub dry_run: bool,
    pub log_dir: Option<String>,
}

/// Reads `--dry-run`, `--log-dir D` and the hours flag named `hours_flag`.
/// Unparseable or non-positive hours keep the default.
pub(crate) fn parse_maintenance_flags(
    args: &[String],
    start: usize,
    hours_flag: &str,
    default_hours: i64,
) -> MaintenanceFlags {
    let mut flags = MaintenanceFlags {
        hours: default_hours,
        dry_run: false,
        log_dir: None,
    };
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--dry-run" => {
                flags.dry_run = true;
                i += 1;
            }
            "--log-dir" => {
                if i + 1 < args.len() {
                    flags.log_dir = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            flag if flag == hours_flag => {
                if i + 1 < args.len() {
                    flags.hours = args[i + 1]
                        .parse::<i64>()
                        .ok()
                        .filter(|h| *h > 0)
                        .unwrap_or(default_hours);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

pub(crate) fn parse_tick_secs(args: &[String], start: usize) -> u64 {
    let mut tick = scheduler::DEFAULT_TICK_SECS;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--tick-secs" => {
                if i + 1 < args.len() {
                    tick = args[i + 1]
                        .parse::<u64>()
                        .ok()
                        .filter(|t| *t > 0)
                        .unwrap_or(scheduler::DEFAULT_TICK_SECS);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    tick
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };
    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let log = logging::init_tracing();
    let config = RunnerConfig::from_env();

    match cmd {
        "run-job" => {
            let job_id = parse_id(&args, 2, "job id")?;
            run::run_job(&config, log, job_id).await
        }
        "resume" => {
            let run_id = parse_id(&args, 2, "run id")?;
            run::resume_run(&config, log, run_id).await
        }
        "reconcile" => reconcile::run_reconcile(&config).await,
        "scheduler" => {
            let tick = Duration::from_secs(parse_tick_secs(&args, 2));
            scheduler::run_scheduler(&config, tick).await
        }
        "cancel-run" => {
            let run_id = parse_id(&args, 2, "run id")?;
            runs::run_cancel(&config, run_id).await
        }
        "process-articles" => {
            let job_id = parse_id(&args, 2, "job id")?;
            let file = args
                .get(3)
                .ok_or_else(|| anyhow!("missing articles file"))?;
            runs::run_process_articles(&config, log, job_id, Path::new(file)).await
        }
        "cleanup" => {
            let flags =
                parse_maintenance_flags(&args, 2, "--max-age", DEFAULT_CLEANUP_MAX_AGE_HOURS);
            maintenance::run_cleanup(&config, &flags).await
        }
        "troubleshoot" => {
            let flags = parse_maintenance_flags(
                &args,
                2,
                "--lookback",
                DEFAULT_TROUBLESHOOT_LOOKBACK_HOURS,
            );
            maintenance::run_troubleshoot(&config, &flags).await
        }
        _ => {
            print_help();
            Err(anyhow!("Unknown command: {}", cmd))
        }
    }
}
