use anyhow::Result;
use chrono::{Duration, Utc};
use std::path::PathBuf;

use super::MaintenanceFlags;
use crate::core::config::RunnerConfig;
use crate::core::conversation::AgentClient;
use crate::core::maintenance::{self, CleanupOptions, TroubleshootOptions};
use crate::core::store::Store;
use crate::core::terminal::{GuideSection, print_info};

pub async fn run_cleanup(config: &RunnerConfig, flags: &MaintenanceFlags) -> Result<()> {
    let agent = AgentClient::new(&config.agent_api)?;
    let options = CleanupOptions {
        max_age: Duration::hours(flags.hours),
        dry_run: flags.dry_run,
    };
    let report = maintenance::cleanup(&agent, &options, Utc::now()).await?;

    let title = if flags.dry_run {
        "Cleanup (dry run)"
    } else {
        "Cleanup"
    };
    GuideSection::new(title)
        .status("Max age", &format!("{}h", flags.hours))
        .status("Found", &report.found.to_string())
        .status("Deleted", &report.deleted.to_string())
        .status("Failed", &report.failed.to_string())
        .print();
    println!();
    Ok(())
}

pub async fn run_troubleshoot(config: &RunnerConfig, flags: &MaintenanceFlags) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let agent = AgentClient::new(&config.agent_api)?;
    let log_dir = flags
        .log_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.data_root().join("logs").join("troubleshoot"));
    let options = TroubleshootOptions {
        lookback: Duration::hours(flags.hours),
        log_dir,
        dry_run: flags.dry_run,
    };

    let report = maintenance::troubleshoot(&store, &agent, config, &options, Utc::now()).await?;
    if report.problems.is_empty() {
        print_info(&format!("No problematic runs in the last {}h.", flags.hours));
        return Ok(());
    }

    let mut section = GuideSection::new("Troubleshoot");
    for p in &report.problems {
        let detail = if p.error_message.is_empty() {
            p.status.clone()
        } else {
            format!("{}: {}", p.status, p.error_message)
        };
        section = section.status(&format!("Run {} ({})", p.run_id, p.job_name), &detail);
    }
    section = section.blank();
    section = match &report.conversation_id {
        Some(id) => section.info(&format!("Opened diagnostic conversation {}", id)),
        None => section.info("Dry run: no conversation opened."),
    };
    section.print();
    println!();
    Ok(())
}
