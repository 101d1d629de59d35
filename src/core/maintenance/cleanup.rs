use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::core::conversation::{CLEANUP_IDENTITY, ConversationService, ConversationSummary};

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub max_age: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Old top-level conversations matched by the cutoff.
    pub found: usize,
    /// Deleted conversations, sub-agents included.
    pub deleted: usize,
    pub failed: usize,
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        })
}

/// Top-level, API-created conversations created before `cutoff`, oldest first.
fn old_roots(all: &[ConversationSummary], cutoff: DateTime<Utc>) -> Vec<String> {
    let mut roots: Vec<(DateTime<Utc>, &str)> = all
        .iter()
        .filter(|c| !c.conversation_id.is_empty())
        .filter(|c| c.cwd.is_none() && c.parent_conversation_id.is_none())
        .filter_map(|c| {
            let created = parse_created_at(c.created_at.as_deref()?)?;
            (created < cutoff).then_some((created, c.conversation_id.as_str()))
        })
        .collect();
    roots.sort();
    roots.into_iter().map(|(_, id)| id.to_string()).collect()
}

/// Children before parents, so no sub-agent outlives the conversation that
/// spawned it.
fn deletion_order(
    root: &str,
    children: &HashMap<&str, Vec<&str>>,
    seen: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    if !seen.insert(root.to_string()) {
        return;
    }
    for child in children.get(root).into_iter().flatten() {
        debug!(child_id = child, parent_id = root, "queue child conversation");
        deletion_order(child, children, seen, out);
    }
    out.push(root.to_string());
}

pub async fn cleanup(
    agent: &dyn ConversationService,
    options: &CleanupOptions,
    now: DateTime<Utc>,
) -> Result<CleanupReport> {
    let all = agent
        .list(CLEANUP_IDENTITY)
        .await
        .context("list conversations")?;

    let cutoff = now - options.max_age;
    let roots = old_roots(&all, cutoff);
    let mut report = CleanupReport {
        found: roots.len(),
        ..Default::default()
    };
    info!(
        count = report.found,
        max_age_hours = options.max_age.num_hours(),
        "found old conversations"
    );

    if options.dry_run {
        info!("dry run - not deleting");
        return Ok(report);
    }

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in all.iter().filter(|c| !c.conversation_id.is_empty()) {
        if let Some(parent) = c.parent_conversation_id.as_deref() {
            children.entry(parent).or_default().push(&c.conversation_id);
        }
    }

    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for root in &roots {
        deletion_order(root, &children, &mut seen, &mut order);
    }

    for id in order {
        info!(conversation_id = %id, "deleting conversation");
        match agent.delete(CLEANUP_IDENTITY, &id).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "delete conversation");
                report.failed += 1;
            }
        }
    }

    info!(
        found = report.found,
        deleted = report.deleted,
        failed = report.failed,
        "cleanup complete"
    );
    Ok(report)
}
