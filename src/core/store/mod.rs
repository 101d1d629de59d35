mod articles;
mod jobs;
mod preferences;
mod runs;
pub mod types;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::platform::{NativePlatform, Platform};

pub use runs::{ORPHAN_CANCEL_MESSAGE, USER_CANCEL_MESSAGE};
#[cfg(test)]
pub use types::NewJob;
pub use types::{JobRecord, JobStatus, NewArticle, Preferences, ProblemRun, RunStatus};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        prompt TEXT NOT NULL,
        keywords TEXT NOT NULL DEFAULT '',
        sources TEXT NOT NULL DEFAULT '',
        region TEXT NOT NULL DEFAULT '',
        frequency TEXT NOT NULL DEFAULT 'daily',
        is_one_time INTEGER NOT NULL DEFAULT 0,
        is_active INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'pending',
        last_run_at TEXT,
        next_run_at TEXT,
        current_conversation_id TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS job_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'running',
        error_message TEXT,
        articles_saved INTEGER NOT NULL DEFAULT 0,
        duplicates_skipped INTEGER NOT NULL DEFAULT 0,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        log_path TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        url TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        content_path TEXT NOT NULL DEFAULT '',
        retrieved_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS preferences (
        user_id INTEGER PRIMARY KEY,
        system_prompt TEXT NOT NULL DEFAULT '',
        discord_webhook TEXT NOT NULL DEFAULT '',
        notify_success INTEGER NOT NULL DEFAULT 1,
        notify_failure INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_job_runs_job_status ON job_runs(job_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_articles_user_url ON articles(user_id, url)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(is_active, next_run_at)",
];

/// Relational store shared by the dashboard process and every run process.
/// All mutations are single-statement; SQLite's busy timeout serializes writers.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
            NativePlatform::restrict_dir_permissions(parent);
        }

        let db = Connection::open(path).with_context(|| format!("open {}", path.display()))?;
        NativePlatform::restrict_file_permissions(path);
        Self::from_connection(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        db.pragma_update(None, "foreign_keys", "ON")?;
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.busy_timeout(Duration::from_millis(1000))?;

        for stmt in SCHEMA {
            db.execute(stmt, [])?;
        }
        debug!("store schema ready");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

pub fn format_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_ts() -> String {
    format_ts(Utc::now())
}

#[cfg(test)]
fn bool_to_int(b: bool) -> i64 {
    if b { 1 } else { 0 }
}
