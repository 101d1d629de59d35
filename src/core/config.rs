use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::{NativePlatform, Platform};

pub const DEFAULT_AGENT_API: &str = "http://localhost:9999";
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 25 * 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_START_DELAY_SECS: u64 = 60;
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Runtime settings for a job run, resolved from `NEWS_APP_*` / `NEWS_JOB_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub db_path: PathBuf,
    pub articles_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub agent_api: String,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound of the random start jitter. Zero disables it.
    pub start_delay: Duration,
    pub max_parallel: usize,
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(NativePlatform::data_dir(), |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(data_dir: PathBuf, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let path_or = |key: &str, default: PathBuf| {
            non_empty(&lookup, key)
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        Self {
            db_path: path_or("NEWS_APP_DB_PATH", data_dir.join("db.sqlite3")),
            articles_dir: path_or("NEWS_APP_ARTICLES_DIR", data_dir.join("articles")),
            logs_dir: path_or("NEWS_APP_LOGS_DIR", data_dir.join("logs").join("runs")),
            agent_api: non_empty(&lookup, "NEWS_APP_AGENT_API")
                .unwrap_or_else(|| DEFAULT_AGENT_API.to_string()),
            job_timeout: Duration::from_secs(parse_or(
                &lookup,
                "NEWS_JOB_TIMEOUT_SECS",
                DEFAULT_JOB_TIMEOUT_SECS,
            )),
            poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "NEWS_JOB_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )),
            start_delay: Duration::from_secs(parse_or(
                &lookup,
                "NEWS_JOB_START_DELAY_SECS",
                DEFAULT_START_DELAY_SECS,
            )),
            max_parallel: parse_or(&lookup, "NEWS_JOB_MAX_PARALLEL", DEFAULT_MAX_PARALLEL).max(1),
        }
    }

    /// Config rooted at `dir` with every default applied.
    #[cfg(test)]
    pub fn for_data_dir(dir: &Path) -> Self {
        Self::from_lookup(dir.to_path_buf(), |_| None)
    }

    pub fn data_root(&self) -> PathBuf {
        self.db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn non_empty<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    non_empty(lookup, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
