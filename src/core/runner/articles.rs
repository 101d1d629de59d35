use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::Runner;
use crate::core::extract::ArticleCandidate;
use crate::core::store::{JobRecord, NewArticle, format_ts};

/// Saved and duplicate counts for one batch of candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistCounts {
    pub saved: i64,
    pub duplicates: i64,
}

pub(crate) fn article_body(candidate: &ArticleCandidate, retrieved_at: &str, content: &str) -> String {
    format!(
        "Title: {}\nURL: {}\nRetrieved: {}\n\n--- Summary ---\n{}\n\n--- Full Content ---\n{}\n",
        candidate.title, candidate.url, retrieved_at, candidate.summary, content
    )
}

impl Runner {
    pub(crate) fn job_articles_dir(&self, job_id: i64) -> PathBuf {
        self.config.articles_dir.join(format!("job_{}", job_id))
    }

    /// Feeds externally supplied candidates through fetch and persist for a
    /// job, without an agent conversation. Files land under `user_<id>/`.
    pub async fn process_articles(
        &self,
        job_id: i64,
        candidates: &[ArticleCandidate],
    ) -> Result<PersistCounts> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| anyhow!("job {} not found", job_id))?;

        let dir = self
            .config
            .articles_dir
            .join(format!("user_{}", job.user_id));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create articles dir {}", dir.display()))?;

        Ok(self.persist_candidates(&job, candidates, &dir).await)
    }

    /// Fetches full text for every candidate, then writes one file and one
    /// guarded insert per candidate. Per-item failures are logged and skipped.
    pub(crate) async fn persist_candidates(
        &self,
        job: &JobRecord,
        candidates: &[ArticleCandidate],
        dir: &Path,
    ) -> PersistCounts {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let contents = self.fetcher.fetch_all(candidates).await;
        let mut counts = PersistCounts::default();

        for (i, (candidate, content)) in candidates.iter().zip(contents.iter()).enumerate() {
            let path = dir.join(format!("article_{}_{}.txt", i + 1, stamp));
            let body = article_body(candidate, &format_ts(Utc::now()), content);
            if let Err(e) = tokio::fs::write(&path, body).await {
                warn!(path = %path.display(), error = %e, "write article file");
                continue;
            }

            let path_str = path.to_string_lossy();
            let article = NewArticle {
                job_id: job.id,
                user_id: job.user_id,
                title: &candidate.title,
                url: &candidate.url,
                summary: &candidate.summary,
                content_path: &path_str,
            };
            match self.store.insert_article_if_new(&article).await {
                Ok(true) => {
                    counts.saved += 1;
                    info!(title = %candidate.title, file = %path.display(), "saved article");
                }
                Ok(false) => {
                    counts.duplicates += 1;
                    info!(title = %candidate.title, "skipped duplicate");
                }
                Err(e) => warn!(title = %candidate.title, error = %e, "insert article"),
            }
        }

        counts
    }
}
