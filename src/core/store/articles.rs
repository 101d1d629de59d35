use anyhow::Result;
use rusqlite::params;

use super::types::NewArticle;
use super::{Store, now_ts};

impl Store {
    #[cfg(test)]
    pub async fn article_exists(&self, user_id: i64, url: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM articles WHERE user_id = ?1 AND url = ?2",
            params![user_id, url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Inserts the article unless the same user already holds its URL.
    /// Returns true when a row was written. Articles without a URL are
    /// always inserted.
    pub async fn insert_article_if_new(&self, article: &NewArticle<'_>) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "INSERT INTO articles (job_id, user_id, title, url, summary, content_path, retrieved_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
             WHERE ?4 = '' OR NOT EXISTS (
                 SELECT 1 FROM articles WHERE user_id = ?2 AND url = ?4
             )",
            params![
                article.job_id,
                article.user_id,
                article.title,
                article.url,
                article.summary,
                article.content_path,
                now_ts(),
            ],
        )?;
        Ok(rows > 0)
    }

    #[cfg(test)]
    pub async fn count_articles_for_job(&self, job_id: i64) -> Result<i64> {
        let db = self.db.lock().await;
        let count = db.query_row(
            "SELECT COUNT(*) FROM articles WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
