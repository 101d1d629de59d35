use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, Row, params};

use super::types::{JobRunRecord, ProblemRun, RunStatus};
use super::{Store, now_ts};

/// Error message recorded on runs superseded by a newer run of the same job.
/// The troubleshooting scan filters on this text.
pub const ORPHAN_CANCEL_MESSAGE: &str = "Cancelled: new run started";

pub const USER_CANCEL_MESSAGE: &str = "Cancelled by user";

const RUN_COLUMNS: &str = "id, job_id, status, error_message, articles_saved, duplicates_skipped, \
     started_at, completed_at, log_path";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<JobRunRecord> {
    let status: String = row.get(2)?;
    Ok(JobRunRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        status: RunStatus::from_status(&status).unwrap_or(RunStatus::Failed),
        error_message: row.get(3)?,
        articles_saved: row.get(4)?,
        duplicates_skipped: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        log_path: row.get(8)?,
    })
}

impl Store {
    pub async fn create_job_run(&self, job_id: i64) -> Result<JobRunRecord> {
        let id = {
            let db = self.db.lock().await;
            db.execute(
                "INSERT INTO job_runs (job_id, status, started_at) VALUES (?1, 'running', ?2)",
                params![job_id, now_ts()],
            )?;
            db.last_insert_rowid()
        };
        self.get_job_run(id)
            .await?
            .ok_or_else(|| anyhow!("job run {} vanished after insert", id))
    }

    pub async fn get_job_run(&self, run_id: i64) -> Result<Option<JobRunRecord>> {
        let db = self.db.lock().await;
        let run = db
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE id = ?1"),
                params![run_id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    pub async fn list_running_runs(&self) -> Result<Vec<JobRunRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE status = 'running' ORDER BY id"
        ))?;
        let rows = stmt.query_map([], run_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Cancels every running run of `job_id` other than `except_run`.
    /// Returns the number of runs cancelled.
    pub async fn cancel_orphaned_runs(&self, job_id: i64, except_run: Option<i64>) -> Result<usize> {
        let db = self.db.lock().await;
        let cancelled = db.execute(
            "UPDATE job_runs SET status = 'cancelled', error_message = ?1, completed_at = ?2
             WHERE job_id = ?3 AND status = 'running' AND (?4 IS NULL OR id != ?4)",
            params![ORPHAN_CANCEL_MESSAGE, now_ts(), job_id, except_run],
        )?;
        Ok(cancelled)
    }

    /// Marks a single running run cancelled. Returns false if it had already
    /// left the running state.
    pub async fn cancel_job_run(&self, run_id: i64, message: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE job_runs SET status = 'cancelled', error_message = ?1, completed_at = ?2
             WHERE id = ?3 AND status = 'running'",
            params![message, now_ts(), run_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn set_run_log_path(&self, run_id: i64, log_path: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE job_runs SET log_path = ?1 WHERE id = ?2",
            params![log_path, run_id],
        )?;
        Ok(())
    }

    pub async fn run_status(&self, run_id: i64) -> Result<Option<RunStatus>> {
        let db = self.db.lock().await;
        let status: Option<String> = db
            .query_row(
                "SELECT status FROM job_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| RunStatus::from_status(&s)))
    }

    /// Finalizes a run. The update only applies while the run is still
    /// running; returns false when another path already finalized it.
    pub async fn complete_job_run(
        &self,
        run_id: i64,
        status: RunStatus,
        error_message: Option<&str>,
        articles_saved: i64,
        duplicates_skipped: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE job_runs SET status = ?1, error_message = ?2, articles_saved = ?3,
                 duplicates_skipped = ?4, completed_at = ?5
             WHERE id = ?6 AND status = 'running'",
            params![
                status.as_str(),
                error_message,
                articles_saved,
                duplicates_skipped,
                now_ts(),
                run_id
            ],
        )?;
        Ok(rows > 0)
    }

    /// Runs started since `since` on active jobs that failed, were cancelled
    /// for reasons other than supersession, or completed without storing any
    /// article inside their own time window.
    pub async fn find_problem_runs(&self, since: &str) -> Result<Vec<ProblemRun>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT jr.id, jr.job_id, j.name, jr.status,
                    COALESCE(jr.error_message, ''), jr.started_at, COALESCE(jr.completed_at, ''),
                    (SELECT COUNT(*) FROM articles a
                      WHERE a.job_id = jr.job_id
                        AND a.retrieved_at >= jr.started_at
                        AND (jr.completed_at IS NULL OR a.retrieved_at <= jr.completed_at)) AS article_count
             FROM job_runs jr
             JOIN jobs j ON jr.job_id = j.id
             WHERE jr.started_at >= ?1
               AND j.is_active = 1
               AND jr.status != 'completed_no_new'
               AND (
                    jr.status = 'failed'
                    OR (jr.status = 'cancelled' AND COALESCE(jr.error_message, '') NOT LIKE '%new run started%')
                    OR (jr.status = 'completed' AND (SELECT COUNT(*) FROM articles a
                          WHERE a.job_id = jr.job_id
                            AND a.retrieved_at >= jr.started_at
                            AND (jr.completed_at IS NULL OR a.retrieved_at <= jr.completed_at)) = 0)
               )
             ORDER BY jr.started_at DESC, jr.id DESC",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(ProblemRun {
                run_id: row.get(0)?,
                job_id: row.get(1)?,
                job_name: row.get(2)?,
                status: row.get(3)?,
                error_message: row.get(4)?,
                started_at: row.get(5)?,
                completed_at: row.get(6)?,
                article_count: row.get(7)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
