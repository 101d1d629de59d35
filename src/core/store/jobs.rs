use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::types::{JobRecord, JobStatus};
use super::{Store, format_ts};
use crate::core::schedule::{Frequency, initial_run_at};

const JOB_COLUMNS: &str = "id, user_id, name, prompt, keywords, sources, region, frequency, \
     is_one_time, is_active, status, last_run_at, next_run_at, current_conversation_id";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let frequency: String = row.get(7)?;
    let status: String = row.get(10)?;
    Ok(JobRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        prompt: row.get(3)?,
        keywords: row.get(4)?,
        sources: row.get(5)?,
        region: row.get(6)?,
        frequency: Frequency::parse(&frequency),
        is_one_time: row.get::<_, i64>(8)? != 0,
        is_active: row.get::<_, i64>(9)? != 0,
        status: JobStatus::from_status(&status).unwrap_or(JobStatus::Pending),
        last_run_at: row.get(11)?,
        next_run_at: row.get(12)?,
        current_conversation_id: row.get(13)?,
    })
}

impl Store {
    pub async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    #[cfg(test)]
    pub async fn create_job(&self, job: &super::types::NewJob) -> Result<JobRecord> {
        let next_run = initial_run_at(job.frequency, job.is_one_time, Utc::now());
        let id = {
            let db = self.db.lock().await;
            db.execute(
                "INSERT INTO jobs (user_id, name, prompt, keywords, sources, region, frequency, is_one_time, next_run_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    job.user_id,
                    job.name,
                    job.prompt,
                    job.keywords,
                    job.sources,
                    job.region,
                    job.frequency.as_str(),
                    super::bool_to_int(job.is_one_time),
                    format_ts(next_run),
                ],
            )?;
            db.last_insert_rowid()
        };
        self.get_job(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {} vanished after insert", id))
    }

    /// Sets the job's status. `last_run_at`/`next_run_at` of `None` leave the
    /// stored values untouched, so a failed run keeps its schedule.
    pub async fn update_job_status(
        &self,
        job_id: i64,
        status: JobStatus,
        last_run_at: Option<&str>,
        next_run_at: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE jobs SET status = ?1,
                 last_run_at = COALESCE(?2, last_run_at),
                 next_run_at = COALESCE(?3, next_run_at)
             WHERE id = ?4",
            params![status.as_str(), last_run_at, next_run_at, job_id],
        )?;
        Ok(())
    }

    pub async fn deactivate_job(&self, job_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE jobs SET is_active = 0 WHERE id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    pub async fn set_job_conversation(&self, job_id: i64, conversation_id: Option<&str>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE jobs SET current_conversation_id = ?1 WHERE id = ?2",
            params![conversation_id, job_id],
        )?;
        Ok(())
    }

    /// Moves a job out of `running` once none of its runs are still running.
    /// Returns false when the job was not running or a run still is.
    pub async fn release_idle_job(&self, job_id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET status = 'cancelled'
             WHERE id = ?1 AND status = 'running'
               AND NOT EXISTS (SELECT 1 FROM job_runs WHERE job_id = ?1 AND status = 'running')",
            params![job_id],
        )?;
        Ok(rows > 0)
    }

    /// Gives active jobs that have never been scheduled their first run
    /// time. Returns how many rows were updated.
    pub async fn schedule_unscheduled_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let pending: Vec<(i64, String, bool)> = {
            let mut stmt = db.prepare(
                "SELECT id, frequency, is_one_time FROM jobs
                 WHERE is_active = 1 AND next_run_at IS NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? != 0,
                ))
            })?;
            let mut pending = Vec::new();
            for row in rows {
                pending.push(row?);
            }
            pending
        };

        for (id, frequency, is_one_time) in &pending {
            let next = initial_run_at(Frequency::parse(frequency), *is_one_time, now);
            db.execute(
                "UPDATE jobs SET next_run_at = ?1 WHERE id = ?2 AND next_run_at IS NULL",
                params![format_ts(next), id],
            )?;
        }
        Ok(pending.len())
    }

    /// Active jobs whose next run is at or before `now` and which are not
    /// already running.
    pub async fn due_jobs(&self, now: &str) -> Result<Vec<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE is_active = 1 AND status != 'running'
               AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at, id"
        ))?;
        let rows = stmt.query_map(params![now], job_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
