//! Job queue repository: append-only job rows with a status lifecycle
//!
//! pending → running → done | failed. A crashed worker leaves rows in `running`;
//! `requeue_stale` puts them back to `pending` so every job is processed at least once.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Job type enqueued by raw stat writes
pub const REFRESH_DATASET_JOB: &str = "refresh_dataset";

/// A persisted job row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub job_type: String,
    pub status: String,
    pub payload: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub started_at: Option<i64>,
}

/// Repository for the `jobs` table
pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue a job unless one of the same type is already pending.
    /// Returns the new id, or None when coalesced into the pending one.
    pub async fn enqueue(&self, job_type: &str, payload: Option<&str>) -> DbResult<Option<i64>> {
        let result = sqlx::query(
            r#"INSERT INTO jobs (job_type, payload)
               SELECT ?1, ?2 WHERE NOT EXISTS
                 (SELECT 1 FROM jobs WHERE job_type = ?1 AND status = 'pending')"#,
        )
        .bind(job_type)
        .bind(payload)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(result.last_insert_rowid()))
        }
    }

    /// Atomically move the oldest pending job to `running` and return it
    pub async fn claim_next(&self) -> DbResult<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"UPDATE jobs
               SET status = 'running',
                   attempts = attempts + 1,
                   started_at = strftime('%s', 'now'),
                   updated_at = strftime('%s', 'now')
               WHERE id = (SELECT id FROM jobs WHERE status = 'pending' ORDER BY id LIMIT 1)
               RETURNING id, job_type, status, payload, attempts, last_error,
                         created_at, updated_at, started_at"#,
        )
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn mark_done(&self, id: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'done', last_error = NULL, updated_at = strftime('%s', 'now') WHERE id = ?1",
        )
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = ?2, updated_at = strftime('%s', 'now') WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Return `running` jobs started more than `older_than_secs` ago to `pending`
    pub async fn requeue_stale(&self, older_than_secs: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'pending', updated_at = strftime('%s', 'now')
               WHERE status = 'running'
                 AND COALESCE(started_at, 0) <= CAST(strftime('%s', 'now') AS INTEGER) - ?1"#,
        )
        .bind(older_than_secs)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"SELECT id, job_type, status, payload, attempts, last_error,
                      created_at, updated_at, started_at
               FROM jobs WHERE id = ?1"#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    pub async fn count_by_status(&self, status: &str) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = ?1")
            .bind(status)
            .fetch_one(self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_enqueue_coalesces_pending() {
        let db = Database::in_memory().await.unwrap();
        let repo = JobRepository::new(db.pool());

        let first = repo.enqueue(REFRESH_DATASET_JOB, None).await.unwrap();
        let second = repo.enqueue(REFRESH_DATASET_JOB, None).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(repo.count_by_status("pending").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_and_complete_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        let repo = JobRepository::new(db.pool());

        let id = repo.enqueue(REFRESH_DATASET_JOB, None).await.unwrap().unwrap();
        let job = repo.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, "running");
        assert_eq!(job.attempts, 1);

        // Nothing else pending
        assert!(repo.claim_next().await.unwrap().is_none());

        // A new write while running queues a fresh job
        assert!(repo.enqueue(REFRESH_DATASET_JOB, None).await.unwrap().is_some());

        repo.mark_done(id).await.unwrap();
        assert_eq!(repo.get(id).await.unwrap().unwrap().status, "done");
    }

    #[tokio::test]
    async fn test_stale_running_job_is_requeued() {
        let db = Database::in_memory().await.unwrap();
        let repo = JobRepository::new(db.pool());

        let id = repo.enqueue(REFRESH_DATASET_JOB, None).await.unwrap().unwrap();
        repo.claim_next().await.unwrap().unwrap();

        // Threshold 0: any running job counts as stale
        assert_eq!(repo.requeue_stale(0).await.unwrap(), 1);
        let again = repo.claim_next().await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);

        repo.mark_failed(id, "boom").await.unwrap();
        let failed = repo.get(id).await.unwrap().unwrap();
        assert_eq!(failed.status, "failed");
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
    }
}
