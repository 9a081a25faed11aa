//! Postgres-backed job store.
//!
//! Jobs and runs are stored as JSONB records keyed by id, with a secondary
//! index on `job_runs.job_id` for per-job run listings.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use clockwork_core::{Error, Job, JobStat, JobStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cw_jobs (
    id      TEXT PRIMARY KEY,
    record  JSONB NOT NULL
);
CREATE TABLE IF NOT EXISTS cw_runs (
    id      TEXT PRIMARY KEY,
    job_id  TEXT NOT NULL,
    ran_at  TIMESTAMPTZ NOT NULL,
    record  JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS cw_runs_job_id_idx ON cw_runs (job_id, ran_at);
";

/// Remote persistence on a postgres database.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(pg_err)?;
        let store = Self { pool };
        store.ensure_schema().await?;
        debug!("PostgresStore connected");
        Ok(store)
    }

    /// Wrap an existing pool (used by tests and embedding applications).
    pub async fn with_pool(pool: PgPool) -> Result<Self, Error> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), Error> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(pg_err)?;
        }
        Ok(())
    }
}

fn pg_err(e: sqlx::Error) -> Error {
    Error::Persistence(format!("postgres: {e}"))
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::Persistence(format!("decode failed: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::Persistence(format!("encode failed: {e}")))
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn save_job(&self, job: &Job) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO cw_jobs (id, record) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET record = EXCLUDED.record",
        )
        .bind(&job.id)
        .bind(encode(job)?)
        .execute(&self.pool)
        .await
        .map_err(pg_err)?;
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM cw_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(pg_err)?;
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, Error> {
        let rows = sqlx::query("SELECT record FROM cw_jobs")
            .fetch_all(&self.pool)
            .await
            .map_err(pg_err)?;
        rows.into_iter()
            .map(|row| decode(row.get::<serde_json::Value, _>("record")))
            .collect()
    }

    async fn save_run(&self, run: &JobStat) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO cw_runs (id, job_id, ran_at, record) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET record = EXCLUDED.record",
        )
        .bind(&run.id)
        .bind(&run.job_id)
        .bind(run.ran_at)
        .bind(encode(run)?)
        .execute(&self.pool)
        .await
        .map_err(pg_err)?;
        Ok(())
    }

    async fn update_run(&self, run: &JobStat) -> Result<(), Error> {
        let result = sqlx::query("UPDATE cw_runs SET record = $2 WHERE id = $1")
            .bind(&run.id)
            .bind(encode(run)?)
            .execute(&self.pool)
            .await
            .map_err(pg_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::UnknownRun(run.id.clone()));
        }
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<Option<JobStat>, Error> {
        let row = sqlx::query("SELECT record FROM cw_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(pg_err)?;
        row.map(|r| decode(r.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn list_runs(&self, job_id: &str) -> Result<Vec<JobStat>, Error> {
        let rows =
            sqlx::query("SELECT record FROM cw_runs WHERE job_id = $1 ORDER BY ran_at ASC")
                .bind(job_id)
                .fetch_all(&self.pool)
                .await
                .map_err(pg_err)?;
        rows.into_iter()
            .map(|row| decode(row.get::<serde_json::Value, _>("record")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_split_cleanly() {
        let statements: Vec<_> = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS cw_jobs"));
        assert!(statements[2].starts_with("CREATE INDEX IF NOT EXISTS"));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let run = JobStat::start("job-1", chrono::Utc::now());
        let value = encode(&run).unwrap();
        let back: JobStat = decode(value).unwrap();
        assert_eq!(back.id, run.id);
        assert_eq!(back.job_id, "job-1");
    }
}
