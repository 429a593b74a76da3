//! Job Repository
//!
//! Handles all storage operations related to accepted jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horde_core::domain::job::{AcceptedJob, JobStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{RepositoryError, RepositoryResult};

/// Storage for accepted jobs
///
/// Implementations must never modify a row whose stored status is terminal,
/// except for stamping `result_reported_to_validator` once.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts a new job and returns it with its assigned id
    async fn create(&self, job: AcceptedJob) -> RepositoryResult<AcceptedJob>;

    async fn find_by_uuid(
        &self,
        validator_id: i64,
        job_uuid: Uuid,
    ) -> RepositoryResult<Option<AcceptedJob>>;

    async fn find_by_executor_token(&self, token: &str) -> RepositoryResult<Option<AcceptedJob>>;

    /// Writes every mutable field of `job` and bumps the stored version
    ///
    /// `job.version` must be the version the caller read.
    ///
    /// # Returns
    /// `false` if nothing was written because the stored row changed since
    /// that version or is already terminal
    async fn update(&self, job: &AcceptedJob) -> RepositoryResult<bool>;

    /// Jobs of a validator whose status is one of `statuses`
    async fn find_by_status(
        &self,
        validator_id: i64,
        statuses: &[JobStatus],
    ) -> RepositoryResult<Vec<AcceptedJob>>;

    /// Reportable jobs of a validator that were never reported
    async fn find_unreported(&self, validator_id: i64) -> RepositoryResult<Vec<AcceptedJob>>;

    /// Stamps the report time, only if it was never stamped before
    ///
    /// # Returns
    /// `false` if the row was already reported or is not reportable
    async fn mark_reported(&self, id: i64, at: DateTime<Utc>) -> RepositoryResult<bool>;
}

/// PostgreSQL-backed job repository
#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = r#"
    id, validator_id, job_uuid, executor_token, status, initial_job_details,
    full_job_details, exit_status, stdout, stderr, error_type, error_detail,
    result_reported_to_validator, time_took_ms, score, created_at, updated_at,
    executor_address, artifacts, upload_results, version
"#;

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, mut job: AcceptedJob) -> RepositoryResult<AcceptedJob> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO accepted_jobs (validator_id, job_uuid, executor_token, status,
                                       initial_job_details, stdout, stderr, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(job.validator_id)
        .bind(job.job_uuid)
        .bind(&job.executor_token)
        .bind(job.status.as_str())
        .bind(&job.initial_job_details)
        .bind(&job.stdout)
        .bind(&job.stderr)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation()) {
                RepositoryError::Conflict(format!("job {} already accepted", job.job_uuid))
            } else {
                RepositoryError::Database(err)
            }
        })?;

        job.id = id;
        Ok(job)
    }

    async fn find_by_uuid(
        &self,
        validator_id: i64,
        job_uuid: Uuid,
    ) -> RepositoryResult<Option<AcceptedJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM accepted_jobs WHERE validator_id = $1 AND job_uuid = $2"
        );
        let row = sqlx::query_as::<_, AcceptedJobRow>(&sql)
            .bind(validator_id)
            .bind(job_uuid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AcceptedJob::try_from).transpose()
    }

    async fn find_by_executor_token(&self, token: &str) -> RepositoryResult<Option<AcceptedJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM accepted_jobs WHERE executor_token = $1");
        let row = sqlx::query_as::<_, AcceptedJobRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AcceptedJob::try_from).transpose()
    }

    async fn update(&self, job: &AcceptedJob) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accepted_jobs
            SET status = $2, full_job_details = $3, exit_status = $4, stdout = $5,
                stderr = $6, error_type = $7, error_detail = $8, time_took_ms = $9,
                score = $10, updated_at = $11, executor_address = $12, artifacts = $13,
                upload_results = $14, version = version + 1
            WHERE id = $1 AND version = $15
              AND status NOT IN ('FINISHED', 'FAILED', 'REJECTED')
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.full_job_details)
        .bind(job.exit_status)
        .bind(&job.stdout)
        .bind(&job.stderr)
        .bind(&job.error_type)
        .bind(&job.error_detail)
        .bind(job.time_took.map(|took| took.as_millis() as i64))
        .bind(job.score)
        .bind(job.updated_at)
        .bind(&job.executor_address)
        .bind(map_to_json(&job.artifacts))
        .bind(map_to_json(&job.upload_results))
        .bind(job.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_status(
        &self,
        validator_id: i64,
        statuses: &[JobStatus],
    ) -> RepositoryResult<Vec<AcceptedJob>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM accepted_jobs \
             WHERE validator_id = $1 AND status = ANY($2) ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, AcceptedJobRow>(&sql)
            .bind(validator_id)
            .bind(statuses)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AcceptedJob::try_from).collect()
    }

    async fn find_unreported(&self, validator_id: i64) -> RepositoryResult<Vec<AcceptedJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM accepted_jobs \
             WHERE validator_id = $1 AND status IN ('FINISHED', 'FAILED') \
               AND result_reported_to_validator IS NULL \
             ORDER BY updated_at ASC"
        );
        let rows = sqlx::query_as::<_, AcceptedJobRow>(&sql)
            .bind(validator_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AcceptedJob::try_from).collect()
    }

    async fn mark_reported(&self, id: i64, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accepted_jobs
            SET result_reported_to_validator = $2
            WHERE id = $1 AND status IN ('FINISHED', 'FAILED')
              AND result_reported_to_validator IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_to_json(map: &Option<HashMap<String, String>>) -> Option<serde_json::Value> {
    map.as_ref().map(|entries| {
        serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    })
}

fn json_to_map(
    column: &str,
    value: Option<serde_json::Value>,
) -> RepositoryResult<Option<HashMap<String, String>>> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("{}: {}", column, e)))
}

// Internal row type for database mapping
#[derive(sqlx::FromRow)]
struct AcceptedJobRow {
    id: i64,
    validator_id: i64,
    job_uuid: Uuid,
    executor_token: String,
    status: String,
    initial_job_details: serde_json::Value,
    full_job_details: Option<serde_json::Value>,
    exit_status: Option<i32>,
    stdout: String,
    stderr: String,
    error_type: Option<String>,
    error_detail: Option<String>,
    result_reported_to_validator: Option<DateTime<Utc>>,
    time_took_ms: Option<i64>,
    score: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    executor_address: Option<String>,
    artifacts: Option<serde_json::Value>,
    upload_results: Option<serde_json::Value>,
    version: i64,
}

impl TryFrom<AcceptedJobRow> for AcceptedJob {
    type Error = RepositoryError;

    fn try_from(row: AcceptedJobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(AcceptedJob {
            id: row.id,
            validator_id: row.validator_id,
            job_uuid: row.job_uuid,
            executor_token: row.executor_token,
            status,
            initial_job_details: row.initial_job_details,
            full_job_details: row.full_job_details,
            exit_status: row.exit_status,
            stdout: row.stdout,
            stderr: row.stderr,
            error_type: row.error_type,
            error_detail: row.error_detail,
            result_reported_to_validator: row.result_reported_to_validator,
            time_took: row
                .time_took_ms
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            score: row.score,
            created_at: row.created_at,
            updated_at: row.updated_at,
            executor_address: row.executor_address,
            artifacts: json_to_map("artifacts", row.artifacts)?,
            upload_results: json_to_map("upload_results", row.upload_results)?,
            version: row.version,
        })
    }
}
