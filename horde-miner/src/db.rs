use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create validators table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validators (
            id BIGSERIAL PRIMARY KEY,
            public_key VARCHAR(255) NOT NULL UNIQUE,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            debug BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create accepted jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accepted_jobs (
            id BIGSERIAL PRIMARY KEY,
            validator_id BIGINT NOT NULL REFERENCES validators(id) ON DELETE CASCADE,
            job_uuid UUID NOT NULL,
            executor_token VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            initial_job_details JSONB NOT NULL,
            full_job_details JSONB,
            exit_status INTEGER,
            stdout TEXT NOT NULL DEFAULT '',
            stderr TEXT NOT NULL DEFAULT '',
            error_type VARCHAR(50),
            error_detail TEXT,
            result_reported_to_validator TIMESTAMPTZ,
            time_took_ms BIGINT,
            score DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            executor_address VARCHAR(255),
            artifacts JSONB,
            upload_results JSONB,
            version BIGINT NOT NULL DEFAULT 0,
            UNIQUE (validator_id, job_uuid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Tables created before write versioning
    sqlx::query(
        "ALTER TABLE accepted_jobs ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 0",
    )
    .execute(pool)
    .await?;

    // Create indexes for tracker queries
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_accepted_jobs_validator_status \
         ON accepted_jobs(validator_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_accepted_jobs_unreported \
         ON accepted_jobs(validator_id, status) \
         WHERE result_reported_to_validator IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_accepted_jobs_executor_token \
         ON accepted_jobs(executor_token)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
