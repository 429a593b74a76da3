//! Validator Repository
//!
//! Handles all database operations related to validators.

use async_trait::async_trait;
use horde_core::domain::validator::Validator;
use sqlx::PgPool;

use super::RepositoryResult;

#[async_trait]
pub trait ValidatorRepository: Send + Sync {
    /// Inserts the validator, or updates its flags if the key is already known
    async fn upsert(&self, public_key: &str, active: bool, debug: bool)
    -> RepositoryResult<Validator>;

    async fn find_by_public_key(&self, public_key: &str) -> RepositoryResult<Option<Validator>>;
}

#[derive(Clone)]
pub struct PgValidatorRepository {
    pool: PgPool,
}

impl PgValidatorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ValidatorRepository for PgValidatorRepository {
    async fn upsert(
        &self,
        public_key: &str,
        active: bool,
        debug: bool,
    ) -> RepositoryResult<Validator> {
        let row = sqlx::query_as::<_, ValidatorRow>(
            r#"
            INSERT INTO validators (public_key, active, debug)
            VALUES ($1, $2, $3)
            ON CONFLICT (public_key) DO UPDATE
            SET active = EXCLUDED.active, debug = EXCLUDED.debug
            RETURNING id, public_key, active, debug
            "#,
        )
        .bind(public_key)
        .bind(active)
        .bind(debug)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_by_public_key(&self, public_key: &str) -> RepositoryResult<Option<Validator>> {
        let row = sqlx::query_as::<_, ValidatorRow>(
            r#"
            SELECT id, public_key, active, debug
            FROM validators
            WHERE public_key = $1
            "#,
        )
        .bind(public_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }
}

// Internal row type for database mapping
#[derive(sqlx::FromRow)]
struct ValidatorRow {
    id: i64,
    public_key: String,
    active: bool,
    debug: bool,
}

impl From<ValidatorRow> for Validator {
    fn from(row: ValidatorRow) -> Self {
        Validator {
            id: row.id,
            public_key: row.public_key,
            active: row.active,
            debug: row.debug,
        }
    }
}
