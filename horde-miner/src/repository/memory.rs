//! In-memory repositories
//!
//! Mirror the PostgreSQL repositories' guards so service logic can be
//! exercised without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horde_core::domain::job::{AcceptedJob, JobStatus};
use horde_core::domain::validator::Validator;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobRepository, RepositoryError, RepositoryResult, ValidatorRepository};

struct Table<T> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<T> Table<T> {
    fn insert(&mut self, build: impl FnOnce(i64) -> T) -> &T {
        self.next_id += 1;
        let id = self.next_id;
        self.rows.entry(id).or_insert_with(|| build(id))
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    table: RwLock<Table<AcceptedJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: AcceptedJob) -> RepositoryResult<AcceptedJob> {
        let mut table = self.table.write().await;

        let duplicate = table.rows.values().any(|row| {
            (row.validator_id == job.validator_id && row.job_uuid == job.job_uuid)
                || row.executor_token == job.executor_token
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "job {} already accepted",
                job.job_uuid
            )));
        }

        let stored = table.insert(|id| AcceptedJob { id, ..job });
        Ok(stored.clone())
    }

    async fn find_by_uuid(
        &self,
        validator_id: i64,
        job_uuid: Uuid,
    ) -> RepositoryResult<Option<AcceptedJob>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|row| row.validator_id == validator_id && row.job_uuid == job_uuid)
            .cloned())
    }

    async fn find_by_executor_token(&self, token: &str) -> RepositoryResult<Option<AcceptedJob>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|row| row.executor_token == token)
            .cloned())
    }

    async fn update(&self, job: &AcceptedJob) -> RepositoryResult<bool> {
        let mut table = self.table.write().await;
        let Some(row) = table.rows.get_mut(&job.id) else {
            return Ok(false);
        };
        if row.status.is_terminal() || row.version != job.version {
            return Ok(false);
        }

        // Report stamp is owned by mark_reported
        let reported = row.result_reported_to_validator;
        *row = AcceptedJob {
            result_reported_to_validator: reported,
            version: job.version + 1,
            ..job.clone()
        };
        Ok(true)
    }

    async fn find_by_status(
        &self,
        validator_id: i64,
        statuses: &[JobStatus],
    ) -> RepositoryResult<Vec<AcceptedJob>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|row| row.validator_id == validator_id && statuses.contains(&row.status))
            .cloned()
            .collect())
    }

    async fn find_unreported(&self, validator_id: i64) -> RepositoryResult<Vec<AcceptedJob>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|row| row.validator_id == validator_id && row.awaits_report())
            .cloned()
            .collect())
    }

    async fn mark_reported(&self, id: i64, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(row) if row.awaits_report() => {
                row.result_reported_to_validator = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryValidatorRepository {
    table: RwLock<Table<Validator>>,
}

impl InMemoryValidatorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValidatorRepository for InMemoryValidatorRepository {
    async fn upsert(
        &self,
        public_key: &str,
        active: bool,
        debug: bool,
    ) -> RepositoryResult<Validator> {
        let mut table = self.table.write().await;

        if let Some(existing) = table
            .rows
            .values_mut()
            .find(|v| v.public_key == public_key)
        {
            existing.active = active;
            existing.debug = debug;
            return Ok(existing.clone());
        }

        let stored = table.insert(|id| Validator {
            id,
            public_key: public_key.to_string(),
            active,
            debug,
        });
        Ok(stored.clone())
    }

    async fn find_by_public_key(&self, public_key: &str) -> RepositoryResult<Option<Validator>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|v| v.public_key == public_key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(validator_id: i64, token: &str) -> AcceptedJob {
        AcceptedJob::new(
            validator_id,
            Uuid::new_v4(),
            token.to_string(),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_rejects_duplicates() {
        let repo = InMemoryJobRepository::new();
        let first = repo.create(job(1, "a")).await.unwrap();
        let second = repo.create(job(1, "b")).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let mut same_uuid = job(1, "c");
        same_uuid.job_uuid = first.job_uuid;
        assert!(matches!(
            repo.create(same_uuid).await,
            Err(RepositoryError::Conflict(_))
        ));
        assert!(matches!(
            repo.create(job(2, "a")).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_rows_are_frozen() {
        let repo = InMemoryJobRepository::new();
        let mut stored = repo.create(job(1, "a")).await.unwrap();

        stored.status = JobStatus::Failed;
        assert!(repo.update(&stored).await.unwrap());

        stored.version += 1;
        stored.stdout = "rewritten".to_string();
        assert!(!repo.update(&stored).await.unwrap());

        let reloaded = repo.find_by_executor_token("a").await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
        assert_eq!(reloaded.stdout, "");
    }

    #[tokio::test]
    async fn test_update_requires_read_version() {
        let repo = InMemoryJobRepository::new();
        let stored = repo.create(job(1, "a")).await.unwrap();
        assert_eq!(stored.version, 0);

        let mut first = stored.clone();
        first.status = JobStatus::WaitingForPayload;
        first.full_job_details = Some(serde_json::json!({"args": ["run"]}));
        assert!(repo.update(&first).await.unwrap());

        // A writer still holding version 0 must not erase the payload
        let mut stale = stored;
        stale.status = JobStatus::Running;
        assert!(!repo.update(&stale).await.unwrap());

        let reloaded = repo.find_by_executor_token("a").await.unwrap().unwrap();
        assert_eq!(reloaded.version, 1);
        assert_eq!(reloaded.status, JobStatus::WaitingForPayload);
        assert!(reloaded.full_job_details.is_some());
    }

    #[tokio::test]
    async fn test_mark_reported_only_once() {
        let repo = InMemoryJobRepository::new();
        let mut stored = repo.create(job(1, "a")).await.unwrap();
        assert!(!repo.mark_reported(stored.id, Utc::now()).await.unwrap());

        stored.status = JobStatus::Finished;
        repo.update(&stored).await.unwrap();

        assert!(repo.mark_reported(stored.id, Utc::now()).await.unwrap());
        assert!(!repo.mark_reported(stored.id, Utc::now()).await.unwrap());
        assert!(repo.find_unreported(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validator_upsert() {
        let repo = InMemoryValidatorRepository::new();
        let first = repo.upsert("hotkey", true, false).await.unwrap();
        let again = repo.upsert("hotkey", false, true).await.unwrap();

        assert_eq!(first.id, again.id);
        assert!(!again.active);
        assert!(again.debug);
        assert_eq!(
            repo.find_by_public_key("hotkey").await.unwrap(),
            Some(again)
        );
        assert_eq!(repo.find_by_public_key("other").await.unwrap(), None);
    }
}
