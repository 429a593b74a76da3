//! Job Tracker Service
//!
//! Business logic for the accepted job lifecycle. Every status change goes
//! through here so the forward-only ordering and terminal closure hold no
//! matter which component drives the job.

use chrono::Utc;
use horde_core::domain::job::{AcceptedJob, JobStatus};
use horde_core::domain::validator::Validator;
use horde_core::protocol::{InitialJobRequest, JobFailed, JobFinished, JobRequest};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::{JobRepository, RepositoryError, ValidatorRepository};

/// Service error type
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {job_uuid} cannot move from {from} to {to}")]
    InvalidTransition {
        job_uuid: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_uuid} has no payload yet")]
    MissingPayload { job_uuid: Uuid },

    #[error("Job {job_uuid} already has its payload")]
    PayloadAlreadyAttached { job_uuid: Uuid },

    #[error("Job {job_uuid} kept changing under concurrent writes")]
    Conflict { job_uuid: Uuid },

    #[error("Message for job {received} does not belong to job {expected}")]
    MismatchedJob { expected: Uuid, received: Uuid },

    #[error("Job {job_uuid} in status {status} cannot be marked as reported")]
    NotReportable { job_uuid: Uuid, status: JobStatus },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Times a write is attempted before giving up on a busy row
const WRITE_ATTEMPTS: usize = 3;

/// Owner of accepted job records
pub struct JobTracker {
    jobs: Arc<dyn JobRepository>,
    validators: Arc<dyn ValidatorRepository>,
}

impl JobTracker {
    pub fn new(jobs: Arc<dyn JobRepository>, validators: Arc<dyn ValidatorRepository>) -> Self {
        Self { jobs, validators }
    }

    pub async fn register_validator(
        &self,
        public_key: &str,
        active: bool,
        debug: bool,
    ) -> TrackerResult<Validator> {
        let validator = self.validators.upsert(public_key, active, debug).await?;
        tracing::info!("Validator registered: {}", validator);
        Ok(validator)
    }

    pub async fn find_validator(&self, public_key: &str) -> TrackerResult<Option<Validator>> {
        Ok(self.validators.find_by_public_key(public_key).await?)
    }

    /// Records a job the miner agreed to run, in `WaitingForExecutor`
    pub async fn accept_job(
        &self,
        validator: &Validator,
        initial: &InitialJobRequest,
        executor_token: String,
    ) -> TrackerResult<AcceptedJob> {
        let job = AcceptedJob::new(
            validator.id,
            initial.job_uuid,
            executor_token,
            serde_json::to_value(initial)?,
        );
        let job = self.jobs.create(job).await?;

        tracing::info!("Job accepted: {}", job);
        Ok(job)
    }

    pub async fn find_by_executor_token(&self, token: &str) -> TrackerResult<Option<AcceptedJob>> {
        Ok(self.jobs.find_by_executor_token(token).await?)
    }

    pub async fn get_job(&self, validator: &Validator, job_uuid: Uuid) -> TrackerResult<AcceptedJob> {
        self.jobs
            .find_by_uuid(validator.id, job_uuid)
            .await?
            .ok_or(TrackerError::NotFound(job_uuid))
    }

    /// Fetches the latest stored version of `job`
    pub async fn reload(&self, job: &AcceptedJob) -> TrackerResult<AcceptedJob> {
        self.jobs
            .find_by_uuid(job.validator_id, job.job_uuid)
            .await?
            .ok_or(TrackerError::NotFound(job.job_uuid))
    }

    /// Moves the job forward to `next`
    pub async fn transition(&self, job: &mut AcceptedJob, next: JobStatus) -> TrackerResult<()> {
        self.apply(job, Some(next), |_| Ok(())).await
    }

    /// Stores the full payload of a job whose executor waits for it. Allowed once.
    pub async fn attach_payload(
        &self,
        job: &mut AcceptedJob,
        payload: &JobRequest,
    ) -> TrackerResult<()> {
        if payload.job_uuid != job.job_uuid {
            return Err(TrackerError::MismatchedJob {
                expected: job.job_uuid,
                received: payload.job_uuid,
            });
        }

        let details = serde_json::to_value(payload)?;
        self.apply(job, None, |next| {
            if next.status != JobStatus::WaitingForPayload {
                return Err(TrackerError::InvalidTransition {
                    job_uuid: next.job_uuid,
                    from: next.status,
                    to: JobStatus::WaitingForPayload,
                });
            }
            if next.full_job_details.is_some() {
                return Err(TrackerError::PayloadAlreadyAttached {
                    job_uuid: next.job_uuid,
                });
            }
            next.full_job_details = Some(details.clone());
            Ok(())
        })
        .await
    }

    /// Decodes the stored payload, if the validator sent it yet
    pub fn payload_of(&self, job: &AcceptedJob) -> TrackerResult<JobRequest> {
        let details = job
            .full_job_details
            .clone()
            .ok_or(TrackerError::MissingPayload {
                job_uuid: job.job_uuid,
            })?;
        Ok(serde_json::from_value(details)?)
    }

    /// Decodes the initial job request the job was accepted with
    pub fn initial_request_of(&self, job: &AcceptedJob) -> TrackerResult<InitialJobRequest> {
        Ok(serde_json::from_value(job.initial_job_details.clone())?)
    }

    /// Stores where the executor serves the job's streaming endpoint
    pub async fn record_executor_address(
        &self,
        job: &mut AcceptedJob,
        address: String,
    ) -> TrackerResult<()> {
        self.apply(job, None, |next| {
            next.executor_address = Some(address.clone());
            Ok(())
        })
        .await
    }

    pub async fn record_success(
        &self,
        job: &mut AcceptedJob,
        msg: &JobFinished,
    ) -> TrackerResult<()> {
        self.apply(job, Some(JobStatus::Finished), |next| {
            next.exit_status = Some(0);
            next.stdout = msg.docker_process_stdout.clone();
            next.stderr = msg.docker_process_stderr.clone();
            next.artifacts = Some(msg.artifacts.clone());
            next.upload_results = Some(msg.upload_results.clone());
            next.time_took = elapsed_since_creation(next);
            Ok(())
        })
        .await?;

        tracing::info!("Job finished: {}", job.job_uuid);
        Ok(())
    }

    pub async fn record_failure(&self, job: &mut AcceptedJob, msg: &JobFailed) -> TrackerResult<()> {
        self.apply(job, Some(JobStatus::Failed), |next| {
            next.exit_status = msg.docker_process_exit_status;
            next.stdout = msg.docker_process_stdout.clone();
            next.stderr = msg.docker_process_stderr.clone();
            next.error_type = msg.error_type.map(|t| t.as_str().to_string());
            next.error_detail = msg.error_detail.clone();
            next.time_took = elapsed_since_creation(next);
            Ok(())
        })
        .await?;

        tracing::warn!(
            "Job failed: {} ({})",
            job.job_uuid,
            job.error_detail.as_deref().unwrap_or("no detail")
        );
        Ok(())
    }

    /// Declines the job without running it
    pub async fn reject(&self, job: &mut AcceptedJob, reason: &str) -> TrackerResult<()> {
        self.apply(job, Some(JobStatus::Rejected), |next| {
            next.error_detail = Some(reason.to_string());
            next.time_took = elapsed_since_creation(next);
            Ok(())
        })
        .await?;

        tracing::info!("Job rejected: {} ({})", job.job_uuid, reason);
        Ok(())
    }

    /// Non-terminal jobs of a validator, keyed by job UUID string
    pub async fn active_jobs_for(
        &self,
        validator: &Validator,
    ) -> TrackerResult<HashMap<String, AcceptedJob>> {
        let jobs = self
            .jobs
            .find_by_status(validator.id, &JobStatus::ACTIVE_STATES)
            .await?;
        Ok(jobs
            .into_iter()
            .map(|job| (job.job_uuid.to_string(), job))
            .collect())
    }

    /// Finished or failed jobs whose outcome the validator has not received
    pub async fn unreported_terminal_jobs(
        &self,
        validator: &Validator,
    ) -> TrackerResult<Vec<AcceptedJob>> {
        Ok(self.jobs.find_unreported(validator.id).await?)
    }

    /// Stamps the job as reported to its validator. Allowed once.
    pub async fn mark_result_reported(&self, job: &mut AcceptedJob) -> TrackerResult<()> {
        let not_reportable = TrackerError::NotReportable {
            job_uuid: job.job_uuid,
            status: job.status,
        };
        if !job.awaits_report() {
            return Err(not_reportable);
        }

        let now = Utc::now();
        if !self.jobs.mark_reported(job.id, now).await? {
            return Err(not_reportable);
        }
        job.result_reported_to_validator = Some(now);
        Ok(())
    }

    /// Applies `change` and a move to `status` on a copy, persists it against
    /// the version it was read at, then commits it to `job`.
    ///
    /// A write that lost to another writer is applied again to the reloaded
    /// row, so `change` always sees the latest stored fields. `None` keeps the
    /// stored status. `job` is left untouched on error.
    async fn apply<F>(
        &self,
        job: &mut AcceptedJob,
        status: Option<JobStatus>,
        change: F,
    ) -> TrackerResult<()>
    where
        F: Fn(&mut AcceptedJob) -> TrackerResult<()>,
    {
        let mut current = job.clone();

        for _ in 0..WRITE_ATTEMPTS {
            let target = status.unwrap_or(current.status);
            if current.status.is_terminal()
                || (target != current.status && !current.status.can_transition_to(target))
            {
                return Err(TrackerError::InvalidTransition {
                    job_uuid: current.job_uuid,
                    from: current.status,
                    to: target,
                });
            }

            let mut next = current.clone();
            next.status = target;
            next.updated_at = Utc::now();
            change(&mut next)?;

            if self.jobs.update(&next).await? {
                next.version += 1;
                if next.status != job.status {
                    tracing::debug!("Job {} moved from {} to {}", job.job_uuid, job.status, next.status);
                }
                *job = next;
                return Ok(());
            }

            tracing::debug!("Job {} changed since it was read, retrying", job.job_uuid);
            current = self.reload(&current).await?;
        }

        Err(TrackerError::Conflict {
            job_uuid: job.job_uuid,
        })
    }
}

fn elapsed_since_creation(job: &AcceptedJob) -> Option<std::time::Duration> {
    (job.updated_at - job.created_at).to_std().ok()
}
