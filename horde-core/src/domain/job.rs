//! Accepted job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// A job the miner agreed to run for a validator
///
/// Owned by the miner's job tracker. Created in `WaitingForExecutor` and
/// never deleted by the tracker itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedJob {
    pub id: i64,
    pub validator_id: i64,
    pub job_uuid: Uuid,
    /// Credential binding this job to exactly one executor instance
    pub executor_token: String,
    pub status: JobStatus,
    pub initial_job_details: serde_json::Value,
    /// Present only once the job has moved past `WaitingForExecutor`
    pub full_job_details: Option<serde_json::Value>,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error_type: Option<String>,
    pub error_detail: Option<String>,
    /// Set once, after the terminal outcome was delivered to the validator
    pub result_reported_to_validator: Option<DateTime<Utc>>,
    pub time_took: Option<Duration>,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executor_address: Option<String>,
    pub artifacts: Option<HashMap<String, String>>,
    pub upload_results: Option<HashMap<String, String>>,
    /// Stored write counter; an update only lands on the version it was read at
    pub version: i64,
}

impl AcceptedJob {
    /// Builds a fresh record in `WaitingForExecutor`
    pub fn new(
        validator_id: i64,
        job_uuid: Uuid,
        executor_token: String,
        initial_job_details: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            validator_id,
            job_uuid,
            executor_token,
            status: JobStatus::WaitingForExecutor,
            initial_job_details,
            full_job_details: None,
            exit_status: None,
            stdout: String::new(),
            stderr: String::new(),
            error_type: None,
            error_detail: None,
            result_reported_to_validator: None,
            time_took: None,
            score: None,
            created_at: now,
            updated_at: now,
            executor_address: None,
            artifacts: None,
            upload_results: None,
            version: 0,
        }
    }

    /// Whether the reporting loop still owes the validator this outcome
    pub fn awaits_report(&self) -> bool {
        self.status.is_reportable() && self.result_reported_to_validator.is_none()
    }
}

impl std::fmt::Display for AcceptedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "uuid: {} - validator: {} - {}",
            self.job_uuid, self.validator_id, self.status
        )
    }
}

/// Status of an accepted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    WaitingForExecutor,
    WaitingForPayload,
    Running,
    Finished,
    Failed,
    Rejected,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::WaitingForExecutor,
        JobStatus::WaitingForPayload,
        JobStatus::Running,
        JobStatus::Finished,
        JobStatus::Failed,
        JobStatus::Rejected,
    ];

    /// Statuses after which a job is never updated again
    pub const END_STATES: [JobStatus; 3] =
        [JobStatus::Finished, JobStatus::Failed, JobStatus::Rejected];

    pub const ACTIVE_STATES: [JobStatus; 3] = [
        JobStatus::WaitingForExecutor,
        JobStatus::WaitingForPayload,
        JobStatus::Running,
    ];

    /// Terminal statuses reported back to the validator as job outcomes.
    /// Rejections travel a different path.
    pub const REPORTABLE_STATES: [JobStatus; 2] = [JobStatus::Finished, JobStatus::Failed];

    pub fn is_terminal(self) -> bool {
        Self::END_STATES.contains(&self)
    }

    pub fn is_in_progress(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_successful(self) -> bool {
        self == JobStatus::Finished
    }

    pub fn is_failed(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Rejected)
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE_STATES.contains(&self)
    }

    pub fn is_reportable(self) -> bool {
        Self::REPORTABLE_STATES.contains(&self)
    }

    /// Position in the forward-only lifecycle. All end states share the last rank.
    fn rank(self) -> u8 {
        match self {
            JobStatus::WaitingForExecutor => 0,
            JobStatus::WaitingForPayload => 1,
            JobStatus::Running => 2,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Rejected => 3,
        }
    }

    /// Whether a row in this status may be moved to `next`
    ///
    /// End states are closed. Otherwise the status only moves forward.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::WaitingForExecutor => "WAITING_FOR_EXECUTOR",
            JobStatus::WaitingForPayload => "WAITING_FOR_PAYLOAD",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
            JobStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A stored status string that is not part of the lifecycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);
