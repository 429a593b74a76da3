//! Executor → miner messages

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::GenericError;
use crate::domain::result::{ErrorType, MachineSpecs};

/// Everything an executor may send to its miner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum ExecutorToMinerMessage {
    #[serde(rename = "V0StreamingJobReadyRequest")]
    StreamingJobReady(StreamingJobReady),
    #[serde(rename = "V0StreamingJobNotReadyRequest")]
    StreamingJobNotReady(StreamingJobNotReady),
    #[serde(rename = "V0ExecutorReadyRequest")]
    ExecutorReady(ExecutorReady),
    #[serde(rename = "V0VolumesReadyRequest")]
    VolumesReady(VolumesReady),
    #[serde(rename = "V0ExecutionDoneRequest")]
    ExecutionDone(ExecutionDone),
    #[serde(rename = "V0JobFailedRequest")]
    JobFailed(JobFailed),
    #[serde(rename = "V0JobFinishedRequest")]
    JobFinished(JobFinished),
    #[serde(rename = "V0MachineSpecsRequest")]
    MachineSpecs(MachineSpecsReport),
    #[serde(rename = "GenericError")]
    GenericError(GenericError),
}

impl ExecutorToMinerMessage {
    pub fn job_uuid(&self) -> Option<Uuid> {
        match self {
            Self::StreamingJobReady(msg) => Some(msg.job_uuid),
            Self::StreamingJobNotReady(msg) => Some(msg.job_uuid),
            Self::ExecutorReady(msg) => Some(msg.job_uuid),
            Self::VolumesReady(msg) => Some(msg.job_uuid),
            Self::ExecutionDone(msg) => Some(msg.job_uuid),
            Self::JobFailed(msg) => Some(msg.job_uuid),
            Self::JobFinished(msg) => Some(msg.job_uuid),
            Self::MachineSpecs(msg) => Some(msg.job_uuid),
            Self::GenericError(_) => None,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::StreamingJobReady(_) => "V0StreamingJobReadyRequest",
            Self::StreamingJobNotReady(_) => "V0StreamingJobNotReadyRequest",
            Self::ExecutorReady(_) => "V0ExecutorReadyRequest",
            Self::VolumesReady(_) => "V0VolumesReadyRequest",
            Self::ExecutionDone(_) => "V0ExecutionDoneRequest",
            Self::JobFailed(_) => "V0JobFailedRequest",
            Self::JobFinished(_) => "V0JobFinishedRequest",
            Self::MachineSpecs(_) => "V0MachineSpecsRequest",
            Self::GenericError(_) => "GenericError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingJobReady {
    pub job_uuid: Uuid,
    /// Server certificate of the streaming listener
    pub public_key: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingJobNotReady {
    pub job_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorReady {
    pub job_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumesReady {
    pub job_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDone {
    pub job_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_uuid: Uuid,
    #[serde(default)]
    pub error_type: Option<ErrorType>,
    #[serde(default)]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub docker_process_stdout: String,
    #[serde(default)]
    pub docker_process_stderr: String,
    /// Unset when the job timed out
    #[serde(default)]
    pub docker_process_exit_status: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFinished {
    pub job_uuid: Uuid,
    pub docker_process_stdout: String,
    pub docker_process_stderr: String,
    #[serde(default)]
    pub artifacts: HashMap<String, String>,
    #[serde(default)]
    pub upload_results: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpecsReport {
    pub job_uuid: Uuid,
    pub specs: MachineSpecs,
}
