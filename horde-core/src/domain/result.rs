//! Job result model
//!
//! `ExecutionResult` is the raw outcome of the workload process.
//! `JobResult` and `JobError` are that outcome shaped for transmission
//! back to the miner.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Exit output and status of the job's container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the container timed out and was forced to exit
    pub timed_out: bool,
    /// Exit code of the job process. `None` iff `timed_out`.
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    /// Result of a process that exited on its own
    pub fn completed(return_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            timed_out: false,
            return_code: Some(return_code),
            stdout,
            stderr,
        }
    }

    /// Result of a process that was stopped after exceeding its timeout
    pub fn timed_out(stdout: String, stderr: String) -> Self {
        Self {
            timed_out: true,
            return_code: None,
            stdout,
            stderr,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.timed_out && self.return_code == Some(0)
    }
}

/// Category of a job failure, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    Timeout,
    NonzeroExitCode,
    VolumeDownload,
    SecurityCheck,
    ProtocolViolation,
    UploadFailed,
    EngineFailure,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::NonzeroExitCode => "NONZERO_EXIT_CODE",
            ErrorType::VolumeDownload => "VOLUME_DOWNLOAD",
            ErrorType::SecurityCheck => "SECURITY_CHECK",
            ErrorType::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorType::UploadFailed => "UPLOAD_FAILED",
            ErrorType::EngineFailure => "ENGINE_FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure to complete a job
///
/// This is data, not a protocol fault: it is transmitted to the miner as a
/// failure message. It implements `Error` so job steps can bubble it up with `?`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.combined_detail())]
pub struct JobError {
    pub error_message: String,
    pub error_type: Option<ErrorType>,
    pub error_detail: Option<String>,
    pub execution_result: Option<ExecutionResult>,
}

impl JobError {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            error_type: None,
            error_detail: None,
            execution_result: None,
        }
    }

    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_execution_result(mut self, result: ExecutionResult) -> Self {
        self.execution_result = Some(result);
        self
    }

    /// `error_message`, followed by `: error_detail` when a detail is present
    pub fn combined_detail(&self) -> String {
        match self.error_detail.as_deref() {
            Some(detail) if !detail.is_empty() => format!("{}: {}", self.error_message, detail),
            _ => self.error_message.clone(),
        }
    }
}

/// Description of the machine the executor ran on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpecs {
    pub specs: serde_json::Value,
}

/// Successful job outcome, the unit sent back to the miner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub exit_status: Option<i32>,
    pub timeout: bool,
    pub stdout: String,
    pub stderr: String,
    pub artifacts: HashMap<String, String>,
    #[serde(default)]
    pub specs: Option<MachineSpecs>,
    #[serde(default)]
    pub error_type: Option<ErrorType>,
    #[serde(default)]
    pub error_detail: Option<String>,
    pub upload_results: HashMap<String, String>,
}

impl JobResult {
    pub fn from_execution(
        result: ExecutionResult,
        artifacts: HashMap<String, String>,
        upload_results: HashMap<String, String>,
        specs: Option<MachineSpecs>,
    ) -> Self {
        Self {
            exit_status: result.return_code,
            timeout: result.timed_out,
            stdout: result.stdout,
            stderr: result.stderr,
            artifacts,
            specs,
            error_type: None,
            error_detail: None,
            upload_results,
        }
    }
}
