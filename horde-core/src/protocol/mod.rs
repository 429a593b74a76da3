//! Message catalog
//!
//! The closed set of messages exchanged between a miner and the executor it
//! spawned. Every frame is a JSON object whose `message_type` field names the
//! kind; all kinds except `GenericError` carry the `job_uuid` they refer to.

pub mod executor;
pub mod miner;

use serde::{Deserialize, Serialize};

pub use executor::{
    ExecutionDone, ExecutorReady, ExecutorToMinerMessage, JobFailed, JobFinished,
    MachineSpecsReport, StreamingJobNotReady, StreamingJobReady, VolumesReady,
};
pub use miner::{
    InitialJobRequest, JobRequest, MinerToExecutorMessage, OutputUpload, StreamingDetails, Volume,
};

/// Path segment under which miners expose the executor interface
pub const EXECUTOR_INTERFACE_PATH: &str = "v0.1/executor_interface";

/// Side-channel diagnostic, not tied to any job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericError {
    pub details: String,
}

impl GenericError {
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            details: details.into(),
        }
    }
}

/// URL an executor connects to: `<miner-address>/v0.1/executor_interface/<token>`
pub fn executor_interface_url(miner_address: &str, token: &str) -> String {
    format!(
        "{}/{}/{}",
        miner_address.trim_end_matches('/'),
        EXECUTOR_INTERFACE_PATH,
        token
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_interface_url() {
        assert_eq!(
            executor_interface_url("ws://miner:8000", "abc"),
            "ws://miner:8000/v0.1/executor_interface/abc"
        );
        assert_eq!(
            executor_interface_url("ws://miner:8000/", "abc"),
            "ws://miner:8000/v0.1/executor_interface/abc"
        );
    }
}
