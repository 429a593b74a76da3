//! Execution engine
//!
//! Whatever actually runs a job's workload. The job driver only talks to the
//! `ExecutionEngine` trait; `PodmanEngine` is the container-backed default.

mod podman;

pub use podman::PodmanEngine;

use async_trait::async_trait;
use horde_core::domain::result::{ExecutionResult, JobError, MachineSpecs};
use horde_core::protocol::{InitialJobRequest, JobRequest};
use std::collections::HashMap;
use std::time::Duration;

/// Service trait for running a job's workload
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Prepares the streaming-capable environment
    ///
    /// # Returns
    /// The listener's certificate, or `None` when streaming could not be set up
    async fn prepare_streaming(&self, initial: &InitialJobRequest) -> Option<String>;

    /// Fetches or writes the input volume before the workload starts
    async fn prepare_volumes(
        &self,
        initial: &InitialJobRequest,
        job: &JobRequest,
    ) -> Result<(), JobError>;

    /// Runs the workload, stopping it once `timeout` elapses
    ///
    /// A timeout is reported through `ExecutionResult::timed_out`, not as an error.
    async fn run(&self, job: &JobRequest, timeout: Duration) -> Result<ExecutionResult, JobError>;

    /// Reads the files the workload left in its artifacts directory
    async fn collect_artifacts(&self, job: &JobRequest) -> Result<HashMap<String, String>, JobError>;

    /// Ships the job output to its upload target, if any
    ///
    /// # Returns
    /// Upload status per uploaded file
    async fn upload_output(&self, job: &JobRequest) -> Result<HashMap<String, String>, JobError>;

    /// Description of the machine the job ran on
    fn machine_specs(&self) -> Option<MachineSpecs>;
}
