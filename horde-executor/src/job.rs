//! Job driver
//!
//! Walks one job through the executor side of the protocol: provisioning,
//! handshake, volumes, execution and the final report. Failures of the job
//! itself are reported to the miner as data; only protocol failures escape.

use horde_core::domain::result::{ErrorType, JobError, JobResult};
use horde_core::protocol::{InitialJobRequest, JobRequest};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::MinerClient;
use crate::engine::ExecutionEngine;
use crate::error::ProtocolError;

/// Outcome of a job step: either the job failed, or the session did
#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub struct JobDriver {
    client: Arc<MinerClient>,
    engine: Arc<dyn ExecutionEngine>,
    /// Used when the initial job request carries no timeout
    default_timeout: Duration,
    send_machine_specs: bool,
}

impl JobDriver {
    pub fn new(
        client: Arc<MinerClient>,
        engine: Arc<dyn ExecutionEngine>,
        default_timeout: Duration,
        send_machine_specs: bool,
    ) -> Self {
        Self {
            client,
            engine,
            default_timeout,
            send_machine_specs,
        }
    }

    /// Runs the job to its final report
    ///
    /// Waits indefinitely for the miner's handshake messages; the caller
    /// owns any overall deadline.
    pub async fn run(&self) -> Result<(), ProtocolError> {
        let initial = self.client.initial_job_request().await;
        info!(
            "Provisioning job {} (class {}, image {})",
            initial.job_uuid, initial.executor_class, initial.docker_image
        );

        if initial.streaming_details.is_some() {
            match self.engine.prepare_streaming(&initial).await {
                Some(certificate) => self.client.announce_streaming_ready(certificate).await?,
                None => self.client.announce_streaming_unavailable().await?,
            }
        }

        self.client.announce_ready().await?;

        let job = self.client.job_request().await;
        info!("Received payload for job {}", job.job_uuid);

        match self.execute(&initial, &job).await {
            Ok(result) => {
                info!("Job {} finished", job.job_uuid);
                self.client.report_success(&result).await
            }
            Err(StepError::Job(job_error)) => {
                warn!("Job {} failed: {}", job.job_uuid, job_error);
                self.client.report_failure(&job_error).await
            }
            Err(StepError::Protocol(e)) => Err(e),
        }
    }

    async fn execute(
        &self,
        initial: &InitialJobRequest,
        job: &JobRequest,
    ) -> Result<JobResult, StepError> {
        self.engine.prepare_volumes(initial, job).await?;
        self.client.announce_volumes_ready().await?;

        let timeout = initial
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let result = self.engine.run(job, timeout).await?;
        self.client.announce_execution_done().await?;

        if result.timed_out {
            return Err(JobError::new("Job timed out")
                .with_type(ErrorType::Timeout)
                .with_detail(format!("exceeded {:?}", timeout))
                .with_execution_result(result)
                .into());
        }

        if let Some(code) = result.return_code.filter(|code| *code != 0) {
            return Err(JobError::new("Job process exited with a non-zero code")
                .with_type(ErrorType::NonzeroExitCode)
                .with_detail(format!("exit code {}", code))
                .with_execution_result(result)
                .into());
        }

        let artifacts = self.engine.collect_artifacts(job).await?;
        let upload_results = self.engine.upload_output(job).await?;
        let specs = if self.send_machine_specs {
            self.engine.machine_specs()
        } else {
            None
        };

        Ok(JobResult::from_execution(
            result,
            artifacts,
            upload_results,
            specs,
        ))
    }
}
