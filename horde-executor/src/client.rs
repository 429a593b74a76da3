//! Miner client
//!
//! The executor's endpoint of the handshake protocol. Inbound frames are
//! dispatched into the handshake slots; outbound operations each build one
//! message tagged with the job's UUID and send it over the transport.
//!
//! Protocol anomalies (duplicate, out-of-order, unsupported or malformed
//! messages) are logged, answered with a `GenericError` and otherwise
//! ignored. Only transport failures and a missing job identity end the
//! session. Sends are never retried here.

use horde_core::domain::result::{JobError, JobResult};
use horde_core::protocol::{
    ExecutionDone, ExecutorReady, ExecutorToMinerMessage, GenericError, InitialJobRequest,
    JobFailed, JobFinished, JobRequest, MachineSpecsReport, MinerToExecutorMessage,
    StreamingJobNotReady, StreamingJobReady, VolumesReady,
};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::handshake::HandshakeState;
use crate::transport::Transport;

/// Protocol handler scoped to one connection and one job
pub struct MinerClient {
    transport: Arc<dyn Transport>,
    handshake: HandshakeState,
    /// Port announced for the streaming listener
    streaming_port: u16,
}

impl MinerClient {
    /// Creates a handler on an already connected transport
    ///
    /// # Arguments
    /// * `transport` - Channel to the miner
    /// * `streaming_port` - Port the streaming listener is exposed on
    pub fn new(transport: Arc<dyn Transport>, streaming_port: u16) -> Self {
        Self {
            transport,
            handshake: HandshakeState::new(),
            streaming_port,
        }
    }

    /// UUID of the job this handler serves
    ///
    /// Fails until the initial job request has been accepted.
    pub fn job_uuid(&self) -> Result<Uuid, ProtocolError> {
        Ok(self.handshake.job_uuid()?)
    }

    /// Waits for the initial job request
    pub async fn initial_job_request(&self) -> InitialJobRequest {
        self.handshake.wait_initial().await.clone()
    }

    /// Waits for the full job payload
    pub async fn job_request(&self) -> JobRequest {
        self.handshake.wait_payload().await.clone()
    }

    // =============================================================================
    // Inbound
    // =============================================================================

    /// Reads frames until the miner disconnects
    ///
    /// Returns `Ok(())` when the connection closes cleanly and an error only
    /// for failures that end the session.
    pub async fn run(&self) -> Result<(), ProtocolError> {
        while let Some(frame) = self.transport.receive().await? {
            self.dispatch(&frame).await?;
        }

        info!("Miner connection closed");
        Ok(())
    }

    /// Parses and handles one frame, answering recoverable anomalies in-band
    pub async fn dispatch(&self, frame: &str) -> Result<(), ProtocolError> {
        let outcome = match Self::parse_message(frame) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => Err(e),
        };

        match outcome {
            Err(e) if !e.is_fatal() => {
                error!("{}", e);
                self.report_generic_error(e.to_string()).await
            }
            other => other,
        }
    }

    pub fn parse_message(frame: &str) -> Result<MinerToExecutorMessage, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::MalformedMessage)
    }

    /// Routes a message into its handshake slot
    pub async fn handle_message(&self, msg: MinerToExecutorMessage) -> Result<(), ProtocolError> {
        debug!("Handling {} message", msg.message_type());

        match msg {
            MinerToExecutorMessage::InitialJobRequest(msg) => {
                self.handshake.submit_initial(msg).await?;
            }
            MinerToExecutorMessage::JobRequest(msg) => {
                self.handshake.submit_payload(msg).await?;
            }
            other => {
                return Err(ProtocolError::UnsupportedMessage {
                    message_type: other.message_type(),
                });
            }
        }

        Ok(())
    }

    // =============================================================================
    // Outbound
    // =============================================================================

    pub async fn announce_streaming_ready(&self, certificate: String) -> Result<(), ProtocolError> {
        self.send_model(ExecutorToMinerMessage::StreamingJobReady(StreamingJobReady {
            job_uuid: self.job_uuid()?,
            public_key: certificate,
            port: self.streaming_port,
        }))
        .await
    }

    pub async fn announce_streaming_unavailable(&self) -> Result<(), ProtocolError> {
        self.send_model(ExecutorToMinerMessage::StreamingJobNotReady(
            StreamingJobNotReady {
                job_uuid: self.job_uuid()?,
            },
        ))
        .await
    }

    pub async fn announce_ready(&self) -> Result<(), ProtocolError> {
        self.send_model(ExecutorToMinerMessage::ExecutorReady(ExecutorReady {
            job_uuid: self.job_uuid()?,
        }))
        .await
    }

    pub async fn announce_volumes_ready(&self) -> Result<(), ProtocolError> {
        self.send_model(ExecutorToMinerMessage::VolumesReady(VolumesReady {
            job_uuid: self.job_uuid()?,
        }))
        .await
    }

    pub async fn announce_execution_done(&self) -> Result<(), ProtocolError> {
        self.send_model(ExecutorToMinerMessage::ExecutionDone(ExecutionDone {
            job_uuid: self.job_uuid()?,
        }))
        .await
    }

    /// Reports a failed job, including process output when there is any
    pub async fn report_failure(&self, job_error: &JobError) -> Result<(), ProtocolError> {
        let mut msg = JobFailed {
            job_uuid: self.job_uuid()?,
            error_type: job_error.error_type,
            error_detail: Some(job_error.combined_detail()),
            docker_process_stdout: String::new(),
            docker_process_stderr: String::new(),
            docker_process_exit_status: None,
        };

        if let Some(result) = &job_error.execution_result {
            msg.docker_process_stdout = result.stdout.clone();
            msg.docker_process_stderr = result.stderr.clone();
            if !result.timed_out {
                msg.docker_process_exit_status = result.return_code;
            }
        }

        self.send_model(ExecutorToMinerMessage::JobFailed(msg)).await
    }

    /// Reports a finished job, preceded by the machine specs when known
    pub async fn report_success(&self, job_result: &JobResult) -> Result<(), ProtocolError> {
        let job_uuid = self.job_uuid()?;

        if let Some(specs) = &job_result.specs {
            self.send_model(ExecutorToMinerMessage::MachineSpecs(MachineSpecsReport {
                job_uuid,
                specs: specs.clone(),
            }))
            .await?;
        }

        self.send_model(ExecutorToMinerMessage::JobFinished(JobFinished {
            job_uuid,
            docker_process_stdout: job_result.stdout.clone(),
            docker_process_stderr: job_result.stderr.clone(),
            artifacts: job_result.artifacts.clone(),
            upload_results: job_result.upload_results.clone(),
        }))
        .await
    }

    /// Side-channel diagnostic; usable before the job identity is known
    pub async fn report_generic_error(&self, details: String) -> Result<(), ProtocolError> {
        self.send_model(ExecutorToMinerMessage::GenericError(GenericError { details }))
            .await
    }

    async fn send_model(&self, msg: ExecutorToMinerMessage) -> Result<(), ProtocolError> {
        let frame = serde_json::to_string(&msg).map_err(ProtocolError::Encode)?;
        debug!("Sending {} message", msg.message_type());
        self.transport.send(frame).await?;
        Ok(())
    }
}
