//! Executor Session
//!
//! Applies one executor's messages to the job it was provisioned for, and
//! decides what the miner sends back.

use horde_core::domain::job::{AcceptedJob, JobStatus};
use horde_core::protocol::{ExecutorToMinerMessage, GenericError, MinerToExecutorMessage};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::tracker::{JobTracker, TrackerError, TrackerResult};

pub struct ExecutorSession {
    tracker: Arc<JobTracker>,
    job: AcceptedJob,
    /// Address the executor connected from
    peer: Option<IpAddr>,
    payload_sent: bool,
}

impl ExecutorSession {
    pub fn new(tracker: Arc<JobTracker>, job: AcceptedJob, peer: Option<IpAddr>) -> Self {
        Self {
            tracker,
            job,
            peer,
            payload_sent: false,
        }
    }

    pub fn job(&self) -> &AcceptedJob {
        &self.job
    }

    /// Whether the job reached a terminal status and the session can end
    pub fn is_finished(&self) -> bool {
        self.job.status.is_terminal()
    }

    /// The first message of every session
    pub fn opening_message(&self) -> TrackerResult<MinerToExecutorMessage> {
        let initial = self.tracker.initial_request_of(&self.job)?;
        Ok(MinerToExecutorMessage::InitialJobRequest(initial))
    }

    /// Handles one raw inbound frame
    ///
    /// # Returns
    /// Messages to send back to the executor
    pub async fn handle_frame(&mut self, frame: &str) -> TrackerResult<Vec<MinerToExecutorMessage>> {
        match serde_json::from_str::<ExecutorToMinerMessage>(frame) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                warn!("Malformed message from executor of job {}: {}", self.job.job_uuid, e);
                Ok(vec![generic_error(format!("Malformed message: {}", e))])
            }
        }
    }

    pub async fn handle_message(
        &mut self,
        msg: ExecutorToMinerMessage,
    ) -> TrackerResult<Vec<MinerToExecutorMessage>> {
        if let Some(received) = msg.job_uuid().filter(|uuid| *uuid != self.job.job_uuid) {
            warn!(
                "Executor of job {} sent {} for job {}",
                self.job.job_uuid,
                msg.message_type(),
                received
            );
            return Ok(vec![generic_error(format!(
                "Message for job {} does not belong to job {}",
                received, self.job.job_uuid
            ))]);
        }

        match self.apply(msg).await {
            Ok(replies) => Ok(replies),
            Err(TrackerError::InvalidTransition { from, to, .. }) => {
                warn!(
                    "Ignoring executor message for job {}: cannot move from {} to {}",
                    self.job.job_uuid, from, to
                );
                self.refresh().await?;
                Ok(vec![generic_error(format!(
                    "Job is {}, cannot move to {}",
                    from, to
                ))])
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(
        &mut self,
        msg: ExecutorToMinerMessage,
    ) -> TrackerResult<Vec<MinerToExecutorMessage>> {
        match msg {
            ExecutorToMinerMessage::StreamingJobReady(ready) => {
                let address = match self.peer {
                    Some(ip) => format!("{}:{}", ip, ready.port),
                    None => format!(":{}", ready.port),
                };
                info!("Job {} streaming at {}", self.job.job_uuid, address);
                self.tracker
                    .record_executor_address(&mut self.job, address)
                    .await?;
            }
            ExecutorToMinerMessage::StreamingJobNotReady(_) => {
                warn!("Executor of job {} could not set up streaming", self.job.job_uuid);
            }
            ExecutorToMinerMessage::ExecutorReady(_) => {
                info!("Executor ready for job {}", self.job.job_uuid);
                self.tracker
                    .transition(&mut self.job, JobStatus::WaitingForPayload)
                    .await?;
                return Ok(self.poll_payload().await?.into_iter().collect());
            }
            ExecutorToMinerMessage::VolumesReady(_) | ExecutorToMinerMessage::ExecutionDone(_) => {
                if self.job.status != JobStatus::Running {
                    self.tracker
                        .transition(&mut self.job, JobStatus::Running)
                        .await?;
                }
            }
            ExecutorToMinerMessage::JobFinished(finished) => {
                self.tracker.record_success(&mut self.job, &finished).await?;
            }
            ExecutorToMinerMessage::JobFailed(failed) => {
                self.tracker.record_failure(&mut self.job, &failed).await?;
            }
            ExecutorToMinerMessage::MachineSpecs(report) => {
                info!("Machine specs for job {}: {}", self.job.job_uuid, report.specs.specs);
            }
            ExecutorToMinerMessage::GenericError(err) => {
                warn!("Executor of job {} reported: {}", self.job.job_uuid, err.details);
            }
        }
        Ok(Vec::new())
    }

    /// Picks up what other writers stored for the job, such as a rejection
    pub async fn refresh(&mut self) -> TrackerResult<()> {
        self.job = self.tracker.reload(&self.job).await?;
        Ok(())
    }

    /// Checks whether the validator's payload arrived
    ///
    /// # Returns
    /// The job request, the first time it is available while the executor
    /// waits for it
    pub async fn poll_payload(&mut self) -> TrackerResult<Option<MinerToExecutorMessage>> {
        if self.payload_sent || self.job.status != JobStatus::WaitingForPayload {
            return Ok(None);
        }

        let stored = self.tracker.reload(&self.job).await?;
        if stored.full_job_details.is_none() {
            debug!("Payload for job {} not available yet", self.job.job_uuid);
            return Ok(None);
        }

        let payload = self.tracker.payload_of(&stored)?;
        self.job = stored;
        self.payload_sent = true;
        info!("Sending payload for job {}", self.job.job_uuid);
        Ok(Some(MinerToExecutorMessage::JobRequest(payload)))
    }
}

fn generic_error(details: String) -> MinerToExecutorMessage {
    MinerToExecutorMessage::GenericError(GenericError::new(details))
}
