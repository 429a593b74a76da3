//! Executor Interface Handler
//!
//! WebSocket endpoint an executor connects to with the token of the job it
//! was provisioned for. The miner opens with the initial job request, feeds
//! the payload once the validator sent it, and records every status message.

use axum::{
    extract::{
        ConnectInfo, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use horde_core::domain::job::{AcceptedJob, JobStatus};
use horde_core::protocol::MinerToExecutorMessage;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::service::{ExecutorSession, SessionClaim, TrackerError};

/// Failures that end a supervision session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("WebSocket error: {0}")]
    Socket(#[from] axum::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// GET /v0.1/executor_interface/{token}
pub async fn executor_interface(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let job = state
        .tracker
        .find_by_executor_token(&token)
        .await?
        .ok_or_else(|| {
            warn!("Executor from {} presented an unknown token", peer);
            ApiError::NotFound("Unknown executor token".to_string())
        })?;

    if job.status != JobStatus::WaitingForExecutor {
        return Err(ApiError::Conflict(format!(
            "Job {} is already {}",
            job.job_uuid, job.status
        )));
    }

    let claim = state.sessions.claim(job.id).ok_or_else(|| {
        warn!("Executor from {} for job {} while another session is live", peer, job.job_uuid);
        ApiError::Conflict(format!("Job {} already has an executor", job.job_uuid))
    })?;

    info!("Executor connected from {} for job {}", peer, job.job_uuid);
    Ok(ws.on_upgrade(move |socket| supervise(socket, state, job, peer, claim)))
}

async fn supervise(
    mut socket: WebSocket,
    state: AppState,
    job: AcceptedJob,
    peer: SocketAddr,
    _claim: SessionClaim,
) {
    let job_uuid = job.job_uuid;
    let mut session = ExecutorSession::new(state.tracker.clone(), job, Some(peer.ip()));

    match drive(&mut socket, &mut session, state.payload_poll_interval).await {
        Ok(()) => info!(
            "Executor session for job {} ended with status {}",
            job_uuid,
            session.job().status
        ),
        Err(e) => error!("Executor session for job {} failed: {}", job_uuid, e),
    }

    // The peer may already be gone
    let _ = socket.send(Message::Close(None)).await;
}

async fn drive(
    socket: &mut WebSocket,
    session: &mut ExecutorSession,
    poll_interval: Duration,
) -> Result<(), SessionError> {
    send(socket, &session.opening_message()?).await?;

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = socket.recv() => {
                let replies = match frame {
                    Some(Ok(Message::Text(text))) => session.handle_frame(text.as_str()).await?,
                    Some(Ok(Message::Binary(data))) => {
                        session.handle_frame(&String::from_utf8_lossy(&data)).await?
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Executor of job {} disconnected", session.job().job_uuid);
                        return Ok(());
                    }
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => return Err(e.into()),
                };
                for reply in &replies {
                    send(socket, reply).await?;
                }
            }
            _ = ticker.tick() => {
                session.refresh().await?;
                if let Some(payload) = session.poll_payload().await? {
                    send(socket, &payload).await?;
                }
            }
        }

        if session.is_finished() {
            return Ok(());
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &MinerToExecutorMessage) -> Result<(), SessionError> {
    let frame = serde_json::to_string(msg)?;
    socket.send(Message::Text(frame.into())).await?;
    Ok(())
}
