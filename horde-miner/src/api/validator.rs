//! Validator API Handlers
//!
//! HTTP endpoints a validator uses to hand jobs to this miner and collect
//! their outcomes.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use horde_core::domain::job::AcceptedJob;
use horde_core::domain::validator::Validator;
use horde_core::protocol::{EXECUTOR_INTERFACE_PATH, InitialJobRequest, JobRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::AppState;
use super::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct RegisterValidator {
    pub public_key: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub debug: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_uuid: Uuid,
    /// Path the executor must connect to, relative to the miner address
    pub executor_path: String,
    pub executor_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectJob {
    pub reason: String,
}

/// POST /validators
pub async fn register_validator(
    State(state): State<AppState>,
    Json(req): Json<RegisterValidator>,
) -> ApiResult<(StatusCode, Json<Validator>)> {
    let validator = state
        .tracker
        .register_validator(&req.public_key, req.active, req.debug)
        .await?;

    Ok((StatusCode::CREATED, Json(validator)))
}

/// POST /validators/{public_key}/jobs
/// Accept a job and mint the token its executor will connect with
pub async fn accept_job(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
    Json(initial): Json<InitialJobRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let validator = active_validator(&state, &public_key).await?;

    let executor_token = Uuid::new_v4().simple().to_string();
    let job = state
        .tracker
        .accept_job(&validator, &initial, executor_token)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(JobAccepted {
            job_uuid: job.job_uuid,
            executor_path: format!("/{}/{}", EXECUTOR_INTERFACE_PATH, job.executor_token),
            executor_token: job.executor_token,
        }),
    ))
}

/// GET /validators/{public_key}/jobs/{job_uuid}
pub async fn get_job(
    State(state): State<AppState>,
    Path((public_key, job_uuid)): Path<(String, Uuid)>,
) -> ApiResult<Json<AcceptedJob>> {
    let validator = known_validator(&state, &public_key).await?;
    let job = state.tracker.get_job(&validator, job_uuid).await?;
    Ok(Json(job))
}

/// POST /validators/{public_key}/jobs/{job_uuid}/payload
pub async fn submit_payload(
    State(state): State<AppState>,
    Path((public_key, job_uuid)): Path<(String, Uuid)>,
    Json(payload): Json<JobRequest>,
) -> ApiResult<StatusCode> {
    let validator = known_validator(&state, &public_key).await?;
    let mut job = state.tracker.get_job(&validator, job_uuid).await?;
    state.tracker.attach_payload(&mut job, &payload).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /validators/{public_key}/jobs/{job_uuid}/reject
pub async fn reject_job(
    State(state): State<AppState>,
    Path((public_key, job_uuid)): Path<(String, Uuid)>,
    Json(req): Json<RejectJob>,
) -> ApiResult<StatusCode> {
    let validator = known_validator(&state, &public_key).await?;
    let mut job = state.tracker.get_job(&validator, job_uuid).await?;
    state.tracker.reject(&mut job, &req.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /validators/{public_key}/jobs/active
pub async fn list_active_jobs(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
) -> ApiResult<Json<HashMap<String, AcceptedJob>>> {
    let validator = known_validator(&state, &public_key).await?;
    Ok(Json(state.tracker.active_jobs_for(&validator).await?))
}

/// GET /validators/{public_key}/jobs/unreported
/// Finished and failed jobs whose outcome was not acknowledged yet
pub async fn list_unreported_jobs(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
) -> ApiResult<Json<Vec<AcceptedJob>>> {
    let validator = known_validator(&state, &public_key).await?;
    Ok(Json(state.tracker.unreported_terminal_jobs(&validator).await?))
}

/// POST /validators/{public_key}/jobs/{job_uuid}/reported
/// Acknowledge receipt of a job outcome
pub async fn acknowledge_result(
    State(state): State<AppState>,
    Path((public_key, job_uuid)): Path<(String, Uuid)>,
) -> ApiResult<Json<AcceptedJob>> {
    let validator = known_validator(&state, &public_key).await?;
    let mut job = state.tracker.get_job(&validator, job_uuid).await?;
    state.tracker.mark_result_reported(&mut job).await?;
    Ok(Json(job))
}

async fn known_validator(state: &AppState, public_key: &str) -> ApiResult<Validator> {
    state
        .tracker
        .find_validator(public_key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Validator {} not found", public_key)))
}

async fn active_validator(state: &AppState, public_key: &str) -> ApiResult<Validator> {
    let validator = known_validator(state, public_key).await?;
    if !validator.active {
        return Err(ApiError::Forbidden(format!(
            "Validator {} is not active",
            validator
        )));
    }
    Ok(validator)
}
