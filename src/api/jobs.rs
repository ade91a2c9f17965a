use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::schemas::job::{JobCancelResponse, JobStatusResponse};

#[cfg(test)]
mod tests;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:job_id", get(get_job))
        .route("/:job_id/cancel", post(cancel_job))
}

async fn get_job(
    Path(job_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .jobs()
        .get_for_user(&user.id, &job_id)
        .await
        .map_err(|e| ApiError::from_job_error(e, "Failed to fetch job"))?;

    Ok(Json(JobStatusResponse::from_db(job)))
}

async fn cancel_job(
    Path(job_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<JobCancelResponse>, ApiError> {
    let job = state
        .jobs()
        .request_cancel(&user.id, &job_id)
        .await
        .map_err(|e| ApiError::from_job_error(e, "Failed to cancel job"))?;

    Ok(Json(JobCancelResponse {
        job_id: job.id,
        status: job.status,
        cancel_requested: job.cancel_requested,
    }))
}

/// Per-user fixed window over all job submissions; fails open when Redis is
/// unreachable.
pub(crate) async fn check_submit_rate_limit(
    state: &AppState,
    user_id: &str,
) -> Result<(), ApiError> {
    let limit = state.settings().jobs().submit_rate_limit_per_minute;
    let key = format!("submit:{user_id}");

    let allowed = match state.redis().rate_limit(&key, limit, 60).await {
        Ok(allowed) => allowed,
        Err(err) => {
            tracing::warn!(error = %err, "Rate limit check failed; allowing request");
            true
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(ApiError::TooManyRequests("Too many job submissions"))
    }
}
