use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::api::jobs::check_submit_rate_limit;
use crate::core::state::AppState;
use crate::core::time::{parse_rfc3339, primitive_now_utc};
use crate::db::types::{JobKind, ProblemStatus};
use crate::repositories;
use crate::repositories::problems::ProblemPatch;
use crate::schemas::job::{JobSubmitResponse, OcrTriggerRequest};
use crate::schemas::problem::{
    ListProblemsQuery, ProblemCreateRequest, ProblemResponse, ProblemUpdateRequest,
    ProblemUpdateResponse,
};
use crate::services::job_queue::SubmitJob;
use crate::services::ocr::apply_patch_with_retry;

#[cfg(test)]
mod tests;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_problem))
        .route("/:problem_id", get(get_problem).patch(update_problem).delete(delete_problem))
        .route("/:problem_id/ocr", post(trigger_ocr))
}

async fn create_problem(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ProblemCreateRequest>,
) -> Result<(StatusCode, Json<ProblemResponse>), ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let collection =
        repositories::collections::find_for_user(state.db(), &user.id, &payload.collection_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to fetch collection"))?
            .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;

    let now = primitive_now_utc();
    let problem = repositories::problems::create(
        state.db(),
        repositories::problems::CreateProblem {
            id: &Uuid::new_v4().to_string(),
            user_id: &user.id,
            collection_id: &collection.id,
            status: ProblemStatus::Draft,
            original_image_url: &payload.original_image_url,
            cropped_image_url: payload.cropped_image_url.as_deref(),
            order_index: payload.order_index.unwrap_or(0),
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create problem"))?;

    Ok((StatusCode::CREATED, Json(ProblemResponse::from_db(problem))))
}

async fn get_problem(
    Path(problem_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ProblemResponse>, ApiError> {
    let problem = repositories::problems::find_for_user(state.db(), &user.id, &problem_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch problem"))?
        .ok_or_else(|| ApiError::NotFound("Problem not found".to_string()))?;

    Ok(Json(ProblemResponse::from_db(problem)))
}

/// Optimistic-concurrency update: the patch applies only if the stored
/// version still equals the one the client read; a stale version gets a 409
/// and must re-read before retrying.
async fn update_problem(
    Path(problem_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ProblemUpdateRequest>,
) -> Result<Json<ProblemUpdateResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let problem = repositories::problems::find_for_user(state.db(), &user.id, &problem_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch problem"))?
        .ok_or_else(|| ApiError::NotFound("Problem not found".to_string()))?;

    if let Some(collection_id) = &payload.collection_id {
        repositories::collections::find_for_user(state.db(), &user.id, collection_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to fetch collection"))?
            .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;
    }

    let patch = ProblemPatch {
        collection_id: payload.collection_id,
        cropped_image_url: payload.cropped_image_url,
        ocr_text: payload.ocr_text,
        note: payload.note,
        tags: payload.tags,
        order_index: payload.order_index,
        ..ProblemPatch::default()
    };

    let applied = repositories::problems::apply_update(
        state.db(),
        &user.id,
        &problem.id,
        payload.version,
        patch,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to update problem"))?;

    match applied {
        Some(new_version) => {
            Ok(Json(ProblemUpdateResponse { id: problem.id, version: new_version }))
        }
        None => {
            metrics::counter!("version_conflicts_total", "source" => "api").increment(1);
            Err(ApiError::Conflict("version mismatch".to_string()))
        }
    }
}

async fn delete_problem(
    Path(problem_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let deleted = repositories::problems::delete(state.db(), &user.id, &problem_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to delete problem"))?;

    if !deleted {
        return Err(ApiError::NotFound("Problem not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_problems(
    Path(collection_id): Path<String>,
    Query(query): Query<ListProblemsQuery>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ProblemResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let updated_after = match query.updated_after.as_deref() {
        Some(raw) => Some(parse_rfc3339(raw).ok_or_else(|| {
            ApiError::BadRequest("updated_after must be an RFC 3339 timestamp".to_string())
        })?),
        None => None,
    };

    repositories::collections::find_for_user(state.db(), &user.id, &collection_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch collection"))?
        .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;

    let problems = repositories::problems::list_by_collection(
        state.db(),
        repositories::problems::ListParams {
            user_id: &user.id,
            collection_id: &collection_id,
            limit,
            offset,
            updated_after,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to list problems"))?;

    Ok(Json(problems.into_iter().map(ProblemResponse::from_db).collect()))
}

async fn trigger_ocr(
    Path(problem_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<OcrTriggerRequest>,
) -> Result<(StatusCode, Json<JobSubmitResponse>), ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;
    check_submit_rate_limit(&state, &user.id).await?;

    let problem = repositories::problems::find_for_user(state.db(), &user.id, &problem_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch problem"))?
        .ok_or_else(|| ApiError::NotFound("Problem not found".to_string()))?;

    let job_payload = match &payload.image_url {
        Some(image_url) => serde_json::json!({ "image_url": image_url }),
        None => serde_json::json!({}),
    };

    let outcome = state
        .jobs()
        .submit(SubmitJob {
            kind: JobKind::Ocr,
            user_id: &user.id,
            target_id: &problem.id,
            payload: job_payload,
            idempotency_key: payload.idempotency_key.as_deref(),
        })
        .await
        .map_err(|e| ApiError::from_job_error(e, "Failed to submit OCR job"))?;

    if !outcome.deduplicated {
        let pending =
            ProblemPatch { status: Some(ProblemStatus::OcrPending), ..ProblemPatch::default() };
        if let Err(err) = apply_patch_with_retry(state.db(), &problem.id, pending).await {
            tracing::warn!(problem_id = %problem.id, error = %err, "Failed to mark problem OCR_PENDING");
        }
    }

    Ok((StatusCode::ACCEPTED, Json(JobSubmitResponse { job_id: outcome.job.id })))
}
