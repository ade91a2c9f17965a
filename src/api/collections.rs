use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::{is_foreign_key_violation, is_unique_violation, ApiError};
use crate::api::guards::CurrentUser;
use crate::api::jobs::check_submit_rate_limit;
use crate::api::problems::list_problems;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::JobKind;
use crate::repositories;
use crate::schemas::collection::{
    CollectionCreateRequest, CollectionListItem, CollectionResponse, CollectionUpdateRequest,
};
use crate::schemas::job::{ExportPdfRequest, JobSubmitResponse};
use crate::services::job_queue::SubmitJob;

#[cfg(test)]
mod tests;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_collections).post(create_collection))
        .route(
            "/:collection_id",
            get(get_collection).patch(update_collection).delete(delete_collection),
        )
        .route("/:collection_id/problems", get(list_problems))
        .route("/:collection_id/export_pdf", post(export_pdf))
}

async fn create_collection(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<CollectionCreateRequest>,
) -> Result<(StatusCode, Json<CollectionResponse>), ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Collection name must not be empty".to_string()));
    }

    let now = primitive_now_utc();
    let collection = repositories::collections::create(
        state.db(),
        repositories::collections::CreateCollection {
            id: &Uuid::new_v4().to_string(),
            user_id: &user.id,
            name: payload.name.trim(),
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict("Collection with this name already exists".to_string())
        } else {
            ApiError::internal(e, "Failed to create collection")
        }
    })?;

    Ok((StatusCode::CREATED, Json(CollectionResponse::from_db(collection))))
}

async fn list_collections(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionListItem>>, ApiError> {
    let collections = repositories::collections::list_for_user(state.db(), &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list collections"))?;

    let ids: Vec<String> = collections.iter().map(|collection| collection.id.clone()).collect();
    let counts = repositories::problems::count_by_collections(state.db(), &ids)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count problems"))?;
    let count_map: std::collections::HashMap<String, i64> = counts.into_iter().collect();

    let response = collections
        .into_iter()
        .map(|collection| CollectionListItem {
            problem_count: count_map.get(&collection.id).copied().unwrap_or(0),
            id: collection.id,
            name: collection.name,
        })
        .collect();

    Ok(Json(response))
}

async fn get_collection(
    Path(collection_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<CollectionResponse>, ApiError> {
    let collection = repositories::collections::find_for_user(state.db(), &user.id, &collection_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch collection"))?
        .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;

    Ok(Json(CollectionResponse::from_db(collection)))
}

async fn update_collection(
    Path(collection_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<CollectionUpdateRequest>,
) -> Result<Json<CollectionResponse>, ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let Some(name) = payload.name else {
        let collection =
            repositories::collections::find_for_user(state.db(), &user.id, &collection_id)
                .await
                .map_err(|e| ApiError::internal(e, "Failed to fetch collection"))?
                .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;
        return Ok(Json(CollectionResponse::from_db(collection)));
    };

    if name.trim().is_empty() {
        return Err(ApiError::BadRequest("Collection name must not be empty".to_string()));
    }

    let renamed = repositories::collections::rename(
        state.db(),
        &user.id,
        &collection_id,
        name.trim(),
        primitive_now_utc(),
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict("Collection with this name already exists".to_string())
        } else {
            ApiError::internal(e, "Failed to update collection")
        }
    })?
    .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;

    Ok(Json(CollectionResponse::from_db(renamed)))
}

async fn delete_collection(
    Path(collection_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let deleted = repositories::collections::delete(state.db(), &user.id, &collection_id)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                ApiError::Conflict("Collection still contains problems".to_string())
            } else {
                ApiError::internal(e, "Failed to delete collection")
            }
        })?;

    if !deleted {
        return Err(ApiError::NotFound("Collection not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn export_pdf(
    Path(collection_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<ExportPdfRequest>,
) -> Result<(StatusCode, Json<JobSubmitResponse>), ApiError> {
    payload.validate().map_err(|err| ApiError::BadRequest(err.to_string()))?;
    check_submit_rate_limit(&state, &user.id).await?;

    let collection = repositories::collections::find_for_user(state.db(), &user.id, &collection_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch collection"))?
        .ok_or_else(|| ApiError::NotFound("Collection not found".to_string()))?;

    let outcome = state
        .jobs()
        .submit(SubmitJob {
            kind: JobKind::PdfExport,
            user_id: &user.id,
            target_id: &collection.id,
            payload: serde_json::json!({
                "options": payload.options.unwrap_or_else(|| serde_json::json!({})),
            }),
            idempotency_key: payload.idempotency_key.as_deref(),
        })
        .await
        .map_err(|e| ApiError::from_job_error(e, "Failed to submit PDF export job"))?;

    Ok((StatusCode::ACCEPTED, Json(JobSubmitResponse { job_id: outcome.job.id })))
}
