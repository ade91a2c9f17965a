use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{JobKind, JobStatus, ProblemStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct User {
    pub(crate) id: String,
    pub(crate) nickname: Option<String>,
    pub(crate) avatar_url: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Collection {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) name: String,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Problem {
    pub(crate) id: String,
    pub(crate) user_id: String,
    pub(crate) collection_id: String,
    pub(crate) status: ProblemStatus,
    pub(crate) original_image_url: String,
    pub(crate) cropped_image_url: Option<String>,
    pub(crate) ocr_text: Option<String>,
    pub(crate) ocr_raw: Option<Json<serde_json::Value>>,
    pub(crate) note: Option<String>,
    pub(crate) tags: Option<Json<Vec<String>>>,
    pub(crate) order_index: i32,
    pub(crate) version: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Job {
    pub(crate) id: String,
    pub(crate) kind: JobKind,
    pub(crate) status: JobStatus,
    pub(crate) user_id: String,
    pub(crate) target_id: String,
    pub(crate) payload: Json<serde_json::Value>,
    pub(crate) idempotency_key: Option<String>,
    pub(crate) attempt_count: i32,
    pub(crate) max_attempts: i32,
    pub(crate) lease_owner: Option<String>,
    pub(crate) lease_expires_at: Option<PrimitiveDateTime>,
    pub(crate) next_attempt_at: Option<PrimitiveDateTime>,
    pub(crate) cancel_requested: bool,
    pub(crate) result: Option<Json<serde_json::Value>>,
    pub(crate) error_message: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct IdempotencyRecord {
    pub(crate) user_id: String,
    pub(crate) kind: JobKind,
    pub(crate) scope_key: String,
    pub(crate) job_id: String,
    pub(crate) expires_at: PrimitiveDateTime,
    pub(crate) created_at: PrimitiveDateTime,
}
