use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::Problem;
use crate::db::types::ProblemStatus;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ProblemCreateRequest {
    pub(crate) collection_id: String,
    #[validate(url(message = "original_image_url must be a valid URL"))]
    pub(crate) original_image_url: String,
    #[validate(url(message = "cropped_image_url must be a valid URL"))]
    pub(crate) cropped_image_url: Option<String>,
    pub(crate) order_index: Option<i32>,
}

/// Optimistic update: `version` is the version the client read; the server
/// accepts the patch only if it still matches.
#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ProblemUpdateRequest {
    pub(crate) version: i32,
    pub(crate) collection_id: Option<String>,
    #[validate(url(message = "cropped_image_url must be a valid URL"))]
    pub(crate) cropped_image_url: Option<String>,
    pub(crate) ocr_text: Option<String>,
    pub(crate) note: Option<String>,
    pub(crate) tags: Option<Vec<String>>,
    pub(crate) order_index: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListProblemsQuery {
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
    pub(crate) updated_after: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProblemResponse {
    pub(crate) id: String,
    pub(crate) collection_id: String,
    pub(crate) status: ProblemStatus,
    pub(crate) original_image_url: String,
    pub(crate) cropped_image_url: Option<String>,
    pub(crate) ocr_text: Option<String>,
    pub(crate) note: Option<String>,
    pub(crate) tags: Option<Vec<String>>,
    pub(crate) order_index: i32,
    pub(crate) version: i32,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl ProblemResponse {
    pub(crate) fn from_db(problem: Problem) -> Self {
        Self {
            id: problem.id,
            collection_id: problem.collection_id,
            status: problem.status,
            original_image_url: problem.original_image_url,
            cropped_image_url: problem.cropped_image_url,
            ocr_text: problem.ocr_text,
            note: problem.note,
            tags: problem.tags.map(|tags| tags.0),
            order_index: problem.order_index,
            version: problem.version,
            created_at: format_primitive(problem.created_at),
            updated_at: format_primitive(problem.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ProblemUpdateResponse {
    pub(crate) id: String,
    pub(crate) version: i32,
}
