use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::models::Job;
use crate::db::types::JobStatus;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct OcrTriggerRequest {
    #[validate(length(min = 1, max = 120, message = "idempotency_key must be 1-120 characters"))]
    pub(crate) idempotency_key: Option<String>,
    #[validate(url(message = "image_url must be a valid URL"))]
    pub(crate) image_url: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExportPdfRequest {
    #[validate(length(min = 1, max = 120, message = "idempotency_key must be 1-120 characters"))]
    pub(crate) idempotency_key: Option<String>,
    pub(crate) options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobSubmitResponse {
    pub(crate) job_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobStatusResponse {
    pub(crate) status: JobStatus,
    pub(crate) result: Option<serde_json::Value>,
    pub(crate) error_message: Option<String>,
}

impl JobStatusResponse {
    pub(crate) fn from_db(job: Job) -> Self {
        Self {
            status: job.status,
            result: job.result.map(|result| result.0),
            error_message: job.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JobCancelResponse {
    pub(crate) job_id: String,
    pub(crate) status: JobStatus,
    pub(crate) cancel_requested: bool,
}
