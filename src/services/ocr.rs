use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::core::config::Settings;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Job, Problem};
use crate::db::types::{JobKind, ProblemStatus};
use crate::repositories;
use crate::repositories::problems::ProblemPatch;
use crate::services::executor::{ExecutionContext, ExecutionError, JobExecutor};

#[derive(Debug, Clone)]
pub(crate) struct OcrExtraction {
    pub(crate) text: String,
    pub(crate) raw: Value,
}

pub(crate) enum OcrSource {
    Url(String),
    Bytes(Vec<u8>),
}

/// Thin client for the external OCR engine: one submit call with bounded
/// retries. The extraction algorithm itself lives behind the HTTP API.
#[derive(Debug, Clone)]
pub(crate) struct OcrEngineClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_submit_retries: u32,
}

impl OcrEngineClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.ocr().timeout_seconds);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(timeout)
            .build()
            .context("Failed to build OCR engine HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.ocr().engine_url.trim_end_matches('/').to_string(),
            api_key: settings.ocr().api_key.clone(),
            max_submit_retries: settings.ocr().max_submit_retries,
        })
    }

    pub(crate) async fn extract(&self, source: OcrSource) -> Result<OcrExtraction> {
        if self.base_url.is_empty() {
            anyhow::bail!("OCR engine URL is not configured");
        }

        let endpoint = format!("{}/extract", self.base_url);
        let body = match &source {
            OcrSource::Url(url) => json!({ "image_url": url }),
            OcrSource::Bytes(bytes) => json!({ "image_base64": BASE64.encode(bytes) }),
        };

        let mut last_error = None;

        for attempt in 0..=self.max_submit_retries {
            let response = self
                .client
                .post(&endpoint)
                .header("X-Api-Key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let raw_body =
                        resp.text().await.context("Failed to read OCR engine response")?;

                    let parsed = serde_json::from_str::<Value>(&raw_body).map_err(|err| {
                        anyhow::anyhow!(
                            "OCR engine returned non-JSON body (status {}): {}: {}",
                            status,
                            err,
                            raw_body
                        )
                    })?;

                    if !status.is_success() {
                        last_error = Some(anyhow::anyhow!(
                            "OCR engine request failed (status {}): {}",
                            status,
                            extract_error_message(&parsed)
                        ));
                    } else if let Some(text) = parsed.get("text").and_then(Value::as_str) {
                        return Ok(OcrExtraction { text: text.to_string(), raw: parsed });
                    } else {
                        last_error =
                            Some(anyhow::anyhow!("OCR engine response missing text field"));
                    }
                }
                Err(err) => {
                    last_error = Some(anyhow::anyhow!(err).context("Failed to call OCR engine"));
                }
            }

            if attempt < self.max_submit_retries {
                let backoff = Duration::from_secs(2_u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown OCR engine error")))
    }
}

fn extract_error_message(value: &Value) -> String {
    value
        .get("error")
        .or_else(|| value.get("detail"))
        .and_then(Value::as_str)
        .unwrap_or("no error detail")
        .to_string()
}

pub(crate) struct OcrExecutor {
    engine: OcrEngineClient,
}

impl OcrExecutor {
    pub(crate) fn new(engine: OcrEngineClient) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobExecutor for OcrExecutor {
    fn kind(&self) -> JobKind {
        JobKind::Ocr
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        job: &Job,
    ) -> Result<Value, ExecutionError> {
        let pool = ctx.state().db();

        let problem = repositories::problems::find_by_id(pool, &job.target_id)
            .await
            .map_err(ExecutionError::failed)?
            .ok_or_else(|| ExecutionError::Failed("problem not found".to_string()))?;

        let image_url = job
            .payload
            .0
            .get("image_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| problem.original_image_url.clone());

        ctx.checkpoint().await?;

        // Locally stored images are inlined; anything else the engine
        // fetches itself.
        let source = match ctx.state().storage().key_from_public_url(&image_url) {
            Some(key) => {
                let bytes = ctx
                    .state()
                    .storage()
                    .read_object(&key)
                    .await
                    .map_err(ExecutionError::failed)?;
                OcrSource::Bytes(bytes)
            }
            None => OcrSource::Url(image_url.clone()),
        };

        let extraction = match self.engine.extract(source).await {
            Ok(extraction) => extraction,
            Err(err) => {
                mark_problem_ocr_failed(pool, &problem).await;
                return Err(ExecutionError::failed(err));
            }
        };

        ctx.checkpoint().await?;

        let new_version = apply_patch_with_retry(
            pool,
            &problem.id,
            ProblemPatch {
                status: Some(ProblemStatus::OcrDone),
                ocr_text: Some(extraction.text.clone()),
                ocr_raw: Some(extraction.raw.clone()),
                ..ProblemPatch::default()
            },
        )
        .await?;

        Ok(json!({
            "problem_id": problem.id,
            "ocr_text": extraction.text,
            "problem_version": new_version,
        }))
    }
}

/// All problem writes go through the version CAS; the worker competes with
/// interactive editors, so a conflict is re-read and retried a few times
/// before the attempt is failed.
pub(crate) async fn apply_patch_with_retry(
    pool: &PgPool,
    problem_id: &str,
    patch: ProblemPatch,
) -> Result<i32, ExecutionError> {
    for _ in 0..3 {
        let problem = repositories::problems::find_by_id(pool, problem_id)
            .await
            .map_err(ExecutionError::failed)?
            .ok_or_else(|| ExecutionError::Failed("problem deleted during OCR".to_string()))?;

        let applied = repositories::problems::apply_update(
            pool,
            &problem.user_id,
            &problem.id,
            problem.version,
            patch.clone(),
            primitive_now_utc(),
        )
        .await
        .map_err(ExecutionError::failed)?;

        if let Some(new_version) = applied {
            return Ok(new_version);
        }

        metrics::counter!("version_conflicts_total", "source" => "ocr_worker").increment(1);
    }

    Err(ExecutionError::Failed("problem version conflict persisted across retries".to_string()))
}

async fn mark_problem_ocr_failed(pool: &PgPool, problem: &Problem) {
    let patch =
        ProblemPatch { status: Some(ProblemStatus::OcrFailed), ..ProblemPatch::default() };

    if let Err(err) = apply_patch_with_retry(pool, &problem.id, patch).await {
        tracing::warn!(problem_id = %problem.id, error = %err, "Failed to mark problem OCR_FAILED");
    }
}
