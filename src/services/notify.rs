use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

use crate::core::config::Settings;
use crate::core::time::format_primitive;
use crate::db::models::Job;

/// Optional push channel for terminal job transitions. Polling the status
/// endpoint is the primary interface; this webhook is fire-and-forget and a
/// delivery failure is only logged.
#[derive(Clone)]
pub(crate) struct JobNotifier {
    client: Client,
    webhook_url: Option<String>,
}

impl JobNotifier {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build webhook HTTP client")?;

        Ok(Self { client, webhook_url: settings.jobs().completion_webhook_url.clone() })
    }

    pub(crate) async fn job_finished(&self, job: &Job) {
        let Some(url) = &self.webhook_url else {
            return;
        };

        let payload = json!({
            "job_id": job.id,
            "kind": job.kind,
            "status": job.status,
            "result": job.result.as_ref().map(|result| result.0.clone()),
            "error_message": job.error_message,
            "finished_at": format_primitive(job.updated_at),
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(job_id = %job.id, "Completion webhook delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    job_id = %job.id,
                    status = %response.status(),
                    "Completion webhook rejected"
                );
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "Completion webhook failed");
            }
        }
    }
}
