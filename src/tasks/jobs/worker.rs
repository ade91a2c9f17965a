use anyhow::{Context, Result};
use time::Duration;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc as now_primitive;
use crate::db::types::JobStatus;
use crate::repositories;
use crate::services::executor::{ExecutionContext, ExecutionError, ExecutorRegistry};
use crate::services::notify::JobNotifier;

/// One worker iteration: lease the next eligible job, run its executor and
/// report the outcome. Returns whether a job was processed so the caller can
/// poll again immediately.
pub(crate) async fn claim_and_execute(
    state: &AppState,
    registry: &ExecutorRegistry,
    notifier: &JobNotifier,
    worker_id: &str,
) -> Result<bool> {
    let now = now_primitive();
    let lease_until = now + Duration::seconds(state.settings().jobs().lease_seconds as i64);

    let Some(job) = repositories::jobs::claim_next(state.db(), worker_id, lease_until, now)
        .await
        .context("Failed to claim job")?
    else {
        return Ok(false);
    };

    let queue_latency = (now.assume_utc() - job.created_at.assume_utc()).as_seconds_f64();
    metrics::histogram!("job_queue_latency_seconds", "kind" => job.kind.as_str())
        .record(queue_latency.max(0.0));
    tracing::info!(
        job_id = %job.id,
        kind = job.kind.as_str(),
        attempt = job.attempt_count,
        worker_id,
        "Job leased"
    );

    let Some(executor) = registry.get(job.kind) else {
        // Fail the single job closed instead of wedging the pool on an
        // unservable kind.
        tracing::error!(job_id = %job.id, kind = job.kind.as_str(), "No executor registered");
        repositories::jobs::fail_terminal(
            state.db(),
            &job.id,
            worker_id,
            "no executor registered for job kind",
            now_primitive(),
        )
        .await
        .context("Failed to fail job without executor")?;
        notify_terminal(state, notifier, &job.id).await;
        return Ok(true);
    };

    let ctx = ExecutionContext::new(state, &job.id);
    let started = std::time::Instant::now();

    match executor.execute(&ctx, &job).await {
        Ok(result) => {
            let accepted = repositories::jobs::report_success(
                state.db(),
                &job.id,
                worker_id,
                result,
                now_primitive(),
            )
            .await
            .context("Failed to report job success")?;

            if accepted {
                metrics::counter!(
                    "jobs_completed_total",
                    "kind" => job.kind.as_str(),
                    "status" => "succeeded"
                )
                .increment(1);
                metrics::histogram!("job_duration_seconds", "kind" => job.kind.as_str())
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(job_id = %job.id, "Job succeeded");
                notify_terminal(state, notifier, &job.id).await;
            } else {
                arbitrate_lost_report(state, &job.id, JobStatus::Succeeded).await?;
            }
        }
        Err(ExecutionError::Cancelled) => {
            let accepted = repositories::jobs::fail_terminal(
                state.db(),
                &job.id,
                worker_id,
                "cancelled",
                now_primitive(),
            )
            .await
            .context("Failed to finalize cancelled job")?;

            if accepted {
                metrics::counter!(
                    "jobs_completed_total",
                    "kind" => job.kind.as_str(),
                    "status" => "cancelled"
                )
                .increment(1);
                tracing::info!(job_id = %job.id, "Job cancelled during execution");
                notify_terminal(state, notifier, &job.id).await;
            } else {
                arbitrate_lost_report(state, &job.id, JobStatus::Failed).await?;
            }
        }
        Err(ExecutionError::Failed(message)) => {
            let backoff = state.settings().jobs().retry_backoff_seconds as f64;
            let outcome = repositories::jobs::report_failure(
                state.db(),
                &job.id,
                worker_id,
                &message,
                backoff,
                now_primitive(),
            )
            .await
            .context("Failed to report job failure")?;

            match outcome {
                Some(JobStatus::Failed) => {
                    metrics::counter!(
                        "jobs_completed_total",
                        "kind" => job.kind.as_str(),
                        "status" => "failed"
                    )
                    .increment(1);
                    tracing::error!(
                        job_id = %job.id,
                        error = %message,
                        "Job failed after exhausting retries"
                    );
                    notify_terminal(state, notifier, &job.id).await;
                }
                Some(_) => {
                    metrics::counter!("job_attempts_retried_total", "kind" => job.kind.as_str())
                        .increment(1);
                    tracing::warn!(job_id = %job.id, error = %message, "Job attempt failed; requeued");
                }
                None => {
                    arbitrate_lost_report(state, &job.id, JobStatus::Failed).await?;
                }
            }
        }
    }

    Ok(true)
}

/// A rejected owner-checked report means the lease was lost. A repeated
/// identical terminal report is a logged no-op; a conflicting terminal
/// report is an anomaly that must never overwrite the recorded outcome —
/// both fail only this report, never the pool.
async fn arbitrate_lost_report(
    state: &AppState,
    job_id: &str,
    intended: JobStatus,
) -> Result<()> {
    let job = repositories::jobs::find_by_id(state.db(), job_id)
        .await
        .context("Failed to fetch job after rejected report")?;

    let Some(job) = job else {
        tracing::warn!(job_id, "Job vanished before completion report");
        return Ok(());
    };

    if job.status == intended {
        tracing::info!(job_id, status = job.status.as_str(), "Duplicate terminal report ignored");
    } else if job.status.is_terminal() {
        metrics::counter!("job_state_anomalies_total").increment(1);
        tracing::error!(
            job_id,
            current = job.status.as_str(),
            intended = intended.as_str(),
            "Conflicting terminal report rejected"
        );
    } else {
        tracing::warn!(
            job_id,
            status = job.status.as_str(),
            "Lease lost before completion report; job requeued or re-leased"
        );
    }

    Ok(())
}

pub(super) async fn notify_terminal(state: &AppState, notifier: &JobNotifier, job_id: &str) {
    match repositories::jobs::find_by_id(state.db(), job_id).await {
        Ok(Some(job)) => notifier.job_finished(&job).await,
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(job_id, error = %err, "Failed to load job for completion webhook");
        }
    }
}
