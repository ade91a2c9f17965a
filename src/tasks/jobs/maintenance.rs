use anyhow::{Context, Result};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc as now_primitive;
use crate::db::types::JobStatus;
use crate::repositories;
use crate::services::notify::JobNotifier;

use super::worker::notify_terminal;

/// Requeue RUNNING jobs whose lease lapsed; jobs with no attempt budget left
/// go terminal instead.
pub(crate) async fn reclaim_expired_leases(
    state: &AppState,
    notifier: &JobNotifier,
) -> Result<()> {
    let now = now_primitive();
    let reclaimed = repositories::jobs::reclaim_expired(state.db(), now)
        .await
        .context("Failed to reclaim expired leases")?;

    if reclaimed.is_empty() {
        return Ok(());
    }

    let mut requeued = 0;
    let mut failed = 0;

    for (job_id, status) in &reclaimed {
        match status {
            JobStatus::Pending => requeued += 1,
            JobStatus::Failed => {
                failed += 1;
                notify_terminal(state, notifier, job_id).await;
            }
            _ => {}
        }
    }

    tracing::warn!(requeued, failed, "Reclaimed expired job leases");
    metrics::counter!("job_leases_reclaimed_total").increment(reclaimed.len() as u64);

    Ok(())
}

/// Finalize the cancellation marker for jobs no worker holds.
pub(crate) async fn finalize_cancelled_jobs(
    state: &AppState,
    notifier: &JobNotifier,
) -> Result<()> {
    let now = now_primitive();
    let cancelled = repositories::jobs::finalize_cancellations(state.db(), now)
        .await
        .context("Failed to finalize cancelled jobs")?;

    if cancelled.is_empty() {
        return Ok(());
    }

    for job_id in &cancelled {
        notify_terminal(state, notifier, job_id).await;
    }

    tracing::info!(cancelled = cancelled.len(), "Finalized cancelled jobs");
    metrics::counter!("jobs_cancelled_total").increment(cancelled.len() as u64);

    Ok(())
}

pub(crate) async fn purge_idempotency_records(state: &AppState) -> Result<()> {
    let now = now_primitive();
    let purged = repositories::idempotency::purge_expired(state.db(), now)
        .await
        .context("Failed to purge idempotency records")?;

    if purged > 0 {
        tracing::debug!(purged, "Purged expired idempotency records");
        metrics::counter!("idempotency_records_purged_total").increment(purged);
    }

    Ok(())
}
