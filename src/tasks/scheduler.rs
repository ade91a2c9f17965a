use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::core::state::AppState;
use crate::services::executor::ExecutorRegistry;
use crate::services::notify::JobNotifier;
use crate::services::ocr::{OcrEngineClient, OcrExecutor};
use crate::services::pdf_export::PdfExportExecutor;
use crate::tasks::jobs;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let engine = OcrEngineClient::from_settings(state.settings())?;
    let registry = Arc::new(
        ExecutorRegistry::new()
            .with(Arc::new(OcrExecutor::new(engine)))
            .with(Arc::new(PdfExportExecutor::new())),
    );
    let notifier = JobNotifier::from_settings(state.settings())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let concurrency = state.settings().jobs().worker_concurrency as usize;
    let mut handles = Vec::with_capacity(concurrency + 1);

    for index in 0..concurrency {
        let worker_id = format!("worker-{}-{}", std::process::id(), index);
        handles.push(tokio::spawn(job_worker(
            state.clone(),
            registry.clone(),
            notifier.clone(),
            worker_id,
            shutdown_rx.clone(),
        )));
    }

    handles.push(tokio::spawn(maintenance_loop(
        state.clone(),
        notifier.clone(),
        shutdown_rx.clone(),
    )));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn job_worker(
    state: AppState,
    registry: Arc<ExecutorRegistry>,
    notifier: JobNotifier,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_interval = Duration::from_secs(state.settings().jobs().poll_interval_seconds);

    loop {
        if *shutdown.borrow() {
            break;
        }

        match jobs::claim_and_execute(&state, &registry, &notifier, &worker_id).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(worker_id, error = %err, "Job worker iteration failed");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(poll_interval) => {}
        }
    }
}

async fn maintenance_loop(
    state: AppState,
    notifier: JobNotifier,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick =
        interval(Duration::from_secs(state.settings().jobs().maintenance_interval_seconds));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = jobs::reclaim_expired_leases(&state, &notifier).await {
                    tracing::error!(error = %err, "reclaim_expired_leases failed");
                }
                if let Err(err) = jobs::finalize_cancelled_jobs(&state, &notifier).await {
                    tracing::error!(error = %err, "finalize_cancelled_jobs failed");
                }
                if let Err(err) = jobs::purge_idempotency_records(&state).await {
                    tracing::error!(error = %err, "purge_idempotency_records failed");
                }
            }
        }
    }
}
