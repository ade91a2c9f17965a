use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::state::AppState;
use crate::db::models::Job;
use crate::db::types::JobKind;
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum ExecutionError {
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

impl ExecutionError {
    pub(crate) fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Handed to executors for the duration of one attempt. Checkpoints observe
/// the job's cancellation marker; executors are expected to call
/// `checkpoint` between expensive steps.
pub(crate) struct ExecutionContext<'a> {
    state: &'a AppState,
    job_id: &'a str,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(state: &'a AppState, job_id: &'a str) -> Self {
        Self { state, job_id }
    }

    pub(crate) fn state(&self) -> &AppState {
        self.state
    }

    pub(crate) async fn checkpoint(&self) -> Result<(), ExecutionError> {
        match repositories::jobs::cancel_flag(self.state.db(), self.job_id).await {
            Ok(Some(true)) => Err(ExecutionError::Cancelled),
            Ok(_) => Ok(()),
            Err(err) => {
                // A failed flag read must not abort the attempt.
                tracing::warn!(job_id = self.job_id, error = %err, "Cancel checkpoint read failed");
                Ok(())
            }
        }
    }
}

/// Kind-specific work behind the job engine. Implementations must tolerate
/// being invoked more than once for the same payload: execution is
/// at-least-once under lease reclaim.
#[async_trait]
pub(crate) trait JobExecutor: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        job: &Job,
    ) -> Result<serde_json::Value, ExecutionError>;
}

/// Tagged dispatch table the worker pool is constructed with.
#[derive(Default)]
pub(crate) struct ExecutorRegistry {
    executors: HashMap<JobKind, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executors.insert(executor.kind(), executor);
        self
    }

    pub(crate) fn get(&self, kind: JobKind) -> Option<&Arc<dyn JobExecutor>> {
        self.executors.get(&kind)
    }
}
