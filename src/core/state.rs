use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::job_queue::JobQueueService;
use crate::services::storage::StorageService;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    storage: StorageService,
    jobs: JobQueueService,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        storage: StorageService,
    ) -> Self {
        let jobs = JobQueueService::new(db.clone(), &settings);
        Self { inner: Arc::new(InnerState { settings, db, redis, storage, jobs }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn storage(&self) -> &StorageService {
        &self.inner.storage
    }

    pub(crate) fn jobs(&self) -> &JobQueueService {
        &self.inner.jobs
    }
}
