use sqlx::PgPool;
use thiserror::Error;
use time::Duration;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::core::time::primitive_now_utc;
use crate::db::models::Job;
use crate::db::types::JobKind;
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum JobError {
    #[error("job not found")]
    NotFound,
    #[error("idempotency record points at a missing job")]
    DanglingIdempotencyRecord,
    #[error("idempotency arbitration did not converge")]
    Contention,
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
struct QueueConfig {
    max_attempts: i32,
    idempotency_retention: Duration,
    dedupe_include_target: bool,
}

/// Submission-side surface of the job engine: owns idempotent job creation
/// and the caller-facing status/cancel operations. Constructed once at
/// process start with the backing pool; the worker pool drains the queue it
/// feeds.
#[derive(Clone)]
pub(crate) struct JobQueueService {
    pool: PgPool,
    config: QueueConfig,
}

pub(crate) struct SubmitJob<'a> {
    pub kind: JobKind,
    pub user_id: &'a str,
    pub target_id: &'a str,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<&'a str>,
}

pub(crate) struct SubmitOutcome {
    pub job: Job,
    /// True when an existing job was returned for a duplicate key.
    pub deduplicated: bool,
}

impl JobQueueService {
    pub(crate) fn new(pool: PgPool, settings: &Settings) -> Self {
        let jobs = settings.jobs();
        Self {
            pool,
            config: QueueConfig {
                max_attempts: jobs.max_attempts as i32,
                idempotency_retention: Duration::hours(jobs.idempotency_retention_hours as i64),
                dedupe_include_target: jobs.dedupe_include_target,
            },
        }
    }

    /// Creates a PENDING job, deduplicated on `(requester, kind, key)` when a
    /// key is supplied: concurrent duplicate submissions converge on one job
    /// and all callers receive its id.
    pub(crate) async fn submit(&self, params: SubmitJob<'_>) -> Result<SubmitOutcome, JobError> {
        let Some(key) = params.idempotency_key else {
            let job = self.insert_job(&params, None).await?;
            metrics::counter!("jobs_submitted_total", "kind" => params.kind.as_str()).increment(1);
            return Ok(SubmitOutcome { job, deduplicated: false });
        };

        let scope = repositories::idempotency::scope_key(
            self.config.dedupe_include_target,
            params.target_id,
            key,
        );

        // Two rounds cover the race where the winning record expires between
        // a lost claim and the follow-up lookup.
        for _ in 0..2 {
            let now = primitive_now_utc();
            let mut tx = self.pool.begin().await?;

            let job = repositories::jobs::create(
                &mut tx,
                repositories::jobs::CreateJob {
                    id: &Uuid::new_v4().to_string(),
                    kind: params.kind,
                    user_id: params.user_id,
                    target_id: params.target_id,
                    payload: params.payload.clone(),
                    idempotency_key: Some(key),
                    max_attempts: self.config.max_attempts,
                    created_at: now,
                },
            )
            .await?;

            let claimed = repositories::idempotency::claim_scope(
                &mut tx,
                repositories::idempotency::ClaimScope {
                    user_id: params.user_id,
                    kind: params.kind,
                    scope_key: &scope,
                    job_id: &job.id,
                    expires_at: now + self.config.idempotency_retention,
                    now,
                },
            )
            .await?;

            if claimed.is_some() {
                tx.commit().await?;
                metrics::counter!("jobs_submitted_total", "kind" => params.kind.as_str())
                    .increment(1);
                return Ok(SubmitOutcome { job, deduplicated: false });
            }

            // Lost the key: the speculative job row rolls back with the
            // transaction and the caller gets the winner's job.
            tx.rollback().await?;

            let existing = repositories::idempotency::find_job_id(
                &self.pool,
                params.user_id,
                params.kind,
                &scope,
                primitive_now_utc(),
            )
            .await?;

            if let Some(existing_id) = existing {
                let job = repositories::jobs::find_by_id(&self.pool, &existing_id)
                    .await?
                    .ok_or(JobError::DanglingIdempotencyRecord)?;
                metrics::counter!("jobs_deduplicated_total", "kind" => params.kind.as_str())
                    .increment(1);
                return Ok(SubmitOutcome { job, deduplicated: true });
            }
        }

        Err(JobError::Contention)
    }

    pub(crate) async fn get_for_user(&self, user_id: &str, job_id: &str) -> Result<Job, JobError> {
        repositories::jobs::find_for_user(&self.pool, user_id, job_id)
            .await?
            .ok_or(JobError::NotFound)
    }

    /// Sets the cancellation marker. A no-op on jobs that are already
    /// terminal; workers observe the marker at claim time and at executor
    /// checkpoints.
    pub(crate) async fn request_cancel(
        &self,
        user_id: &str,
        job_id: &str,
    ) -> Result<Job, JobError> {
        let now = primitive_now_utc();
        let marked =
            repositories::jobs::request_cancel(&self.pool, user_id, job_id, now).await?;

        let job = repositories::jobs::find_for_user(&self.pool, user_id, job_id)
            .await?
            .ok_or(JobError::NotFound)?;

        if marked {
            tracing::info!(job_id, kind = job.kind.as_str(), "Cancellation requested");
        }

        Ok(job)
    }

    async fn insert_job(
        &self,
        params: &SubmitJob<'_>,
        idempotency_key: Option<&str>,
    ) -> Result<Job, JobError> {
        let now = primitive_now_utc();
        let mut conn = self.pool.acquire().await?;

        let job = repositories::jobs::create(
            &mut conn,
            repositories::jobs::CreateJob {
                id: &Uuid::new_v4().to_string(),
                kind: params.kind,
                user_id: params.user_id,
                target_id: params.target_id,
                payload: params.payload.clone(),
                idempotency_key,
                max_attempts: self.config.max_attempts,
                created_at: now,
            },
        )
        .await?;

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn submit_params<'a>(user_id: &'a str, target_id: &'a str, key: Option<&'a str>) -> SubmitJob<'a> {
        SubmitJob {
            kind: JobKind::Ocr,
            user_id,
            target_id,
            payload: serde_json::json!({}),
            idempotency_key: key,
        }
    }

    #[tokio::test]
    async fn concurrent_duplicate_submissions_converge_on_one_job() {
        let ctx = test_support::setup_test_context().await;
        let user = test_support::insert_user(ctx.state.db(), "dup-user").await;

        let service = JobQueueService::new(ctx.state.db().clone(), ctx.state.settings());
        let (first, second) = tokio::join!(
            service.submit(submit_params(&user.id, "problem-1", Some("abc"))),
            service.submit(submit_params(&user.id, "problem-1", Some("abc"))),
        );

        let first = first.expect("first submit");
        let second = second.expect("second submit");
        assert_eq!(first.job.id, second.job.id);
        assert!(first.deduplicated != second.deduplicated);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(ctx.state.db())
            .await
            .expect("count jobs");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn missing_key_always_creates_a_new_job() {
        let ctx = test_support::setup_test_context().await;
        let user = test_support::insert_user(ctx.state.db(), "nokey-user").await;

        let service = JobQueueService::new(ctx.state.db().clone(), ctx.state.settings());
        let first = service.submit(submit_params(&user.id, "problem-1", None)).await.unwrap();
        let second = service.submit(submit_params(&user.id, "problem-1", None)).await.unwrap();

        assert_ne!(first.job.id, second.job.id);
    }

    #[tokio::test]
    async fn expired_idempotency_record_starts_a_new_job() {
        let ctx = test_support::setup_test_context().await;
        let user = test_support::insert_user(ctx.state.db(), "expiry-user").await;

        let service = JobQueueService::new(ctx.state.db().clone(), ctx.state.settings());
        let first = service.submit(submit_params(&user.id, "problem-1", Some("abc"))).await.unwrap();

        sqlx::query("UPDATE idempotency_keys SET expires_at = expires_at - INTERVAL '100 hours'")
            .execute(ctx.state.db())
            .await
            .expect("age record");

        let second =
            service.submit(submit_params(&user.id, "problem-1", Some("abc"))).await.unwrap();

        assert_ne!(first.job.id, second.job.id);
        assert!(!second.deduplicated);

        // The record was taken over, not duplicated.
        let record = crate::repositories::idempotency::find_record(
            ctx.state.db(),
            &user.id,
            JobKind::Ocr,
            "abc",
        )
        .await
        .expect("find record")
        .expect("record exists");
        assert_eq!(record.job_id, second.job.id);
    }

    #[tokio::test]
    async fn dedup_scope_distinguishes_kinds() {
        let ctx = test_support::setup_test_context().await;
        let user = test_support::insert_user(ctx.state.db(), "kinds-user").await;

        let service = JobQueueService::new(ctx.state.db().clone(), ctx.state.settings());
        let ocr = service.submit(submit_params(&user.id, "target-1", Some("abc"))).await.unwrap();
        let pdf = service
            .submit(SubmitJob {
                kind: JobKind::PdfExport,
                user_id: &user.id,
                target_id: "target-1",
                payload: serde_json::json!({}),
                idempotency_key: Some("abc"),
            })
            .await
            .unwrap();

        assert_ne!(ocr.job.id, pdf.job.id);
    }
}
