use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Job;
use crate::db::types::{JobKind, JobStatus};

const COLUMNS: &str = "\
    id, kind, status, user_id, target_id, payload, idempotency_key, \
    attempt_count, max_attempts, lease_owner, lease_expires_at, next_attempt_at, \
    cancel_requested, result, error_message, created_at, updated_at";

// Qualified for queries that join the table against a claim CTE.
const QUALIFIED_COLUMNS: &str = "\
    jobs.id, jobs.kind, jobs.status, jobs.user_id, jobs.target_id, jobs.payload, \
    jobs.idempotency_key, jobs.attempt_count, jobs.max_attempts, jobs.lease_owner, \
    jobs.lease_expires_at, jobs.next_attempt_at, jobs.cancel_requested, jobs.result, \
    jobs.error_message, jobs.created_at, jobs.updated_at";

pub(crate) struct CreateJob<'a> {
    pub id: &'a str,
    pub kind: JobKind,
    pub user_id: &'a str,
    pub target_id: &'a str,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<&'a str>,
    pub max_attempts: i32,
    pub created_at: PrimitiveDateTime,
}

/// Runs inside the submission transaction so the job row and its
/// idempotency record commit or roll back together.
pub(crate) async fn create(
    conn: &mut PgConnection,
    params: CreateJob<'_>,
) -> Result<Job, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "INSERT INTO jobs (
            id, kind, status, user_id, target_id, payload, idempotency_key,
            attempt_count, max_attempts, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,0,$8,$9,$9)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.kind)
    .bind(JobStatus::Pending)
    .bind(params.user_id)
    .bind(params.target_id)
    .bind(Json(params.payload))
    .bind(params.idempotency_key)
    .bind(params.max_attempts)
    .bind(params.created_at)
    .fetch_one(&mut *conn)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!("SELECT {COLUMNS} FROM jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_for_user(
    pool: &PgPool,
    user_id: &str,
    id: &str,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE id = $1 AND user_id = $2",
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Atomically lease the next eligible job: the oldest PENDING row whose
/// backoff gate has passed, or a RUNNING row whose lease expired and which
/// still has attempt budget (taking it over counts as an attempt). Exactly
/// one concurrent caller wins per row; cancel-flagged rows are left for the
/// maintenance sweep.
pub(crate) async fn claim_next(
    pool: &PgPool,
    worker_id: &str,
    lease_until: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(&format!(
        "WITH candidate AS (
            SELECT id, status
            FROM jobs
            WHERE cancel_requested = FALSE
              AND (
                    (status = $1 AND (next_attempt_at IS NULL OR next_attempt_at <= $4))
                 OR (status = $2 AND lease_expires_at <= $4 AND attempt_count + 1 < max_attempts)
              )
            ORDER BY created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE jobs
        SET status = $2,
            lease_owner = $3,
            lease_expires_at = $5,
            attempt_count = jobs.attempt_count
                + CASE WHEN candidate.status = $2 THEN 1 ELSE 0 END,
            next_attempt_at = NULL,
            updated_at = $4
        FROM candidate
        WHERE jobs.id = candidate.id
        RETURNING {QUALIFIED_COLUMNS}",
    ))
    .bind(JobStatus::Pending)
    .bind(JobStatus::Running)
    .bind(worker_id)
    .bind(now)
    .bind(lease_until)
    .fetch_optional(pool)
    .await
}

/// Owner-checked terminal commit. Zero rows means the lease was lost or the
/// job is already terminal; the caller arbitrates via `find_by_id`.
pub(crate) async fn report_success(
    pool: &PgPool,
    id: &str,
    worker_id: &str,
    result: serde_json::Value,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE jobs
         SET status = $1,
             result = $2,
             error_message = NULL,
             lease_owner = NULL,
             lease_expires_at = NULL,
             updated_at = $3
         WHERE id = $4 AND status = $5 AND lease_owner = $6",
    )
    .bind(JobStatus::Succeeded)
    .bind(Json(result))
    .bind(now)
    .bind(id)
    .bind(JobStatus::Running)
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Owner-checked failure report: counts the attempt, requeues with a backoff
/// gate proportional to the attempt count, or fails terminally once the
/// attempt budget is spent. Returns the resulting status when the report was
/// accepted.
pub(crate) async fn report_failure(
    pool: &PgPool,
    id: &str,
    worker_id: &str,
    error_message: &str,
    backoff_seconds: f64,
    now: PrimitiveDateTime,
) -> Result<Option<JobStatus>, sqlx::Error> {
    sqlx::query_scalar::<_, JobStatus>(
        "UPDATE jobs
         SET attempt_count = attempt_count + 1,
             status = CASE WHEN attempt_count + 1 >= max_attempts THEN $1 ELSE $2 END,
             error_message = $3,
             next_attempt_at = CASE WHEN attempt_count + 1 >= max_attempts THEN NULL
                 ELSE $4 + make_interval(secs => $5 * (attempt_count + 1)) END,
             lease_owner = NULL,
             lease_expires_at = NULL,
             updated_at = $4
         WHERE id = $6 AND status = $7 AND lease_owner = $8
         RETURNING status",
    )
    .bind(JobStatus::Failed)
    .bind(JobStatus::Pending)
    .bind(error_message)
    .bind(now)
    .bind(backoff_seconds)
    .bind(id)
    .bind(JobStatus::Running)
    .bind(worker_id)
    .fetch_optional(pool)
    .await
}

/// Owner-checked terminal failure that bypasses the retry budget
/// (cancellation aborts).
pub(crate) async fn fail_terminal(
    pool: &PgPool,
    id: &str,
    worker_id: &str,
    error_message: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE jobs
         SET status = $1,
             error_message = $2,
             lease_owner = NULL,
             lease_expires_at = NULL,
             updated_at = $3
         WHERE id = $4 AND status = $5 AND lease_owner = $6",
    )
    .bind(JobStatus::Failed)
    .bind(error_message)
    .bind(now)
    .bind(id)
    .bind(JobStatus::Running)
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn request_cancel(
    pool: &PgPool,
    user_id: &str,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE jobs
         SET cancel_requested = TRUE, updated_at = $1
         WHERE id = $2 AND user_id = $3 AND status IN ($4, $5)",
    )
    .bind(now)
    .bind(id)
    .bind(user_id)
    .bind(JobStatus::Pending)
    .bind(JobStatus::Running)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn cancel_flag(pool: &PgPool, id: &str) -> Result<Option<bool>, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT cancel_requested FROM jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Lease-expiry sweep: every RUNNING job whose lease has lapsed loses it,
/// counts the attempt, and is requeued or terminally failed.
pub(crate) async fn reclaim_expired(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Vec<(String, JobStatus)>, sqlx::Error> {
    sqlx::query_as::<_, (String, JobStatus)>(
        "UPDATE jobs
         SET attempt_count = attempt_count + 1,
             status = CASE WHEN attempt_count + 1 >= max_attempts THEN $1 ELSE $2 END,
             error_message = CASE WHEN attempt_count + 1 >= max_attempts
                 THEN 'lease expired with no attempts remaining' ELSE error_message END,
             lease_owner = NULL,
             lease_expires_at = NULL,
             updated_at = $3
         WHERE status = $4 AND lease_expires_at <= $3
         RETURNING id, status",
    )
    .bind(JobStatus::Failed)
    .bind(JobStatus::Pending)
    .bind(now)
    .bind(JobStatus::Running)
    .fetch_all(pool)
    .await
}

/// Finalize cancellation for jobs nothing is working on.
pub(crate) async fn finalize_cancellations(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "UPDATE jobs
         SET status = $1,
             error_message = 'cancelled',
             lease_owner = NULL,
             lease_expires_at = NULL,
             updated_at = $2
         WHERE cancel_requested = TRUE AND status = $3
         RETURNING id",
    )
    .bind(JobStatus::Failed)
    .bind(now)
    .bind(JobStatus::Pending)
    .fetch_all(pool)
    .await
}
