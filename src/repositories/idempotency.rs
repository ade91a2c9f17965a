use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::IdempotencyRecord;
use crate::db::types::JobKind;

/// Dedup key stored in the unique index. The caller key is optionally
/// prefixed with the target id so the same token can be reused across
/// different resources (configurable scope).
pub(crate) fn scope_key(include_target: bool, target_id: &str, key: &str) -> String {
    if include_target {
        format!("{target_id}:{key}")
    } else {
        key.to_string()
    }
}

pub(crate) struct ClaimScope<'a> {
    pub user_id: &'a str,
    pub kind: JobKind,
    pub scope_key: &'a str,
    pub job_id: &'a str,
    pub expires_at: PrimitiveDateTime,
    pub now: PrimitiveDateTime,
}

/// Strongly consistent insert-if-absent. Returns the claimed `job_id` when
/// this caller won the key (fresh insert, or takeover of an expired record);
/// `None` when a live record already exists and the caller lost.
///
/// Runs on the submission transaction: a lost claim rolls the speculative
/// job row back with it.
pub(crate) async fn claim_scope(
    conn: &mut PgConnection,
    params: ClaimScope<'_>,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "INSERT INTO idempotency_keys (user_id, kind, scope_key, job_id, expires_at, created_at)
         VALUES ($1,$2,$3,$4,$5,$6)
         ON CONFLICT (user_id, kind, scope_key) DO UPDATE
             SET job_id = EXCLUDED.job_id,
                 expires_at = EXCLUDED.expires_at,
                 created_at = EXCLUDED.created_at
             WHERE idempotency_keys.expires_at <= $6
         RETURNING job_id",
    )
    .bind(params.user_id)
    .bind(params.kind)
    .bind(params.scope_key)
    .bind(params.job_id)
    .bind(params.expires_at)
    .bind(params.now)
    .fetch_optional(&mut *conn)
    .await
}

pub(crate) async fn find_job_id(
    pool: &PgPool,
    user_id: &str,
    kind: JobKind,
    scope_key: &str,
    now: PrimitiveDateTime,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT job_id FROM idempotency_keys
         WHERE user_id = $1 AND kind = $2 AND scope_key = $3 AND expires_at > $4",
    )
    .bind(user_id)
    .bind(kind)
    .bind(scope_key)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_record(
    pool: &PgPool,
    user_id: &str,
    kind: JobKind,
    scope_key: &str,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    sqlx::query_as::<_, IdempotencyRecord>(
        "SELECT user_id, kind, scope_key, job_id, expires_at, created_at
         FROM idempotency_keys
         WHERE user_id = $1 AND kind = $2 AND scope_key = $3",
    )
    .bind(user_id)
    .bind(kind)
    .bind(scope_key)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn purge_expired(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(deleted.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::scope_key;

    #[test]
    fn scope_key_plain() {
        assert_eq!(scope_key(false, "problem-1", "abc"), "abc");
    }

    #[test]
    fn scope_key_with_target() {
        assert_eq!(scope_key(true, "problem-1", "abc"), "problem-1:abc");
    }
}
