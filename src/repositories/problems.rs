use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Problem;
use crate::db::types::ProblemStatus;

const COLUMNS: &str = "\
    id, user_id, collection_id, status, original_image_url, cropped_image_url, \
    ocr_text, ocr_raw, note, tags, order_index, version, created_at, updated_at";

pub(crate) struct CreateProblem<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub collection_id: &'a str,
    pub status: ProblemStatus,
    pub original_image_url: &'a str,
    pub cropped_image_url: Option<&'a str>,
    pub order_index: i32,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateProblem<'_>,
) -> Result<Problem, sqlx::Error> {
    sqlx::query_as::<_, Problem>(&format!(
        "INSERT INTO problems (
            id, user_id, collection_id, status, original_image_url, cropped_image_url,
            order_index, version, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,1,$8,$9)
        RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.user_id)
    .bind(params.collection_id)
    .bind(params.status)
    .bind(params.original_image_url)
    .bind(params.cropped_image_url)
    .bind(params.order_index)
    .bind(params.created_at)
    .bind(params.updated_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Problem>, sqlx::Error> {
    sqlx::query_as::<_, Problem>(&format!("SELECT {COLUMNS} FROM problems WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_for_user(
    pool: &PgPool,
    user_id: &str,
    id: &str,
) -> Result<Option<Problem>, sqlx::Error> {
    sqlx::query_as::<_, Problem>(&format!(
        "SELECT {COLUMNS} FROM problems WHERE id = $1 AND user_id = $2",
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub(crate) struct ListParams<'a> {
    pub user_id: &'a str,
    pub collection_id: &'a str,
    pub limit: i64,
    pub offset: i64,
    pub updated_after: Option<PrimitiveDateTime>,
}

pub(crate) async fn list_by_collection(
    pool: &PgPool,
    params: ListParams<'_>,
) -> Result<Vec<Problem>, sqlx::Error> {
    sqlx::query_as::<_, Problem>(&format!(
        "SELECT {COLUMNS} FROM problems
         WHERE collection_id = $1 AND user_id = $2
           AND ($3::timestamp IS NULL OR updated_at > $3)
         ORDER BY updated_at DESC
         LIMIT $4 OFFSET $5",
    ))
    .bind(params.collection_id)
    .bind(params.user_id)
    .bind(params.updated_after)
    .bind(params.limit)
    .bind(params.offset)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_collection_for_export(
    pool: &PgPool,
    collection_id: &str,
) -> Result<Vec<Problem>, sqlx::Error> {
    sqlx::query_as::<_, Problem>(&format!(
        "SELECT {COLUMNS} FROM problems
         WHERE collection_id = $1
         ORDER BY order_index, created_at",
    ))
    .bind(collection_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn count_by_collections(
    pool: &PgPool,
    collection_ids: &[String],
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT collection_id, COUNT(*) FROM problems
         WHERE collection_id = ANY($1)
         GROUP BY collection_id",
    )
    .bind(collection_ids)
    .fetch_all(pool)
    .await
}

/// Field patch applied through the version CAS. `None` leaves a column
/// untouched; patched columns cannot be reset to NULL through this path.
#[derive(Debug, Default, Clone)]
pub(crate) struct ProblemPatch {
    pub collection_id: Option<String>,
    pub status: Option<ProblemStatus>,
    pub cropped_image_url: Option<String>,
    pub ocr_text: Option<String>,
    pub ocr_raw: Option<serde_json::Value>,
    pub note: Option<String>,
    pub tags: Option<Vec<String>>,
    pub order_index: Option<i32>,
}

/// Single-round-trip compare-and-swap on `(id, user_id, version)`. Returns
/// the new version, or `None` when the expected version no longer matches
/// (or the row does not exist) — nothing is written in that case.
pub(crate) async fn apply_update(
    pool: &PgPool,
    user_id: &str,
    id: &str,
    expected_version: i32,
    patch: ProblemPatch,
    now: PrimitiveDateTime,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        "UPDATE problems SET
            collection_id = COALESCE($1, collection_id),
            status = COALESCE($2, status),
            cropped_image_url = COALESCE($3, cropped_image_url),
            ocr_text = COALESCE($4, ocr_text),
            ocr_raw = COALESCE($5, ocr_raw),
            note = COALESCE($6, note),
            tags = COALESCE($7, tags),
            order_index = COALESCE($8, order_index),
            version = version + 1,
            updated_at = $9
         WHERE id = $10 AND user_id = $11 AND version = $12
         RETURNING version",
    )
    .bind(patch.collection_id)
    .bind(patch.status)
    .bind(patch.cropped_image_url)
    .bind(patch.ocr_text)
    .bind(patch.ocr_raw.map(Json))
    .bind(patch.note)
    .bind(patch.tags.map(Json))
    .bind(patch.order_index)
    .bind(now)
    .bind(id)
    .bind(user_id)
    .bind(expected_version)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn delete(pool: &PgPool, user_id: &str, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM problems WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
