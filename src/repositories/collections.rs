use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Collection;

const COLUMNS: &str = "id, user_id, name, created_at, updated_at";

pub(crate) struct CreateCollection<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub name: &'a str,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    pool: &PgPool,
    params: CreateCollection<'_>,
) -> Result<Collection, sqlx::Error> {
    sqlx::query_as::<_, Collection>(&format!(
        "INSERT INTO collections (id, user_id, name, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5)
         RETURNING {COLUMNS}",
    ))
    .bind(params.id)
    .bind(params.user_id)
    .bind(params.name)
    .bind(params.created_at)
    .bind(params.updated_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_for_user(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<Collection>, sqlx::Error> {
    sqlx::query_as::<_, Collection>(&format!(
        "SELECT {COLUMNS} FROM collections WHERE user_id = $1 ORDER BY created_at",
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn find_for_user(
    pool: &PgPool,
    user_id: &str,
    id: &str,
) -> Result<Option<Collection>, sqlx::Error> {
    sqlx::query_as::<_, Collection>(&format!(
        "SELECT {COLUMNS} FROM collections WHERE id = $1 AND user_id = $2",
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn rename(
    pool: &PgPool,
    user_id: &str,
    id: &str,
    name: &str,
    now: PrimitiveDateTime,
) -> Result<Option<Collection>, sqlx::Error> {
    sqlx::query_as::<_, Collection>(&format!(
        "UPDATE collections SET name = $1, updated_at = $2
         WHERE id = $3 AND user_id = $4
         RETURNING {COLUMNS}",
    ))
    .bind(name)
    .bind(now)
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn delete(pool: &PgPool, user_id: &str, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM collections WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
