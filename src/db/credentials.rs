//! Credential row persistence: reset, selection, and usage accounting.

use crate::models::{Credential, CredentialLimits, SearchType};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Resets the daily usage counters of every active credential whose `last_reset`
/// is null or precedes `reset_boundary`. Mirrors the reference deployment's
/// reset-then-select flow, done here as the "reset" half.
pub async fn reset_expired(pool: &PgPool, reset_boundary: DateTime<Utc>, now: DateTime<Utc>) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE credentials \
         SET used_keyword = 0, used_around = 0, used_polygon = 0, last_reset = $2 \
         WHERE active AND (last_reset IS NULL OR last_reset < $1)",
    )
    .bind(reset_boundary)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// All active credentials with remaining quota for `search_type`, for the pool
/// to choose among at random.
pub async fn eligible(pool: &PgPool, search_type: SearchType) -> sqlx::Result<Vec<Credential>> {
    let rows = sqlx::query_as::<_, Credential>(
        "SELECT * FROM credentials WHERE active AND \
         (CASE $1 \
            WHEN 'keyword' THEN used_keyword < COALESCE(limit_keyword, 100) \
            WHEN 'around'  THEN used_around  < COALESCE(limit_around, 100) \
            WHEN 'polygon' THEN used_polygon < COALESCE(limit_polygon, 100) \
          END)",
    )
    .bind(search_type.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn increment_usage(pool: &PgPool, credential_id: i32, search_type: SearchType) -> sqlx::Result<()> {
    let column = match search_type {
        SearchType::Keyword => "used_keyword",
        SearchType::Around => "used_around",
        SearchType::Polygon => "used_polygon",
    };
    let sql = format!("UPDATE credentials SET {column} = {column} + 1 WHERE id = $1");
    sqlx::query(&sql).bind(credential_id).execute(pool).await?;
    Ok(())
}

/// Marks a credential as having hit its daily ceiling immediately, without waiting
/// for the next natural increment (e.g. on an upstream "quota exceeded" response).
pub async fn mark_exhausted(pool: &PgPool, credential_id: i32, search_type: SearchType) -> sqlx::Result<()> {
    let (used_col, limit_col, default_limit) = match search_type {
        SearchType::Keyword => ("used_keyword", "limit_keyword", 100),
        SearchType::Around => ("used_around", "limit_around", 100),
        SearchType::Polygon => ("used_polygon", "limit_polygon", 100),
    };
    let sql = format!(
        "UPDATE credentials SET {used_col} = COALESCE({limit_col}, {default_limit}) WHERE id = $1"
    );
    sqlx::query(&sql).bind(credential_id).execute(pool).await?;
    Ok(())
}

pub async fn disable(pool: &PgPool, credential_id: i32, reason: &str) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE credentials SET active = false, \
         description = COALESCE(description, '') || ' [disabled: ' || $2 || ']' \
         WHERE id = $1",
    )
    .bind(credential_id)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert(
    pool: &PgPool,
    key: &str,
    description: Option<&str>,
) -> sqlx::Result<Credential> {
    sqlx::query_as::<_, Credential>(
        "INSERT INTO credentials (key, active, description, used_keyword, used_around, used_polygon) \
         VALUES ($1, true, $2, 0, 0, 0) RETURNING *",
    )
    .bind(key)
    .bind(description)
    .fetch_one(pool)
    .await
}

pub async fn all(pool: &PgPool) -> sqlx::Result<Vec<Credential>> {
    sqlx::query_as::<_, Credential>("SELECT * FROM credentials ORDER BY id")
        .fetch_all(pool)
        .await
}

pub async fn find_by_id(pool: &PgPool, credential_id: i32) -> sqlx::Result<Option<Credential>> {
    sqlx::query_as::<_, Credential>("SELECT * FROM credentials WHERE id = $1")
        .bind(credential_id)
        .fetch_optional(pool)
        .await
}

/// Applies only the `Some(...)` fields of `limits`, leaving the rest of the
/// credential's quota configuration untouched.
pub async fn update_limits(pool: &PgPool, credential_id: i32, limits: &CredentialLimits) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE credentials SET \
         limit_keyword = COALESCE($2, limit_keyword), \
         limit_around = COALESCE($3, limit_around), \
         limit_polygon = COALESCE($4, limit_polygon), \
         qps_keyword = COALESCE($5, qps_keyword), \
         qps_around = COALESCE($6, qps_around), \
         qps_polygon = COALESCE($7, qps_polygon) \
         WHERE id = $1",
    )
    .bind(credential_id)
    .bind(limits.limit_keyword)
    .bind(limits.limit_around)
    .bind(limits.limit_polygon)
    .bind(limits.qps_keyword)
    .bind(limits.qps_around)
    .bind(limits.qps_polygon)
    .execute(pool)
    .await?;
    Ok(())
}
