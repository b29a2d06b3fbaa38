use sqlx::PgPool;

/// Inserts a credential directly via SQL, returning the generated id.
#[allow(clippy::too_many_arguments)]
pub async fn insert_credential(
    pool: &PgPool,
    key: &str,
    active: bool,
    used_keyword: i32,
    used_around: i32,
    used_polygon: i32,
    limit_keyword: Option<i32>,
) -> i32 {
    let (id,): (i32,) = sqlx::query_as(
        "INSERT INTO credentials (key, active, used_keyword, used_around, used_polygon, limit_keyword) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
    )
    .bind(key)
    .bind(active)
    .bind(used_keyword)
    .bind(used_around)
    .bind(used_polygon)
    .bind(limit_keyword)
    .fetch_one(pool)
    .await
    .expect("insert_credential failed");

    id
}

/// Inserts a job directly via SQL, returning the generated id.
pub async fn insert_job(pool: &PgPool, task_id: &str, status: &str, priority: i32) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO jobs (task_id, name, polygon, priority, status, current_page, progress) \
         VALUES ($1, $2, 'POLYGON((0 0,1 0,1 1,0 1,0 0))', $3, $4, 1, '{}'::jsonb) RETURNING id",
    )
    .bind(task_id)
    .bind(task_id)
    .bind(priority)
    .bind(status)
    .fetch_one(pool)
    .await
    .expect("insert_job failed");

    id
}

/// Backdates a job's `updated_at` by `seconds_ago`, for stall-detection tests.
pub async fn backdate_job(pool: &PgPool, job_id: i64, seconds_ago: i64) {
    sqlx::query("UPDATE jobs SET updated_at = NOW() - make_interval(secs => $2::double precision) WHERE id = $1")
        .bind(job_id)
        .bind(seconds_ago as f64)
        .execute(pool)
        .await
        .expect("backdate_job failed");
}
