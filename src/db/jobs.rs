//! Job row persistence: admission, progress updates, resume/priority control, and
//! stall recovery.

use crate::models::{Job, JobStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Atomically fetches and claims the highest-priority admissible job: one that is
/// `waiting`, or `running` but stalled past `stall_timeout`. A `pending` job is
/// deliberately excluded — it needs an operator to resume it first.
///
/// Uses `FOR UPDATE SKIP LOCKED` so multiple schedulers polling concurrently (within
/// a single control-plane instance, across its own worker tasks) never double-claim.
pub async fn claim_next(pool: &PgPool, stall_timeout_secs: i64) -> sqlx::Result<Option<Job>> {
    let mut tx = pool.begin().await?;

    let job = sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs \
         WHERE status = 'waiting' \
            OR (status = 'running' AND updated_at < NOW() - make_interval(secs => $1::double precision)) \
         ORDER BY priority ASC, id ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(stall_timeout_secs as f64)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(ref job) = job {
        sqlx::query("UPDATE jobs SET status = 'running', updated_at = NOW() WHERE id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(job)
}

/// Jobs currently `running` and not stalled — the scheduler's active-worker count
/// for the hour-of-day concurrency cap.
pub async fn count_active(pool: &PgPool, stall_timeout_secs: i64) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM jobs \
         WHERE status = 'running' AND updated_at >= NOW() - make_interval(secs => $1::double precision)",
    )
    .bind(stall_timeout_secs as f64)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn save_progress(
    pool: &PgPool,
    job_id: i64,
    current_type: Option<&str>,
    current_page: i32,
    progress: &serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE jobs SET current_type = $2, current_page = $3, progress = $4, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(current_type)
    .bind(current_page)
    .bind(progress)
    .execute(pool)
    .await?;
    Ok(())
}

/// Sets `status` on a job by id, touching `updated_at`. The status is bound as a
/// plain string rather than via `JobStatus`'s `sqlx::Type` derive, matching how the
/// admission queries above already address the column.
pub async fn set_status(pool: &PgPool, job_id: i64, status: JobStatus) -> sqlx::Result<()> {
    sqlx::query("UPDATE jobs SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(job_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_completed(pool: &PgPool, job_id: i64, result_file: &str) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'completed', result_file = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(job_id)
    .bind(result_file)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, job_id: i64) -> sqlx::Result<()> {
    set_status(pool, job_id, JobStatus::Failed).await
}

/// Returns a job to `pending` so an operator has to resume it explicitly.
pub async fn requeue(pool: &PgPool, job_id: i64) -> sqlx::Result<()> {
    set_status(pool, job_id, JobStatus::Pending).await
}

pub async fn insert(
    pool: &PgPool,
    task_id: &str,
    name: &str,
    polygon: &str,
    priority: i32,
) -> sqlx::Result<Job> {
    sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (task_id, name, polygon, priority, status, current_page, progress, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, 'waiting', 1, '{}'::jsonb, NOW(), NOW()) RETURNING *",
    )
    .bind(task_id)
    .bind(name)
    .bind(polygon)
    .bind(priority)
    .fetch_one(pool)
    .await
}

pub async fn find_by_task_id(pool: &PgPool, task_id: &str) -> sqlx::Result<Option<Job>> {
    sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE task_id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &PgPool, job_id: i64) -> sqlx::Result<Option<Job>> {
    sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await
}

pub async fn delete(pool: &PgPool, job_id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// True when `job` is `running` but has not been updated within `timeout`.
pub fn is_stalled(job: &Job, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    job.status == JobStatus::Running && now - job.updated_at > timeout
}

/// A page of jobs plus the total row count matching the filter, for pagination.
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
}

/// Lists jobs by the control API's three status buckets:
/// - `incomplete`: anything not yet `completed`, ordered `id ASC`.
/// - `completed`: `completed` jobs, ordered `id DESC`.
/// - `all`: the union of both groups, incomplete first, each ordered `id ASC`
///   within its own group (the outer `ORDER BY` is required — Postgres does not
///   guarantee a `UNION ALL` branch's own ordering survives into the final result).
pub async fn list_by_status(pool: &PgPool, status: &str, page: i64, per_page: i64) -> sqlx::Result<JobPage> {
    let offset = (page.max(1) - 1) * per_page.max(1);

    let (jobs, total): (Vec<Job>, i64) = match status {
        "completed" => {
            let jobs = sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs WHERE status = 'completed' ORDER BY id DESC LIMIT $1 OFFSET $2",
            )
            .bind(per_page)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = 'completed'")
                .fetch_one(pool)
                .await?;
            (jobs, total)
        }
        "all" => {
            let jobs = sqlx::query_as::<_, Job>(
                "SELECT * FROM ( \
                    SELECT *, 0 AS grp FROM jobs WHERE status <> 'completed' \
                    UNION ALL \
                    SELECT *, 1 AS grp FROM jobs WHERE status = 'completed' \
                 ) u ORDER BY grp ASC, id ASC LIMIT $1 OFFSET $2",
            )
            .bind(per_page)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs").fetch_one(pool).await?;
            (jobs, total)
        }
        _ => {
            let jobs = sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs WHERE status <> 'completed' ORDER BY id ASC LIMIT $1 OFFSET $2",
            )
            .bind(per_page)
            .bind(offset)
            .fetch_all(pool)
            .await?;
            let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status <> 'completed'")
                .fetch_one(pool)
                .await?;
            (jobs, total)
        }
    };

    Ok(JobPage { jobs, total })
}

/// Single-task resume: moves a job out of `{pending, stash, failed}` into
/// `waiting` so the scheduler can pick it up again. Broader than the batch
/// `resume_batch`, which intentionally leaves `failed` jobs alone.
pub async fn resume_task(pool: &PgPool, job_id: i64) -> sqlx::Result<Option<Job>> {
    sqlx::query_as::<_, Job>(
        "UPDATE jobs SET status = 'waiting', updated_at = NOW() \
         WHERE id = $1 AND status IN ('pending', 'stash', 'failed') \
         RETURNING *",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
}

/// Moves up to `limit` jobs in `{pending, stash}` or stalled `running` into
/// `waiting`, ordered by priority, and returns the ids touched.
pub async fn resume_batch(pool: &PgPool, limit: i64, stall_timeout_secs: i64) -> sqlx::Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "UPDATE jobs SET status = 'waiting', updated_at = NOW() \
         WHERE id IN ( \
            SELECT id FROM jobs \
            WHERE status IN ('pending', 'stash') \
               OR (status = 'running' AND updated_at < NOW() - make_interval(secs => $2::double precision)) \
            ORDER BY priority ASC, id ASC \
            LIMIT $1 \
            FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING id",
    )
    .bind(limit)
    .bind(stall_timeout_secs as f64)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn update_priority(pool: &PgPool, job_id: i64, priority: i32) -> sqlx::Result<Option<Job>> {
    sqlx::query_as::<_, Job>(
        "UPDATE jobs SET priority = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(job_id)
    .bind(priority)
    .fetch_optional(pool)
    .await
}

/// Reverts every `waiting` job to `pending`, so an operator-initiated stop-all
/// doesn't leave jobs the scheduler would immediately re-admit.
pub async fn cancel_waiting(pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE jobs SET status = 'pending', updated_at = NOW() WHERE status = 'waiting'")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Jobs completed within `[start, end)`, ordered newest-first.
pub async fn completed_by_date(pool: &PgPool, start: DateTime<Utc>, end: DateTime<Utc>) -> sqlx::Result<Vec<Job>> {
    sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs WHERE status = 'completed' AND updated_at >= $1 AND updated_at < $2 \
         ORDER BY id DESC",
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}
