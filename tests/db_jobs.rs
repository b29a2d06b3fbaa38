#[allow(dead_code)]
mod helpers;

use chrono::Utc;
use poicrawl::db::jobs;
use sqlx::PgPool;

#[sqlx::test]
async fn claim_next_admits_waiting_job_and_marks_it_running(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "waiting", 999).await;

    let claimed = jobs::claim_next(&pool, 300).await.unwrap().expect("should claim a job");

    assert_eq!(claimed.id, id);
    let refetched = jobs::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(refetched.status.to_string(), "running");
}

#[sqlx::test]
async fn claim_next_does_not_admit_pending_jobs(pool: PgPool) {
    helpers::insert_job(&pool, "task-1", "pending", 999).await;

    let claimed = jobs::claim_next(&pool, 300).await.unwrap();
    assert!(claimed.is_none(), "pending jobs need an explicit resume, not auto-admission");
}

#[sqlx::test]
async fn claim_next_prefers_lower_priority_value(pool: PgPool) {
    helpers::insert_job(&pool, "low-priority", "waiting", 999).await;
    let urgent_id = helpers::insert_job(&pool, "high-priority", "waiting", 1).await;

    let claimed = jobs::claim_next(&pool, 300).await.unwrap().unwrap();
    assert_eq!(claimed.id, urgent_id);
}

#[sqlx::test]
async fn claim_next_skips_fresh_running_jobs(pool: PgPool) {
    helpers::insert_job(&pool, "task-1", "running", 999).await;

    let claimed = jobs::claim_next(&pool, 300).await.unwrap();
    assert!(claimed.is_none(), "a running job within its stall window should not be reclaimed");
}

#[sqlx::test]
async fn claim_next_reclaims_stalled_running_jobs(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "running", 999).await;
    helpers::backdate_job(&pool, id, 600).await;

    let claimed = jobs::claim_next(&pool, 300).await.unwrap().expect("stalled job should be reclaimed");
    assert_eq!(claimed.id, id);
}

#[sqlx::test]
async fn claim_next_returns_none_on_empty_queue(pool: PgPool) {
    let claimed = jobs::claim_next(&pool, 300).await.unwrap();
    assert!(claimed.is_none());
}

#[sqlx::test]
async fn count_active_counts_only_unstalled_running_jobs(pool: PgPool) {
    helpers::insert_job(&pool, "fresh", "running", 999).await;
    let stalled_id = helpers::insert_job(&pool, "stalled", "running", 999).await;
    helpers::backdate_job(&pool, stalled_id, 600).await;
    helpers::insert_job(&pool, "waiting", "waiting", 999).await;

    let active = jobs::count_active(&pool, 300).await.unwrap();
    assert_eq!(active, 1);
}

#[sqlx::test]
async fn save_progress_updates_progress_and_bumps_updated_at(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "running", 999).await;
    let before = jobs::find_by_id(&pool, id).await.unwrap().unwrap().updated_at;

    let progress = serde_json::json!({
        "restaurant": {"total_pages": 5, "processed_pages": 2, "total_count": 100, "processed_count": 40, "completed": false}
    });
    jobs::save_progress(&pool, id, Some("restaurant"), 2, &progress).await.unwrap();

    let after = jobs::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(after.current_type.as_deref(), Some("restaurant"));
    assert_eq!(after.current_page, 2);
    assert!(after.updated_at >= before);
    assert_eq!(after.total_progress(), 40.0);
}

#[sqlx::test]
async fn mark_completed_sets_status_and_result_file(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "running", 999).await;

    jobs::mark_completed(&pool, id, "./results/task-1_poi.csv").await.unwrap();

    let job = jobs::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(job.status.to_string(), "completed");
    assert_eq!(job.result_file.as_deref(), Some("./results/task-1_poi.csv"));
}

#[sqlx::test]
async fn requeue_returns_job_to_pending(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "running", 999).await;

    jobs::requeue(&pool, id).await.unwrap();

    let job = jobs::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(job.status.to_string(), "pending");
}

#[sqlx::test]
async fn insert_starts_jobs_in_waiting(pool: PgPool) {
    let job = jobs::insert(&pool, "dup", "Dup", "POLYGON((0 0,1 0,1 1,0 1,0 0))", 999).await.unwrap();
    assert_eq!(job.status.to_string(), "waiting");

    let result = jobs::insert(&pool, "dup", "Dup again", "POLYGON((0 0,1 0,1 1,0 1,0 0))", 999).await;
    assert!(result.is_err());
}

#[sqlx::test]
async fn delete_removes_the_job(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "waiting", 999).await;

    jobs::delete(&pool, id).await.unwrap();

    assert!(jobs::find_by_id(&pool, id).await.unwrap().is_none());
}

#[sqlx::test]
async fn is_stalled_reports_running_jobs_past_the_timeout(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "running", 999).await;
    helpers::backdate_job(&pool, id, 600).await;

    let job = jobs::find_by_id(&pool, id).await.unwrap().unwrap();
    assert!(jobs::is_stalled(&job, Utc::now(), chrono::Duration::seconds(300)));
}

#[sqlx::test]
async fn resume_task_moves_pending_stash_and_failed_to_waiting(pool: PgPool) {
    let pending_id = helpers::insert_job(&pool, "pending", "pending", 999).await;
    let stash_id = helpers::insert_job(&pool, "stash", "stash", 999).await;
    let failed_id = helpers::insert_job(&pool, "failed", "failed", 999).await;

    for id in [pending_id, stash_id, failed_id] {
        let resumed = jobs::resume_task(&pool, id).await.unwrap().expect("should resume");
        assert_eq!(resumed.status.to_string(), "waiting");
    }
}

#[sqlx::test]
async fn resume_task_refuses_running_jobs(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "running", 999).await;

    let resumed = jobs::resume_task(&pool, id).await.unwrap();
    assert!(resumed.is_none());
}

#[sqlx::test]
async fn resume_batch_respects_limit_and_priority_order(pool: PgPool) {
    helpers::insert_job(&pool, "low", "pending", 999).await;
    let urgent_id = helpers::insert_job(&pool, "high", "pending", 1).await;
    helpers::insert_job(&pool, "also-low", "pending", 500).await;

    let resumed = jobs::resume_batch(&pool, 1, 300).await.unwrap();
    assert_eq!(resumed, vec![urgent_id]);

    let job = jobs::find_by_id(&pool, urgent_id).await.unwrap().unwrap();
    assert_eq!(job.status.to_string(), "waiting");
}

#[sqlx::test]
async fn resume_batch_leaves_failed_jobs_alone(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "failed", 999).await;

    let resumed = jobs::resume_batch(&pool, 10, 300).await.unwrap();
    assert!(resumed.is_empty());

    let job = jobs::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(job.status.to_string(), "failed");
}

#[sqlx::test]
async fn update_priority_changes_the_stored_value(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "waiting", 999).await;

    let updated = jobs::update_priority(&pool, id, 5).await.unwrap().unwrap();
    assert_eq!(updated.priority, 5);
}

#[sqlx::test]
async fn list_by_status_incomplete_excludes_completed_jobs(pool: PgPool) {
    helpers::insert_job(&pool, "waiting", "waiting", 999).await;
    helpers::insert_job(&pool, "completed", "completed", 999).await;

    let page = jobs::list_by_status(&pool, "incomplete", 1, 20).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.jobs[0].task_id, "waiting");
}

#[sqlx::test]
async fn list_by_status_completed_orders_newest_id_first(pool: PgPool) {
    helpers::insert_job(&pool, "first", "completed", 999).await;
    let second_id = helpers::insert_job(&pool, "second", "completed", 999).await;

    let page = jobs::list_by_status(&pool, "completed", 1, 20).await.unwrap();
    assert_eq!(page.jobs[0].id, second_id);
}

#[sqlx::test]
async fn list_by_status_all_unions_incomplete_then_completed(pool: PgPool) {
    helpers::insert_job(&pool, "completed", "completed", 999).await;
    helpers::insert_job(&pool, "waiting", "waiting", 999).await;

    let page = jobs::list_by_status(&pool, "all", 1, 20).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.jobs[0].task_id, "waiting");
    assert_eq!(page.jobs[1].task_id, "completed");
}

#[sqlx::test]
async fn cancel_waiting_reverts_waiting_jobs_to_pending(pool: PgPool) {
    let id = helpers::insert_job(&pool, "task-1", "waiting", 999).await;
    helpers::insert_job(&pool, "task-2", "running", 999).await;

    let affected = jobs::cancel_waiting(&pool).await.unwrap();
    assert_eq!(affected, 1);

    let job = jobs::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(job.status.to_string(), "pending");
}

#[sqlx::test]
async fn completed_by_date_filters_to_the_window(pool: PgPool) {
    let id = helpers::insert_job(&pool, "in-window", "completed", 999).await;
    let outside_id = helpers::insert_job(&pool, "outside-window", "completed", 999).await;
    helpers::backdate_job(&pool, outside_id, 10 * 24 * 60 * 60).await;

    let start = Utc::now() - chrono::Duration::hours(1);
    let end = Utc::now() + chrono::Duration::hours(1);

    let jobs = jobs::completed_by_date(&pool, start, end).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);
}
