//! Control-API endpoints. Handlers parse parameters and delegate directly to the
//! persistence adapter, credential pool, and proxy forwarder — no business logic
//! lives here beyond request validation.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::db;
use crate::models::{CredentialLimits, Job};
use crate::proxy::Proxy;
use crate::state::AppState;
use crate::status::ServiceStatus;
use crate::web::error::{ApiError, db_error, pool_error};

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/catalog", get(list_catalog))
        .route("/amap/{*endpoint}", get(amap_proxy))
        .route("/api/polygon/tasks", get(list_jobs).post(submit_job))
        .route("/api/polygon/tasks/resume-batch", post(resume_batch))
        .route("/api/polygon/tasks/start", post(start_tasks))
        .route("/api/polygon/tasks/stop-all", post(stop_all))
        .route("/api/polygon/tasks/completed-by-date", get(completed_by_date))
        .route("/api/polygon/tasks/{task_id}", get(get_job).delete(cancel_job))
        .route("/api/polygon/tasks/{task_id}/result", get(download_result))
        .route("/api/polygon/tasks/{task_id}/resume", post(resume_job))
        .route("/api/polygon/tasks/{task_id}/priority", put(update_priority))
        .route("/credentials", get(list_credentials).post(add_credential))
        .route("/credentials/{id}/limits", put(update_credential_limits))
        .route("/credentials/{id}/usage", get(get_credential_usage))
        .with_state(app_state)
        .layer((
            CompressionLayer::new().gzip(true),
            TraceLayer::new_for_http(),
            TimeoutLayer::new(Duration::from_secs(10)),
        ))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Serialize)]
struct ServiceInfo {
    status: ServiceStatus,
}

#[derive(Serialize)]
struct StatusResponse {
    overall: &'static str,
    services: BTreeMap<String, ServiceInfo>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();
    for (name, svc_status) in state.service_statuses.all() {
        services.insert(name, ServiceInfo { status: svc_status });
    }
    let overall = if services.values().any(|s| s.status == ServiceStatus::Error) {
        "degraded"
    } else {
        "ok"
    };
    Json(StatusResponse { overall, services })
}

async fn list_catalog(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.labels().map(String::from).collect())
}

/// Passes a request straight through to the upstream vendor API, stripping any
/// caller-supplied `key` so the forwarder's own credential pool is always used.
async fn amap_proxy(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    params.remove("key");

    let search_type = Proxy::search_type_for_endpoint(&endpoint)
        .ok_or_else(|| ApiError::not_found(format!("unknown amap endpoint {endpoint:?}")))?;

    let owned: Vec<(String, String)> = params.into_iter().collect();
    let query: Vec<(&str, String)> = owned.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

    match state
        .proxy
        .forward(search_type, &query)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
    {
        crate::proxy::ForwardOutcome::Success(page) => {
            Ok(Json(serde_json::to_value(page).unwrap_or(Value::Null)))
        }
        crate::proxy::ForwardOutcome::PassThrough { body, .. } => {
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::String(body));
            Ok(Json(parsed))
        }
    }
}

#[derive(Serialize)]
struct JobView {
    task_id: String,
    name: String,
    priority: i32,
    status: String,
    current_type: Option<String>,
    progress_percent: f64,
    result_file: Option<String>,
}

impl JobView {
    fn from_job(job: Job, stall_timeout_secs: i64) -> Self {
        let stalled = job.is_stalled(chrono::Utc::now(), chrono::Duration::seconds(stall_timeout_secs));
        let status = if stalled { "stalled".to_string() } else { job.status.to_string() };
        JobView {
            task_id: job.task_id.clone(),
            name: job.name.clone(),
            priority: job.priority,
            status,
            current_type: job.current_type.clone(),
            progress_percent: job.total_progress(),
            result_file: job.result_file.clone(),
        }
    }
}

#[derive(Serialize)]
struct Pagination {
    page: i64,
    per_page: i64,
    total: i64,
    total_pages: i64,
}

#[derive(Serialize)]
struct JobListResponse {
    tasks: Vec<JobView>,
    pagination: Pagination,
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let status = query.status.as_deref().unwrap_or("incomplete");
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 200);

    let result = db::jobs::list_by_status(&state.db_pool, status, page, per_page)
        .await
        .map_err(|e| db_error("list jobs", e))?;

    let total_pages = ((result.total + per_page - 1) / per_page).max(1);

    Ok(Json(JobListResponse {
        tasks: result
            .jobs
            .into_iter()
            .map(|job| JobView::from_job(job, state.stall_timeout_secs))
            .collect(),
        pagination: Pagination {
            page,
            per_page,
            total: result.total,
            total_pages,
        },
    }))
}

#[derive(Deserialize)]
struct SubmitJobRequest {
    task_id: String,
    name: String,
    polygon: String,
    #[serde(default = "default_priority")]
    priority: i32,
}

fn default_priority() -> i32 {
    999
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<JobView>, ApiError> {
    if req.polygon.trim().is_empty() {
        return Err(ApiError::bad_request("polygon must not be empty"));
    }
    if db::jobs::find_by_task_id(&state.db_pool, &req.task_id)
        .await
        .map_err(|e| db_error("check existing job", e))?
        .is_some()
    {
        return Err(ApiError::conflict(format!(
            "job {} already exists",
            req.task_id
        )));
    }

    let job = db::jobs::insert(&state.db_pool, &req.task_id, &req.name, &req.polygon, req.priority)
        .await
        .map_err(|e| db_error("insert job", e))?;

    Ok(Json(JobView::from_job(job, state.stall_timeout_secs)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = find_job_or_404(&state, &task_id).await?;
    Ok(Json(JobView::from_job(job, state.stall_timeout_secs)))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = find_job_or_404(&state, &task_id).await?;

    if state.executor.is_running(job.id) {
        return Err(ApiError::conflict(
            "job is currently executing; wait for the in-flight page to finish",
        ));
    }

    db::jobs::delete(&state.db_pool, job.id)
        .await
        .map_err(|e| db_error("delete job", e))?;

    Ok(Json(json!({ "cancelled": task_id })))
}

async fn download_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = find_job_or_404(&state, &task_id).await?;
    let result_file = job
        .result_file
        .ok_or_else(|| ApiError::not_found(format!("job {task_id} has no result file yet")))?;

    let bytes = tokio::fs::read(&result_file)
        .await
        .map_err(|e| ApiError::internal_error(format!("failed to read result file: {e}")))?;

    let filename = state.sink.path_for(&task_id);
    let filename = filename
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("result.csv")
        .to_string();

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    Ok((headers, Body::from(bytes)).into_response())
}

async fn resume_job(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = find_job_or_404(&state, &task_id).await?;
    let resumed = db::jobs::resume_task(&state.db_pool, job.id)
        .await
        .map_err(|e| db_error("resume job", e))?
        .ok_or_else(|| ApiError::conflict(format!("job {task_id} is not in a resumable state")))?;

    Ok(Json(JobView::from_job(resumed, state.stall_timeout_secs)))
}

#[derive(Deserialize)]
struct UpdatePriorityRequest {
    priority: i32,
}

async fn update_priority(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(req): Json<UpdatePriorityRequest>,
) -> Result<Json<JobView>, ApiError> {
    let job = find_job_or_404(&state, &task_id).await?;

    let stalled = job.is_stalled(chrono::Utc::now(), chrono::Duration::seconds(state.stall_timeout_secs));
    if job.status == crate::models::JobStatus::Running && !stalled {
        return Err(ApiError::bad_request(
            "cannot change priority of a job that is currently running",
        ));
    }

    let updated = db::jobs::update_priority(&state.db_pool, job.id, req.priority)
        .await
        .map_err(|e| db_error("update priority", e))?
        .ok_or_else(|| ApiError::not_found(format!("job {task_id} not found")))?;

    Ok(Json(JobView::from_job(updated, state.stall_timeout_secs)))
}

#[derive(Deserialize)]
struct ResumeBatchRequest {
    #[serde(default = "default_resume_batch_limit")]
    limit: i64,
}

fn default_resume_batch_limit() -> i64 {
    5
}

async fn resume_batch(
    State(state): State<AppState>,
    Json(req): Json<ResumeBatchRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.limit <= 0 {
        return Err(ApiError::bad_request("limit must be a positive integer"));
    }

    let ids = db::jobs::resume_batch(&state.db_pool, req.limit, state.stall_timeout_secs)
        .await
        .map_err(|e| db_error("resume batch", e))?;

    Ok(Json(json!({ "resumed": ids.len(), "task_ids": ids })))
}

/// The Rust scheduler runs as an always-on background loop from process start, not
/// a lazily-started background thread — this is an acknowledgment-only endpoint so
/// existing operator tooling that calls it doesn't break.
async fn start_tasks() -> Json<Value> {
    Json(json!({ "started": true }))
}

async fn stop_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    db::jobs::cancel_waiting(&state.db_pool)
        .await
        .map_err(|e| db_error("cancel waiting jobs", e))?;

    let stopped = state.executor.stop_all().await;
    for job_id in &stopped {
        let _ = db::jobs::requeue(&state.db_pool, *job_id).await;
    }

    Ok(Json(json!({ "stopped": stopped.len() })))
}

#[derive(Deserialize)]
struct CompletedByDateQuery {
    date: Option<String>,
}

#[derive(Serialize)]
struct CompletedByDateStatistics {
    total_completed: usize,
    date_range: (String, String),
}

#[derive(Serialize)]
struct CompletedByDateResponse {
    date: String,
    tasks: Vec<JobView>,
    statistics: CompletedByDateStatistics,
}

async fn completed_by_date(
    State(state): State<AppState>,
    Query(query): Query<CompletedByDateQuery>,
) -> Result<Json<CompletedByDateResponse>, ApiError> {
    let tz = state.credential_pool.timezone();
    let today = chrono::Utc::now().with_timezone(&tz).date_naive();

    let date = match query.date {
        Some(ref s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request("date must be formatted as YYYY-MM-DD"))?,
        None => today,
    };

    let start_local = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is a valid time"))
        .single()
        .ok_or_else(|| ApiError::bad_request("date falls in a local time gap"))?;
    let end_local = start_local + chrono::Duration::days(1);

    let jobs = db::jobs::completed_by_date(
        &state.db_pool,
        start_local.with_timezone(&chrono::Utc),
        end_local.with_timezone(&chrono::Utc),
    )
    .await
    .map_err(|e| db_error("list completed jobs by date", e))?;

    Ok(Json(CompletedByDateResponse {
        date: date.format("%Y-%m-%d").to_string(),
        statistics: CompletedByDateStatistics {
            total_completed: jobs.len(),
            date_range: (
                start_local.format("%Y-%m-%d").to_string(),
                end_local.format("%Y-%m-%d").to_string(),
            ),
        },
        tasks: jobs
            .into_iter()
            .map(|job| JobView::from_job(job, state.stall_timeout_secs))
            .collect(),
    }))
}

async fn find_job_or_404(state: &AppState, task_id: &str) -> Result<Job, ApiError> {
    db::jobs::find_by_task_id(&state.db_pool, task_id)
        .await
        .map_err(|e| db_error("fetch job", e))?
        .ok_or_else(|| ApiError::not_found(format!("job {task_id} not found")))
}

#[derive(Serialize)]
struct CredentialView {
    id: i32,
    masked_key: String,
    active: bool,
    used_keyword: i32,
    used_around: i32,
    used_polygon: i32,
}

async fn list_credentials(State(state): State<AppState>) -> Result<Json<Vec<CredentialView>>, ApiError> {
    let credentials = db::credentials::all(&state.db_pool)
        .await
        .map_err(|e| db_error("list credentials", e))?;

    Ok(Json(
        credentials
            .into_iter()
            .map(|c| CredentialView {
                id: c.id,
                masked_key: c.masked_key(),
                active: c.active,
                used_keyword: c.used_keyword,
                used_around: c.used_around,
                used_polygon: c.used_polygon,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct AddCredentialRequest {
    key: String,
    description: Option<String>,
}

async fn add_credential(
    State(state): State<AppState>,
    Json(req): Json<AddCredentialRequest>,
) -> Result<Json<CredentialView>, ApiError> {
    if req.key.trim().is_empty() {
        return Err(ApiError::bad_request("key must not be empty"));
    }
    let credential = db::credentials::insert(&state.db_pool, &req.key, req.description.as_deref())
        .await
        .map_err(|e| db_error("insert credential", e))?;

    Ok(Json(CredentialView {
        id: credential.id,
        masked_key: credential.masked_key(),
        active: credential.active,
        used_keyword: credential.used_keyword,
        used_around: credential.used_around,
        used_polygon: credential.used_polygon,
    }))
}

async fn update_credential_limits(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<CredentialLimits>,
) -> Result<StatusCode, ApiError> {
    state
        .credential_pool
        .update_limits(id, &req)
        .await
        .map_err(pool_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_credential_usage(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<crate::models::CredentialUsage>, ApiError> {
    let usage = state.credential_pool.get_usage(id).await.map_err(pool_error)?;
    Ok(Json(usage))
}
