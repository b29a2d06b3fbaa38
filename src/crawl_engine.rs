//! Crawl engine (C6): resumable per-job state machine. Walks the category catalog,
//! paginating each category against the upstream search endpoint, persisting
//! progress after every page so a restart resumes exactly where it left off.

use crate::catalog::Catalog;
use crate::credential_pool::CredentialPool;
use crate::db;
use crate::error::ProxyError;
use crate::models::{Job, JobStatus, Poi, SearchType, TypeProgress};
use crate::proxy::{ForwardOutcome, Proxy, UpstreamPage};
use crate::sink::Sink;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PAGE_SIZE: u32 = 25;
const PAGE_INTERVAL: Duration = Duration::from_millis(200);
const CATEGORY_INTERVAL: Duration = Duration::from_secs(1);

/// Shared, reusable handles the crawl engine needs for every job it runs.
pub struct EngineContext {
    pub catalog: Catalog,
    pub credential_pool: Arc<CredentialPool>,
    pub proxy: Arc<Proxy>,
    pub sink: Arc<Sink>,
}

/// What happened while paginating through one category.
enum CategoryOutcome {
    /// The job was cancelled mid-category; the category itself made no net progress.
    Cancelled,
    /// Upstream is rate-limiting this credential (503 + infocode 1008611); retry later.
    Waiting,
    /// The category finished — either its last page was reached, or it had no results.
    Done,
}

enum PageOutcome {
    Success(UpstreamPage),
    RateLimited,
}

pub async fn run_job(
    db_pool: &PgPool,
    ctx: &EngineContext,
    job_id: i64,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let labels: Vec<String> = ctx.catalog.labels().map(String::from).collect();

    loop {
        let job = match db::jobs::find_by_id(db_pool, job_id).await? {
            Some(job) => job,
            None => {
                warn!(job_id, "job disappeared mid-run");
                return Ok(());
            }
        };

        if job.status != JobStatus::Running {
            return Ok(());
        }

        let mut progress = job.progress_map();

        let current_label = match job
            .current_type
            .clone()
            .filter(|label| labels.contains(label))
            .or_else(|| labels.first().cloned())
        {
            Some(label) => label,
            None => {
                warn!(job_id, "catalog is empty, nothing to crawl");
                db::jobs::mark_failed(db_pool, job_id).await?;
                return Ok(());
            }
        };

        let start_page = if job.current_type.as_deref() == Some(current_label.as_str()) {
            job.current_page.max(1) as u32
        } else {
            1
        };

        let outcome = run_category(db_pool, ctx, &job, &current_label, start_page, &mut progress, &cancel).await;

        match outcome {
            Ok(CategoryOutcome::Cancelled) => {
                info!(job_id, "job cancelled, returning to pending for an operator to resume");
                db::jobs::set_status(db_pool, job_id, JobStatus::Pending).await?;
                return Ok(());
            }
            Ok(CategoryOutcome::Waiting) => {
                warn!(job_id, label = %current_label, "rate limited by upstream, waiting for next tick");
                db::jobs::set_status(db_pool, job_id, JobStatus::Waiting).await?;
                return Ok(());
            }
            Ok(CategoryOutcome::Done) => {
                let is_last_category = labels.last() == Some(&current_label);
                advance_to_next_category(db_pool, job_id, &labels, &current_label, &mut progress).await?;

                if is_last_category {
                    let path = ctx.sink.path_for(&job.task_id);
                    db::jobs::mark_completed(db_pool, job_id, &path.to_string_lossy()).await?;
                    info!(job_id, "job completed");
                    return Ok(());
                }

                tokio::time::sleep(CATEGORY_INTERVAL).await;
            }
            Err(e) => {
                let proxy_err = e.downcast_ref::<ProxyError>();
                if matches!(proxy_err, Some(ProxyError::UpstreamStatus(503))) {
                    warn!(job_id, error = %e, "upstream unavailable, deferring to operator");
                    db::jobs::set_status(db_pool, job_id, JobStatus::Pending).await?;
                    return Ok(());
                }
                if proxy_err.map(ProxyError::is_no_credential).unwrap_or(false) {
                    warn!(job_id, "no credential available, waiting for next tick");
                    db::jobs::set_status(db_pool, job_id, JobStatus::Waiting).await?;
                    return Ok(());
                }
                warn!(job_id, error = %e, "job failed unexpectedly, waiting for next tick");
                db::jobs::set_status(db_pool, job_id, JobStatus::Waiting).await?;
                return Err(e);
            }
        }
    }
}

/// Paginates one category starting at `start_page`, appending rows to the sink and
/// persisting progress after every page.
async fn run_category(
    db_pool: &PgPool,
    ctx: &EngineContext,
    job: &Job,
    label: &str,
    start_page: u32,
    progress: &mut HashMap<String, TypeProgress>,
    cancel: &CancellationToken,
) -> anyhow::Result<CategoryOutcome> {
    let codes = ctx
        .catalog
        .upstream_param(label)
        .expect("label was drawn from the catalog itself");
    let polygon = normalize_polygon(&job.polygon);
    let mut page = start_page.max(1);

    loop {
        if cancel.is_cancelled() {
            return Ok(CategoryOutcome::Cancelled);
        }

        let params = [
            ("polygon", polygon.clone()),
            ("types", codes.clone()),
            ("offset", PAGE_SIZE.to_string()),
            ("page", page.to_string()),
            ("extensions", "all".to_string()),
        ];

        let result = match fetch_page(ctx, &params).await {
            Ok(PageOutcome::Success(page_result)) => page_result,
            Ok(PageOutcome::RateLimited) => return Ok(CategoryOutcome::Waiting),
            Err(e) => return Err(e.into()),
        };

        if result.pois.is_empty() {
            let entry = progress.entry(label.to_string()).or_default();
            entry.completed = true;
            return Ok(CategoryOutcome::Done);
        }

        let rows: Vec<Poi> = result.pois.iter().filter_map(|raw| parse_poi(raw, label)).collect();
        if !rows.is_empty() {
            ctx.sink.append(&job.task_id, &rows)?;
        }

        let entry = progress.entry(label.to_string()).or_default();
        entry.processed_pages = page;
        entry.processed_count += rows.len() as u32;

        if page == 1 {
            let total_count: u32 = result
                .count
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            entry.total_count = total_count;
            entry.total_pages = Some(total_count.div_ceil(PAGE_SIZE).max(1));
        }
        let total_pages = entry.total_pages.unwrap_or(1);

        let progress_value = serde_json::to_value(&*progress)?;
        db::jobs::save_progress(db_pool, job.id, Some(label), (page + 1) as i32, &progress_value).await?;

        if page >= total_pages {
            let entry = progress.entry(label.to_string()).or_default();
            entry.completed = true;
            return Ok(CategoryOutcome::Done);
        }

        page += 1;
        tokio::time::sleep(PAGE_INTERVAL).await;
    }
}

/// Trims incidental whitespace from an operator-supplied polygon string before it
/// goes out on the wire.
fn normalize_polygon(raw: &str) -> String {
    raw.trim().to_string()
}

async fn fetch_page(ctx: &EngineContext, params: &[(&str, String)]) -> Result<PageOutcome, ProxyError> {
    match ctx.proxy.forward(SearchType::Polygon, params).await? {
        ForwardOutcome::Success(page) => Ok(PageOutcome::Success(page)),
        ForwardOutcome::PassThrough { status, body } => {
            if status == 503 {
                if let Ok(parsed) = serde_json::from_str::<UpstreamPage>(&body) {
                    if parsed.infocode.as_deref() == Some("1008611") {
                        return Ok(PageOutcome::RateLimited);
                    }
                }
            }
            Err(ProxyError::UpstreamStatus(status))
        }
    }
}

async fn advance_to_next_category(
    db_pool: &PgPool,
    job_id: i64,
    labels: &[String],
    current_label: &str,
    progress: &mut HashMap<String, TypeProgress>,
) -> anyhow::Result<()> {
    let idx = labels.iter().position(|l| l == current_label);
    let next_label = idx.and_then(|i| labels.get(i + 1));

    let progress_value = serde_json::to_value(&*progress)?;

    match next_label {
        Some(next) => {
            db::jobs::save_progress(db_pool, job_id, Some(next), 1, &progress_value).await?;
        }
        None => {
            db::jobs::save_progress(db_pool, job_id, None, 1, &progress_value).await?;
        }
    }
    Ok(())
}

fn parse_poi(raw: &Value, poi_type: &str) -> Option<Poi> {
    let id = raw.get("id")?.as_str()?.to_string();
    let field = |key: &str| raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

    Some(Poi {
        id,
        name: field("name"),
        type_: field("type"),
        type_code: field("typecode"),
        address: field("address"),
        location: field("location"),
        tel: field("tel"),
        business_area: field("business_area"),
        poi_type: poi_type.to_string(),
        province: field("pname"),
        city: field("cityname"),
        district: field("adname"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_poi_row() {
        let raw = serde_json::json!({
            "id": "B0001",
            "name": "Test Cafe",
            "type": "餐饮服务;快餐厅;快餐厅",
            "typecode": "050300",
            "address": "1 Main St",
            "location": "121.47,31.23",
            "tel": "021-12345678",
            "business_area": "人民广场",
            "pname": "上海市",
            "cityname": "上海市",
            "adname": "黄浦区",
        });
        let poi = parse_poi(&raw, "餐饮服务").unwrap();
        assert_eq!(poi.location, "121.47,31.23");
        assert_eq!(poi.type_code, "050300");
        assert_eq!(poi.province, "上海市");
        assert_eq!(poi.district, "黄浦区");
        assert_eq!(poi.poi_type, "餐饮服务");
    }

    #[test]
    fn rejects_poi_missing_id() {
        let raw = serde_json::json!({"name": "y", "address": "z"});
        assert!(parse_poi(&raw, "label").is_none());
    }

    #[test]
    fn defaults_missing_optional_fields_to_empty_string() {
        let raw = serde_json::json!({"id": "x"});
        let poi = parse_poi(&raw, "label").unwrap();
        assert_eq!(poi.name, "");
        assert_eq!(poi.location, "");
    }

    #[test]
    fn normalize_polygon_trims_whitespace() {
        assert_eq!(normalize_polygon("  1,2;3,4  \n"), "1,2;3,4");
    }
}
