//! Row types shared between the persistence adapter and the rest of the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three upstream call shapes a credential's quota is tracked per.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Keyword,
    Around,
    Polygon,
}

impl SearchType {
    pub const ALL: [SearchType; 3] = [SearchType::Keyword, SearchType::Around, SearchType::Polygon];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Keyword => "keyword",
            SearchType::Around => "around",
            SearchType::Polygon => "polygon",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upstream API credential and its per-search-type daily usage counters.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Credential {
    pub id: i32,
    pub key: String,
    pub active: bool,
    pub description: Option<String>,
    pub last_reset: Option<DateTime<Utc>>,
    pub used_keyword: i32,
    pub used_around: i32,
    pub used_polygon: i32,
    pub limit_keyword: Option<i32>,
    pub limit_around: Option<i32>,
    pub limit_polygon: Option<i32>,
    pub qps_keyword: Option<i32>,
    pub qps_around: Option<i32>,
    pub qps_polygon: Option<i32>,
}

/// Default daily call quota applied to a credential with no explicit override.
pub const DEFAULT_SEARCH_LIMIT: i32 = 100;
/// Default queries-per-second ceiling applied to a credential with no explicit override.
pub const DEFAULT_QPS_LIMIT: i32 = 3;

impl Credential {
    pub fn used(&self, search_type: SearchType) -> i32 {
        match search_type {
            SearchType::Keyword => self.used_keyword,
            SearchType::Around => self.used_around,
            SearchType::Polygon => self.used_polygon,
        }
    }

    pub fn limit(&self, search_type: SearchType) -> i32 {
        match search_type {
            SearchType::Keyword => self.limit_keyword,
            SearchType::Around => self.limit_around,
            SearchType::Polygon => self.limit_polygon,
        }
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
    }

    pub fn qps_limit(&self, search_type: SearchType) -> i32 {
        match search_type {
            SearchType::Keyword => self.qps_keyword,
            SearchType::Around => self.qps_around,
            SearchType::Polygon => self.qps_polygon,
        }
        .unwrap_or(DEFAULT_QPS_LIMIT)
    }

    pub fn remaining(&self, search_type: SearchType) -> i32 {
        (self.limit(search_type) - self.used(search_type)).max(0)
    }

    pub fn has_quota(&self, search_type: SearchType) -> bool {
        self.used(search_type) < self.limit(search_type)
    }

    /// A display-safe rendering of the key: first 6 and last 4 characters, rest masked.
    pub fn masked_key(&self) -> String {
        mask_key(&self.key)
    }
}

pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(8))
}

/// The lifecycle state of a crawl job.
///
/// `Waiting` and `Pending` are deliberately distinct: the scheduler may admit a
/// `waiting` job on its own; a `pending` job needs an operator to call resume or
/// resume-batch first. `Stash` is never written by this crate — it is kept in the
/// enum only because it appears in the resume predicates a batch resume matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Pending,
    Running,
    Stash,
    Failed,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Stash => "stash",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category-type progress recorded as the crawl engine advances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeProgress {
    pub total_pages: Option<u32>,
    pub processed_pages: u32,
    pub total_count: u32,
    pub processed_count: u32,
    pub completed: bool,
}

/// A polygon crawl job: enumerate every POI category against a region, paginated.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub task_id: String,
    pub name: String,
    pub polygon: String,
    pub priority: i32,
    pub status: JobStatus,
    pub current_type: Option<String>,
    pub current_page: i32,
    pub progress: serde_json::Value,
    pub result_file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Parses the jsonb `progress` column into a typed map of category label to progress.
    pub fn progress_map(&self) -> std::collections::HashMap<String, TypeProgress> {
        serde_json::from_value(self.progress.clone()).unwrap_or_default()
    }

    /// Overall completion percentage across all categories that have been touched so far.
    pub fn total_progress(&self) -> f64 {
        let map = self.progress_map();
        let (processed, total): (u64, u64) = map.values().fold((0, 0), |(p, t), entry| {
            (
                p + entry.processed_pages as u64,
                t + entry.total_pages.unwrap_or(entry.processed_pages) as u64,
            )
        });
        if total == 0 {
            return 0.0;
        }
        (processed as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
    }

    /// A job is stalled if it is `running` but hasn't been touched within `timeout`.
    pub fn is_stalled(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status == JobStatus::Running && now - self.updated_at > timeout
    }
}

/// A single point-of-interest row, as written to the result sink.
///
/// Field order matches the result CSV's column order. `location` is kept as the
/// raw `"lon,lat"` string the upstream API returns, not split into two columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poi {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub type_code: String,
    pub address: String,
    pub location: String,
    pub tel: String,
    pub business_area: String,
    pub poi_type: String,
    pub province: String,
    pub city: String,
    pub district: String,
}

/// Operator-supplied overrides for a credential's per-search-type daily quota
/// and QPS ceiling. `None` fields are left unchanged by `UpdateLimits`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialLimits {
    pub limit_keyword: Option<i32>,
    pub limit_around: Option<i32>,
    pub limit_polygon: Option<i32>,
    pub qps_keyword: Option<i32>,
    pub qps_around: Option<i32>,
    pub qps_polygon: Option<i32>,
}

/// A credential's usage/limit/remaining snapshot for one search type.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KindUsage {
    pub used: i32,
    pub limit: i32,
    pub remaining: i32,
}

/// A credential's usage snapshot across all three search types.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CredentialUsage {
    pub keyword: KindUsage,
    pub around: KindUsage,
    pub polygon: KindUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_long_keys() {
        assert_eq!(mask_key("abcdef1234567890wxyz"), "abcdef********wxyz");
    }

    #[test]
    fn masks_short_keys_fully() {
        assert_eq!(mask_key("short"), "*****");
    }

    #[test]
    fn credential_quota_falls_back_to_default() {
        let cred = Credential {
            id: 1,
            key: "k".into(),
            active: true,
            description: None,
            last_reset: None,
            used_keyword: 5,
            used_around: 0,
            used_polygon: 0,
            limit_keyword: None,
            limit_around: None,
            limit_polygon: None,
            qps_keyword: None,
            qps_around: None,
            qps_polygon: None,
        };
        assert_eq!(cred.limit(SearchType::Keyword), DEFAULT_SEARCH_LIMIT);
        assert!(cred.has_quota(SearchType::Keyword));
        assert_eq!(cred.remaining(SearchType::Keyword), 95);
    }
}
