//! Proxy/forwarder (C4): the single place a credentialed call reaches the upstream
//! POI search API. Owns the acquire/call/classify/retry loop against the upstream's
//! own success envelope, so every caller — the crawl engine and the `/amap` HTTP
//! passthrough alike — gets the same accounting and disable/exhaustion behavior.

use crate::credential_pool::CredentialPool;
use crate::error::ProxyError;
use crate::models::SearchType;
use anyhow::Context;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A single page of results from an upstream search call.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct UpstreamPage {
    pub status: String,
    pub info: String,
    pub infocode: Option<String>,
    pub count: Option<String>,
    #[serde(default)]
    pub pois: Vec<Value>,
}

/// The outcome of forwarding a call: either the upstream accepted it, or it
/// rejected the request itself (not the credential) and the caller should see
/// the upstream's own status/body verbatim.
pub enum ForwardOutcome {
    Success(UpstreamPage),
    PassThrough { status: u16, body: String },
}

/// How a parsed upstream page should be dispatched, independent of any HTTP
/// plumbing — kept pure so it's testable without a server.
#[derive(Debug, PartialEq, Eq)]
enum InfoOutcome {
    Success,
    DailyLimitExceeded,
    InvalidKey,
    Rejected,
}

fn dispatch_info(page: &UpstreamPage) -> InfoOutcome {
    if page.infocode.as_deref() == Some("10000") {
        return InfoOutcome::Success;
    }
    if page.info.contains("DAILY_QUERY_OVER_LIMIT") {
        return InfoOutcome::DailyLimitExceeded;
    }
    if page.info.contains("INVALID_USER_KEY") || page.info.contains("USER_KEY_RECYCLED") {
        return InfoOutcome::InvalidKey;
    }
    InfoOutcome::Rejected
}

/// A runaway-loop guard: retrying once per currently-misbehaving credential
/// should never realistically approach this, so hitting it means something
/// else is wrong upstream.
const MAX_FORWARD_ATTEMPTS: u32 = 20;

pub struct Proxy {
    client: Client,
    base_url: String,
    custom_proxy_url: Option<String>,
    credential_pool: Arc<CredentialPool>,
}

impl Proxy {
    pub fn new(
        base_url: String,
        request_timeout: Duration,
        custom_proxy_url: Option<String>,
        credential_pool: Arc<CredentialPool>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .tcp_keepalive(Some(Duration::from_secs(60 * 5)))
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .context("failed to build upstream HTTP client")?;

        Ok(Self {
            client,
            base_url,
            custom_proxy_url,
            credential_pool,
        })
    }

    fn endpoint(&self) -> &str {
        self.custom_proxy_url.as_deref().unwrap_or(&self.base_url)
    }

    /// Maps an `/amap/<endpoint>` HTTP passthrough path segment to the search
    /// type whose credential quota that endpoint draws from.
    pub fn search_type_for_endpoint(endpoint: &str) -> Option<SearchType> {
        match endpoint {
            "v3/place/text" | "place/text" | "text" => Some(SearchType::Keyword),
            "v3/place/around" | "place/around" | "around" => Some(SearchType::Around),
            "v3/place/polygon" | "place/polygon" | "polygon" => Some(SearchType::Polygon),
            _ => None,
        }
    }

    /// Acquires a credential, issues the call, and dispatches on the upstream's
    /// own success envelope: `infocode == "10000"` is success; a daily-limit or
    /// invalid-key rejection marks the credential accordingly and retries with a
    /// different one; anything else is passed through to the caller verbatim.
    pub async fn forward(
        &self,
        search_type: SearchType,
        params: &[(&str, String)],
    ) -> Result<ForwardOutcome, ProxyError> {
        for _ in 0..MAX_FORWARD_ATTEMPTS {
            let credential = self.credential_pool.acquire(search_type).await?;

            let endpoint = format!("{}/v3/place/{}", self.endpoint(), upstream_path(search_type));
            let mut query: Vec<(&str, String)> = vec![("key", credential.key.clone())];
            query.extend(params.iter().cloned());

            let response = self
                .client
                .get(&endpoint)
                .query(&query)
                .send()
                .await
                .map_err(|e| ProxyError::Transient(e.into()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| ProxyError::Transient(e.into()))?;

            if !status.is_success() {
                return Ok(ForwardOutcome::PassThrough {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: UpstreamPage = parse_json_with_context(&body)
                .map_err(|e| ProxyError::MalformedResponse(e.to_string()))?;

            match dispatch_info(&page) {
                InfoOutcome::Success => {
                    self.credential_pool
                        .record_success(credential.id, search_type)
                        .await?;
                    return Ok(ForwardOutcome::Success(page));
                }
                InfoOutcome::DailyLimitExceeded => {
                    warn!(credential_id = credential.id, %search_type, "daily quota exceeded, trying another credential");
                    self.credential_pool
                        .record_exhausted(credential.id, search_type)
                        .await?;
                }
                InfoOutcome::InvalidKey => {
                    warn!(credential_id = credential.id, info = %page.info, "credential rejected, disabling");
                    self.credential_pool
                        .disable(credential.id, &page.info)
                        .await?;
                }
                InfoOutcome::Rejected => {
                    return Ok(ForwardOutcome::PassThrough {
                        status: 400,
                        body,
                    });
                }
            }
        }

        Err(ProxyError::NoCredential)
    }

    /// Thin wrapper over `forward` for internal callers that only want a
    /// successful page, surfacing a non-2xx passthrough as `UpstreamStatus`.
    pub async fn search_page(
        &self,
        search_type: SearchType,
        params: &[(&str, String)],
    ) -> Result<UpstreamPage, ProxyError> {
        match self.forward(search_type, params).await? {
            ForwardOutcome::Success(page) => Ok(page),
            ForwardOutcome::PassThrough { status, .. } => Err(ProxyError::UpstreamStatus(status)),
        }
    }
}

fn upstream_path(search_type: SearchType) -> &'static str {
    match search_type {
        SearchType::Keyword => "text",
        SearchType::Around => "around",
        SearchType::Polygon => "polygon",
    }
}

fn user_agent() -> &'static str {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36"
}

/// Parses JSON and, on failure, annotates the error with a snippet around the
/// failing line/column so malformed upstream bodies are debuggable from logs alone.
fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> anyhow::Result<T> {
    match serde_json::from_str::<T>(body) {
        Ok(value) => Ok(value),
        Err(err) => {
            let snippet = build_error_snippet(body, err.line(), err.column(), 120);
            Err(anyhow::anyhow!(
                "{err} at line {}, column {}\nsnippet:\n{snippet}",
                err.line(),
                err.column()
            ))
        }
    }
}

fn build_error_snippet(body: &str, line: usize, column: usize, max_len: usize) -> String {
    let target_line = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target_line.is_empty() {
        return String::new();
    }

    let start = column.saturating_sub(max_len.min(column));
    let end = (column + max_len).min(target_line.len());
    let slice = &target_line[start..end];

    let mut indicator = String::new();
    if column > start {
        indicator.push_str(&" ".repeat(column - start - 1));
        indicator.push('^');
    }

    format!("{slice}\n{indicator}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(infocode: &str, info: &str) -> UpstreamPage {
        UpstreamPage {
            status: if infocode == "10000" { "1".into() } else { "0".into() },
            info: info.into(),
            infocode: Some(infocode.into()),
            count: None,
            pois: vec![],
        }
    }

    #[test]
    fn dispatches_success_on_infocode_10000() {
        assert_eq!(dispatch_info(&page("10000", "OK")), InfoOutcome::Success);
    }

    #[test]
    fn a_success_status_field_alone_is_not_enough() {
        // status == "1" with a non-10000 infocode must not be treated as success.
        let page = UpstreamPage {
            status: "1".into(),
            info: "OK".into(),
            infocode: Some("20000".into()),
            count: None,
            pois: vec![],
        };
        assert_eq!(dispatch_info(&page), InfoOutcome::Rejected);
    }

    #[test]
    fn dispatches_daily_limit_exceeded() {
        assert_eq!(
            dispatch_info(&page("10044", "DAILY_QUERY_OVER_LIMIT")),
            InfoOutcome::DailyLimitExceeded
        );
    }

    #[test]
    fn dispatches_invalid_key() {
        assert_eq!(
            dispatch_info(&page("10001", "INVALID_USER_KEY")),
            InfoOutcome::InvalidKey
        );
        assert_eq!(
            dispatch_info(&page("10009", "USER_KEY_RECYCLED")),
            InfoOutcome::InvalidKey
        );
    }

    #[test]
    fn dispatches_unknown_failure_as_rejected() {
        assert_eq!(
            dispatch_info(&page("20000", "INVALID_PARAMS")),
            InfoOutcome::Rejected
        );
    }

    #[test]
    fn search_type_for_endpoint_maps_known_paths() {
        assert_eq!(Proxy::search_type_for_endpoint("text"), Some(SearchType::Keyword));
        assert_eq!(Proxy::search_type_for_endpoint("v3/place/polygon"), Some(SearchType::Polygon));
        assert_eq!(Proxy::search_type_for_endpoint("nonsense"), None);
    }

    #[test]
    fn parse_json_with_context_reports_location() {
        let bad = "{\"status\": \"1\", \"info\": }";
        let result: anyhow::Result<UpstreamPage> = parse_json_with_context(bad);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("line"));
        assert!(err.contains("column"));
    }
}
