//! Snapshot source backed by the Lookback API.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;

use super::PagedSource;
use crate::error::{SyncError, SyncResult};
use crate::scope::ProjectScope;
use crate::snapshot::{Interval, Page, Snapshot};

/// Number of snapshots requested per page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Where history starts when the marker is unknown: 2011-12-01T00:00:00Z.
pub fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2011, 12, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Connection settings for [`LookbackSource`].
#[derive(Clone)]
pub struct LookbackConfig {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    page_size: usize,
    default_start: DateTime<Utc>,
}

impl fmt::Debug for LookbackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookbackConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("page_size", &self.page_size)
            .field("default_start", &self.default_start)
            .finish()
    }
}

impl LookbackConfig {
    /// Creates a configuration for the analytics endpoint at `endpoint`,
    /// e.g. `https://rally1.rallydev.com/analytics/v2.0/service/rally`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
            default_start: default_start(),
        }
    }

    /// Set the API key sent with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of snapshots per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set where history starts when the marker is unknown.
    pub fn with_default_start(mut self, start: DateTime<Utc>) -> Self {
        self.default_start = start;
        self
    }

    /// Get the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the HTTP request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Get the default start.
    pub fn default_start(&self) -> DateTime<Utc> {
        self.default_start
    }
}

/// Body of a snapshot query response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Snapshot>,
    #[serde(default)]
    start_index: usize,
    #[serde(default)]
    total_result_count: usize,
    #[serde(rename = "ETLDate")]
    etl_date: DateTime<Utc>,
    #[serde(default)]
    errors: Vec<String>,
}

impl QueryResponse {
    fn has_more(&self) -> bool {
        !self.results.is_empty() && self.start_index + self.results.len() < self.total_result_count
    }

    fn holds_only(&self, instant: DateTime<Utc>) -> bool {
        self.results.iter().all(|s| s.valid_from == instant)
    }

    /// Appends the next offset page of the same query.
    fn absorb(&mut self, next: QueryResponse) {
        self.results.extend(next.results);
        self.total_result_count = next.total_result_count;
        self.etl_date = next.etl_date;
    }
}

/// Pages through the snapshots of one project, oldest `_ValidFrom` first.
///
/// Each page is `[from, end)`. The final page ends at the service's ETL date.
/// A page that leaves results behind ends at the `_ValidFrom` of the last
/// snapshot returned, and snapshots at that instant are left for the next
/// page, so consecutive pages never overlap. When a whole page shares the
/// instant `from`, the same query is continued with `start` offsets until a
/// later instant shows up, so one instant is never split across pages.
#[derive(Clone)]
pub struct LookbackSource {
    config: LookbackConfig,
    scope: ProjectScope,
    query_url: Url,
    client: Client,
}

impl LookbackSource {
    /// Create a new source for `scope`.
    pub fn new(config: LookbackConfig, scope: ProjectScope) -> SyncResult<Self> {
        let query_url = Url::parse(&format!(
            "{}/workspace/{}/artifact/snapshot/query.js",
            config.endpoint().trim_end_matches('/'),
            scope.workspace_oid
        ))
        .map_err(|e| SyncError::configuration(format!("Invalid Lookback endpoint: {e}")))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                SyncError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            scope,
            query_url,
            client,
        })
    }

    /// URL every page is requested from.
    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    /// Builds the `find` clause for snapshots valid from `from` onwards.
    fn find_clause(&self, from: DateTime<Utc>) -> Value {
        let project_field = if self.scope.project_scoping_down {
            "_ProjectHierarchy"
        } else {
            "Project"
        };
        json!({
            project_field: self.scope.project_oid,
            "_ValidFrom": { "$gte": from.to_rfc3339() },
        })
    }

    /// Convert an error response to a SyncError.
    async fn handle_error_response<T>(&self, response: reqwest::Response) -> SyncResult<T> {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => Err(SyncError::Authentication { message: body }),
            429 => Err(SyncError::RateLimited {
                retry_after_secs: retry_after,
            }),
            400 => Err(SyncError::InvalidRequest { message: body }),
            status => Err(SyncError::Server {
                status,
                message: body,
            }),
        }
    }

    /// Runs one snapshot query starting at result offset `start`.
    async fn query(&self, from: DateTime<Utc>, start: usize) -> SyncResult<QueryResponse> {
        let find = self.find_clause(from).to_string();
        let sort = json!({ "_ValidFrom": 1 }).to_string();
        let start = start.to_string();
        let page_size = self.config.page_size().to_string();

        let mut request = self.client.get(self.query_url.clone()).query(&[
            ("find", find.as_str()),
            ("sort", sort.as_str()),
            ("fields", "true"),
            ("start", start.as_str()),
            ("pagesize", page_size.as_str()),
        ]);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("ZSESSIONID", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::network(e.to_string()))?;

        if !response.status().is_success() {
            return self.handle_error_response(response).await;
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::serialization(e.to_string()))?;

        if !body.errors.is_empty() {
            return Err(SyncError::InvalidRequest {
                message: body.errors.join("; "),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl PagedSource for LookbackSource {
    #[instrument(skip(self), fields(project = self.scope.project_oid))]
    async fn request_page(&self, from: Option<DateTime<Utc>>) -> SyncResult<Page> {
        let from = from.unwrap_or(self.config.default_start());
        let first = self.query(from, 0).await?;
        let body = drain_instant(from, first, |start| self.query(from, start)).await?;

        let page = page_from_response(from, body)?;
        debug!(
            snapshots = page.snapshots.len(),
            interval = ?page.interval,
            has_more = page.has_more,
            "Received Lookback page"
        );
        Ok(page)
    }
}

/// Continues a query whose results so far all sit at `from`, fetching the
/// next offset until a later instant appears or the results run out.
async fn drain_instant<F, Fut>(
    from: DateTime<Utc>,
    mut response: QueryResponse,
    mut next: F,
) -> SyncResult<QueryResponse>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = SyncResult<QueryResponse>>,
{
    while response.has_more() && response.holds_only(from) {
        let start = response.start_index + response.results.len();
        debug!(%from, start, "Page holds a single instant, continuing at offset");

        let following = next(start).await?;
        if following.start_index != start {
            return Err(SyncError::InvalidRequest {
                message: format!(
                    "Lookback answered offset {} for requested offset {start}",
                    following.start_index
                ),
            });
        }
        if following.results.is_empty() {
            break;
        }
        response.absorb(following);
    }
    Ok(response)
}

/// Turns a query response into a non-overlapping page starting at `from`.
fn page_from_response(from: DateTime<Utc>, response: QueryResponse) -> SyncResult<Page> {
    let QueryResponse {
        mut results,
        start_index,
        total_result_count,
        etl_date,
        ..
    } = response;

    results.sort_by_key(|s| s.valid_from);
    let has_more = !results.is_empty() && start_index + results.len() < total_result_count;

    if !has_more {
        let interval = Interval::new(from, etl_date.max(from))?;
        return Ok(Page::new(results, interval, false));
    }

    let last = results
        .last()
        .map(|s| s.valid_from)
        .unwrap_or(from);

    if last > from {
        results.retain(|s| s.valid_from < last);
        return Ok(Page::new(results, Interval::new(from, last)?, true));
    }

    // Only reachable when the service stopped returning results mid-instant.
    Err(SyncError::InvalidRequest {
        message: format!(
            "Lookback paging stalled at {from} after {} snapshots",
            results.len()
        ),
    })
}
