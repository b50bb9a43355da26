//! Outbound GitHub REST boundary.
//!
//! Raw wire types deserialized straight from the API, the [`GithubApi`]
//! capability trait the sync engine is written against, and the reqwest
//! implementation. List endpoints are requested sorted by `updated`
//! descending; incremental sync relies on that ordering.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::constants::{
    API_VERSION, HDR_RATELIMIT_REMAINING, HDR_RATELIMIT_RESET, HDR_RETRY_AFTER, USER_AGENT,
};
use crate::context::Context;
use crate::error::{Result, SyncError};
use crate::page::{PageRequest, RawPage};
use crate::transport::RateLimiter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUser {
    pub id: Option<i64>,
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLabel {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// Marker object present on raw issues that are really pull requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPullRequestLink {
    pub url: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawIssue {
    pub id: Option<i64>,
    pub number: Option<i64>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
    pub user: Option<RawUser>,
    #[serde(default)]
    pub labels: Vec<RawLabel>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub pull_request: Option<RawPullRequestLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBranchRef {
    #[serde(rename = "ref")]
    pub ref_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPullRequestDetail {
    pub id: Option<i64>,
    pub number: Option<i64>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
    pub user: Option<RawUser>,
    #[serde(default)]
    pub labels: Vec<RawLabel>,
    pub base: Option<RawBranchRef>,
    pub head: Option<RawBranchRef>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawComment {
    pub id: Option<i64>,
    pub body: Option<String>,
    pub user: Option<RawUser>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Parent reference, `.../repos/{owner}/{name}/issues/{number}`
    pub issue_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRepository {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub owner: Option<RawUser>,
    pub default_branch: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRateWindow {
    pub limit: i64,
    pub remaining: i64,
    pub reset: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRateLimit {
    pub rate: RawRateWindow,
}

/// The API capability set the sync engine depends on.
#[async_trait]
pub trait GithubApi: Send + Sync {
    async fn list_repo_issues(
        &self,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<RawIssue>>;

    async fn list_repo_pulls(
        &self,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<RawPullRequestDetail>>;

    /// Repo-level issue comments listing (covers PR discussion comments too).
    async fn list_issue_comments(
        &self,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<RawComment>>;

    async fn get_repo(&self, owner: &str, name: &str) -> Result<RawRepository>;

    async fn rate_limit_status(&self) -> Result<RawRateLimit>;
}

/// Extract the `rel="next"` URL from a `Link` response header.
pub(crate) fn parse_next_link(header: Option<&str>) -> Option<String> {
    let header = header?;
    for part in header.split(',') {
        let mut sections = part.split(';');
        let Some(url_part) = sections.next() else {
            continue;
        };
        let url_part = url_part.trim();
        if sections.any(|s| s.trim() == "rel=\"next\"")
            && url_part.starts_with('<')
            && url_part.ends_with('>')
        {
            return Some(url_part[1..url_part.len() - 1].to_string());
        }
    }
    None
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn classify_send_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() || err.is_connect() {
        SyncError::transient(err.to_string())
    } else {
        SyncError::Http(err)
    }
}

/// reqwest-backed [`GithubApi`] implementation. Every request goes through
/// the shared rate limiter, both for quota acquisition and retries.
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    limiter: RateLimiter,
}

impl RestClient {
    pub fn new(ctx: &Context, limiter: RateLimiter) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(API_VERSION),
        );
        if let Some(token) = &ctx.github_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SyncError::Config(format!("invalid GITHUB_TOKEN: {e}")))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        } else {
            warn!("GITHUB_TOKEN not set, using the low unauthenticated rate limit");
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(RestClient {
            http,
            base: ctx.api_base.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    fn list_url(
        &self,
        owner: &str,
        name: &str,
        resource: &str,
        with_state: bool,
        req: &PageRequest,
    ) -> Result<Url> {
        if let Some(token) = &req.token {
            return Url::parse(token)
                .map_err(|e| SyncError::Config(format!("bad page token: {e}")));
        }
        let mut url = self.api_url(&format!("repos/{owner}/{name}/{resource}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            if with_state {
                pairs.append_pair("state", "all");
            }
            pairs
                .append_pair("sort", "updated")
                .append_pair("direction", "desc")
                .append_pair("per_page", &req.per_page.to_string());
        }
        Ok(url)
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.base, path))
            .map_err(|e| SyncError::Config(format!("bad API URL: {e}")))
    }

    async fn send(&self, url: Url) -> Result<reqwest::Response> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await.map_err(classify_send_error)?;
        let remaining = header_i64(resp.headers(), HDR_RATELIMIT_REMAINING);
        let reset = header_i64(resp.headers(), HDR_RATELIMIT_RESET);
        self.limiter.record(remaining, reset).await;
        Ok(resp)
    }

    async fn check_status(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let code = status.as_u16();
        let retry_after = header_i64(resp.headers(), HDR_RETRY_AFTER);
        let remaining = header_i64(resp.headers(), HDR_RATELIMIT_REMAINING);
        let reset = header_i64(resp.headers(), HDR_RATELIMIT_RESET);
        // Secondary limits arrive as 403 with Retry-After or an exhausted
        // quota; both are waits, not failures.
        if code == 429 || (code == 403 && (retry_after.is_some() || remaining == Some(0))) {
            let secs = retry_after
                .or_else(|| reset.map(|r| (r - Utc::now().timestamp()).max(0)))
                .unwrap_or(60);
            return Err(SyncError::RateLimited {
                retry_after: Duration::from_secs(secs as u64),
            });
        }
        if status.is_server_error() {
            return Err(SyncError::transient(format!("server error: {status}")));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::fatal(code, body))
    }

    async fn fetch_page<T: DeserializeOwned>(&self, url: Url) -> Result<RawPage<T>> {
        let resp = self.send(url).await?;
        let next = parse_next_link(
            resp.headers()
                .get(header::LINK)
                .and_then(|v| v.to_str().ok()),
        );
        let resp = self.check_status(resp).await?;
        let records = resp
            .json::<Vec<T>>()
            .await
            .map_err(|e| SyncError::transient(format!("response decode failed: {e}")))?;
        Ok(RawPage { records, next })
    }

    async fn fetch_one<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self.send(url).await?;
        let resp = self.check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| SyncError::transient(format!("response decode failed: {e}")))
    }
}

#[async_trait]
impl GithubApi for RestClient {
    async fn list_repo_issues(
        &self,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<RawIssue>> {
        let url = self.list_url(owner, name, "issues", true, &page)?;
        self.limiter
            .execute_with_retry(|| self.fetch_page::<RawIssue>(url.clone()))
            .await
    }

    async fn list_repo_pulls(
        &self,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<RawPullRequestDetail>> {
        let url = self.list_url(owner, name, "pulls", true, &page)?;
        self.limiter
            .execute_with_retry(|| self.fetch_page::<RawPullRequestDetail>(url.clone()))
            .await
    }

    async fn list_issue_comments(
        &self,
        owner: &str,
        name: &str,
        page: PageRequest,
    ) -> Result<RawPage<RawComment>> {
        let url = self.list_url(owner, name, "issues/comments", false, &page)?;
        self.limiter
            .execute_with_retry(|| self.fetch_page::<RawComment>(url.clone()))
            .await
    }

    async fn get_repo(&self, owner: &str, name: &str) -> Result<RawRepository> {
        let url = self.api_url(&format!("repos/{owner}/{name}"))?;
        self.limiter
            .execute_with_retry(|| self.fetch_one::<RawRepository>(url.clone()))
            .await
    }

    async fn rate_limit_status(&self) -> Result<RawRateLimit> {
        let url = self.api_url("rate_limit")?;
        self.limiter
            .execute_with_retry(|| self.fetch_one::<RawRateLimit>(url.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, max_retries: u32) -> RestClient {
        let mut ctx = Context::default();
        ctx.api_base = server.uri();
        ctx.max_retries = max_retries;
        ctx.retry_base = Duration::from_millis(1);
        let limiter = RateLimiter::new(&ctx);
        RestClient::new(&ctx, limiter).unwrap()
    }

    #[test]
    fn next_link_extraction() {
        let hdr = "<https://api.github.com/repos/a/b/issues?page=2>; rel=\"next\", \
                   <https://api.github.com/repos/a/b/issues?page=9>; rel=\"last\"";
        assert_eq!(
            parse_next_link(Some(hdr)).as_deref(),
            Some("https://api.github.com/repos/a/b/issues?page=2")
        );
        assert!(parse_next_link(Some("<u>; rel=\"last\"")).is_none());
        assert!(parse_next_link(None).is_none());
    }

    #[tokio::test]
    async fn lists_issues_with_continuation() {
        let server = MockServer::start().await;
        let next = format!("{}/repos/acme/widgets/issues?page=2", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues"))
            .and(query_param("sort", "updated"))
            .and(query_param("direction", "desc"))
            .and(query_param("state", "all"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([
                        {"id": 11, "number": 1, "title": "a", "state": "open",
                         "user": {"id": 7, "login": "alice"},
                         "created_at": "2024-01-01T00:00:00Z",
                         "updated_at": "2024-01-02T00:00:00Z"},
                        {"id": 12, "number": 2, "title": "b", "state": "closed",
                         "user": {"id": 8, "login": "bob"},
                         "created_at": "2024-01-01T00:00:00Z",
                         "updated_at": "2024-01-01T12:00:00Z"}
                    ]))
                    .insert_header("link", format!("<{next}>; rel=\"next\"").as_str()),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        let page = client
            .list_repo_issues("acme", "widgets", PageRequest {
                per_page: 100,
                token: None,
            })
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].id, Some(11));
        assert_eq!(page.next.as_deref(), Some(next.as_str()));
    }

    #[tokio::test]
    async fn secondary_limit_classified_as_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("retry-after", "30")
                    .set_body_string("secondary rate limit"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        let err = client
            .list_repo_issues("acme", "widgets", PageRequest::default())
            .await
            .unwrap_err();
        match err {
            SyncError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_found_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let err = client.get_repo("acme", "gone").await.unwrap_err();
        match err {
            SyncError::Fatal { status, .. } => assert_eq!(status, 404),
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 99, "name": "widgets", "owner": {"id": 1, "login": "acme"},
                "default_branch": "main"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let repo = client.get_repo("acme", "widgets").await.unwrap();
        assert_eq!(repo.id, Some(99));
        assert_eq!(repo.default_branch.as_deref(), Some("main"));
    }
}
