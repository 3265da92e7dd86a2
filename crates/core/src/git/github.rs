//! GitHub REST API client.
//!
//! Covers the pull-request metadata the resolver needs: fetching a pull
//! request, listing open ones against a base branch, waiting for GitHub to
//! compute mergeability, and posting the result comment.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::GitHubError;

/// Page size used for list endpoints.
const PER_PAGE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub state: String,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
    /// `clean`, `dirty`, `unknown`, ...; absent while GitHub computes it.
    #[serde(default)]
    pub mergeable_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
    /// `None` when the source repository has been deleted.
    #[serde(default)]
    pub repo: Option<RepositorySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestNumber {
    number: u64,
}

impl PullRequest {
    /// Mergeable state, `"unknown"` while not yet computed.
    pub fn mergeable_state(&self) -> &str {
        self.mergeable_state.as_deref().unwrap_or("unknown")
    }

    /// Whether GitHub has finished computing mergeability.
    pub fn mergeability_known(&self) -> bool {
        matches!(self.mergeable_state.as_deref(), Some(s) if !s.is_empty() && s != "unknown")
    }

    /// GitHub's marker for a pull request with merge conflicts.
    pub fn is_dirty(&self) -> bool {
        self.mergeable_state() == "dirty"
    }

    /// `owner/repo` of the head branch, empty when the fork is gone.
    pub fn head_repo_full_name(&self) -> &str {
        self.head
            .repo
            .as_ref()
            .map(|r| r.full_name.as_str())
            .unwrap_or("")
    }
}

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let token = token.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("pkgmend/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    /// Get a single pull request by number.
    #[instrument(skip(self))]
    pub async fn get_pull_request(
        &self,
        repo: &str,
        pr_number: u64,
    ) -> Result<PullRequest, GitHubError> {
        let url = format!("{}/repos/{}/pulls/{}", self.api_url, repo, pr_number);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check_response(&resp)?;
        let pr: PullRequest = resp
            .json()
            .await
            .map_err(|e| GitHubError::ParseError(e.to_string()))?;
        debug!(
            number = pr.number,
            mergeable_state = pr.mergeable_state(),
            "fetched pull request"
        );
        Ok(pr)
    }

    /// Numbers of all open pull requests targeting `base`, across pages.
    #[instrument(skip(self))]
    pub async fn list_open_pull_request_numbers(
        &self,
        repo: &str,
        base: &str,
    ) -> Result<Vec<u64>, GitHubError> {
        let url = format!("{}/repos/{}/pulls", self.api_url, repo);
        let per_page = PER_PAGE.to_string();
        let mut numbers = Vec::new();
        let mut page = 1u32;

        loop {
            let page_str = page.to_string();
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .query(&[
                    ("state", "open"),
                    ("base", base),
                    ("per_page", per_page.as_str()),
                    ("page", page_str.as_str()),
                ])
                .send()
                .await?;
            self.check_response(&resp)?;
            let batch: Vec<PullRequestNumber> = resp
                .json()
                .await
                .map_err(|e| GitHubError::ParseError(e.to_string()))?;
            let len = batch.len();
            numbers.extend(batch.into_iter().map(|pr| pr.number));
            if len < PER_PAGE {
                break;
            }
            page += 1;
        }

        info!(count = numbers.len(), base, "listed open pull requests");
        Ok(numbers)
    }

    /// Poll until GitHub reports a mergeable state other than `unknown`.
    ///
    /// Makes at most `max_attempts` polls with `delay` between them, then
    /// returns one final fetch whatever its state.
    #[instrument(skip(self, delay))]
    pub async fn wait_for_mergeable_state(
        &self,
        repo: &str,
        pr_number: u64,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<PullRequest, GitHubError> {
        for attempt in 0..max_attempts {
            let pr = self.get_pull_request(repo, pr_number).await?;
            if pr.mergeability_known() {
                return Ok(pr);
            }
            debug!(attempt, "mergeable state not yet known");
            if attempt + 1 < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }
        self.get_pull_request(repo, pr_number).await
    }

    /// Post a comment on a pull request's conversation.
    #[instrument(skip(self, body))]
    pub async fn create_comment(
        &self,
        repo: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_url, repo, pr_number
        );
        let payload = serde_json::json!({ "body": body });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        self.check_response(&resp)?;
        info!(pr_number, "posted comment");
        Ok(())
    }

    fn check_response(&self, resp: &reqwest::Response) -> Result<(), GitHubError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GitHubError::AuthenticationFailed(format!(
                "HTTP {}",
                status
            )));
        }
        if status.as_u16() == 429 {
            let reset = resp
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            return Err(GitHubError::RateLimited { reset_at: reset });
        }
        Err(GitHubError::ApiError {
            status: status.as_u16(),
            body: format!("HTTP {}", status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pr_json(number: u64, state: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "number": number,
            "html_url": format!("https://github.com/acme/web/pull/{number}"),
            "state": "open",
            "head": {"ref": "feature/x", "sha": "abc", "repo": {"full_name": "acme/web"}},
            "base": {"ref": "main", "sha": "def", "repo": {"full_name": "acme/web"}},
            "mergeable_state": state,
        })
    }

    #[test]
    fn test_pull_request_state_helpers() {
        let pr: PullRequest = serde_json::from_value(pr_json(1, Some("dirty"))).unwrap();
        assert!(pr.mergeability_known());
        assert!(pr.is_dirty());
        assert_eq!(pr.head_repo_full_name(), "acme/web");

        let pr: PullRequest = serde_json::from_value(pr_json(1, None)).unwrap();
        assert!(!pr.mergeability_known());
        assert_eq!(pr.mergeable_state(), "unknown");

        let pr: PullRequest = serde_json::from_value(serde_json::json!({
            "number": 2,
            "head": {"ref": "f", "sha": "1", "repo": null},
            "base": {"ref": "main", "sha": "2"},
        }))
        .unwrap();
        assert_eq!(pr.head_repo_full_name(), "");
    }

    #[tokio::test]
    async fn test_get_pull_request_sends_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls/7"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(7, Some("clean"))))
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "t0ken").unwrap();
        let pr = client.get_pull_request("acme/web", 7).await.unwrap();
        assert_eq!(pr.number, 7);
        assert_eq!(pr.head.ref_name, "feature/x");
        assert!(!pr.is_dirty());
    }

    #[tokio::test]
    async fn test_error_statuses_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls/1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "t").unwrap();
        assert!(matches!(
            client.get_pull_request("acme/web", 1).await,
            Err(GitHubError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            client.get_pull_request("acme/web", 2).await,
            Err(GitHubError::ApiError { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_list_open_pull_requests_paginates() {
        let server = MockServer::start().await;
        let first: Vec<serde_json::Value> =
            (1..=100).map(|n| serde_json::json!({ "number": n })).collect();
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls"))
            .and(query_param("base", "main"))
            .and(query_param("state", "open"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{ "number": 101 }])),
            )
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "t").unwrap();
        let numbers = client
            .list_open_pull_request_numbers("acme/web", "main")
            .await
            .unwrap();
        assert_eq!(numbers.len(), 101);
        assert_eq!(numbers.first(), Some(&1));
        assert_eq!(numbers.last(), Some(&101));
    }

    #[tokio::test]
    async fn test_wait_for_mergeable_state_polls_until_known() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(9, Some("unknown"))))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(9, Some("dirty"))))
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "t").unwrap();
        let pr = client
            .wait_for_mergeable_state("acme/web", 9, 5, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(pr.is_dirty());
    }

    #[tokio::test]
    async fn test_wait_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pr_json(3, None)))
            .expect(3)
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "t").unwrap();
        let pr = client
            .wait_for_mergeable_state("acme/web", 3, 2, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(!pr.mergeability_known());
    }

    #[tokio::test]
    async fn test_create_comment_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/web/issues/4/comments"))
            .and(body_json(serde_json::json!({ "body": "hello" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), "t").unwrap();
        client.create_comment("acme/web", 4, "hello").await.unwrap();
    }
}
