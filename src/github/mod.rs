//! Client for the repository that runs the worker jobs.
//!
//! Two protocols are used: Actions variables (`variables`) for the strategy
//! profile, and `repository_dispatch` (`dispatch`) to queue work.

pub mod dispatch;
pub mod variables;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, Response};

use crate::config::GithubConnection;

pub use dispatch::DispatchEvent;

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    headers: HeaderMap,
    api_base: String,
    owner: String,
    repo: String,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, conn: GithubConnection) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("command-gateway"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let auth_header = format!("Bearer {}", conn.token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_header).context("invalid github authorization header")?,
        );

        Ok(Self {
            http,
            headers,
            api_base: conn.api_base.trim_end_matches('/').to_string(),
            owner: conn.owner,
            repo: conn.repo,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        request
            .headers(self.headers.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send GitHub request ({})", operation))
    }
}

/// Turns a non-success response into an error carrying status and body.
async fn ensure_success(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = response.text().await.unwrap_or_default();
    anyhow::bail!("GitHub {} failed ({}): {}", operation, status, error_body.trim());
}

#[cfg(test)]
pub(crate) fn test_client(base_url: &str) -> GithubClient {
    GithubClient::new(
        reqwest::Client::new(),
        GithubConnection {
            api_base: base_url.to_string(),
            token: "ghp_test".to_string(),
            owner: "owner".to_string(),
            repo: "repo".to_string(),
        },
    )
    .expect("client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_url() {
        let client = test_client("https://api.example.test/");
        assert_eq!(
            client.repo_url("/dispatches"),
            "https://api.example.test/repos/owner/repo/dispatches"
        );
    }

    #[test]
    fn test_rejects_token_with_newline() {
        let result = GithubClient::new(
            reqwest::Client::new(),
            GithubConnection {
                api_base: "http://localhost".to_string(),
                token: "bad\ntoken".to_string(),
                owner: "o".to_string(),
                repo: "r".to_string(),
            },
        );
        assert!(result.is_err());
    }
}
