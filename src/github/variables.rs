use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ensure_success, GithubClient};

#[derive(Debug, Serialize)]
struct VariableBody<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct VariableResponse {
    value: String,
}

/// Which request stored the value in `upsert_or_create`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Created,
}

impl GithubClient {
    /// A missing variable is `Ok(None)`, not an error.
    pub async fn get_variable(&self, name: &str) -> Result<Option<String>> {
        let url = self.repo_url(&format!("actions/variables/{}", name));
        let response = self.send("get variable", self.http.get(&url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Variable {} is not set", name);
            return Ok(None);
        }

        let variable: VariableResponse = ensure_success("get variable", response)
            .await?
            .json()
            .await
            .context("Failed to parse GitHub variable response")?;
        Ok(Some(variable.value))
    }

    /// PATCH the variable in place; when GitHub answers 404 create it instead.
    /// Any other failure from either request is returned as an error.
    pub async fn upsert_or_create(&self, name: &str, value: &str) -> Result<UpsertOutcome> {
        let body = VariableBody { name, value };

        let url = self.repo_url(&format!("actions/variables/{}", name));
        let response = self
            .send("update variable", self.http.patch(&url).json(&body))
            .await?;

        if response.status() != StatusCode::NOT_FOUND {
            ensure_success("update variable", response).await?;
            info!("Updated variable {}", name);
            return Ok(UpsertOutcome::Updated);
        }

        let url = self.repo_url("actions/variables");
        let response = self
            .send("create variable", self.http.post(&url).json(&body))
            .await?;
        ensure_success("create variable", response).await?;
        info!("Created variable {}", name);
        Ok(UpsertOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_client;
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const VAR_PATH: &str = "/repos/owner/repo/actions/variables/STRATEGY_PROFILE";

    #[tokio::test]
    async fn test_get_variable_returns_value() {
        let server = MockServer::start();
        let get = server.mock(|when, then| {
            when.method(GET)
                .path(VAR_PATH)
                .header("authorization", "Bearer ghp_test");
            then.status(200).json_body(json!({
                "name": "STRATEGY_PROFILE",
                "value": "aggressive",
                "created_at": "2026-01-01T00:00:00Z"
            }));
        });

        let client = test_client(&server.base_url());
        let value = client.get_variable("STRATEGY_PROFILE").await.unwrap();
        assert_eq!(value.as_deref(), Some("aggressive"));
        get.assert_calls(1);
    }

    #[tokio::test]
    async fn test_get_variable_not_found_is_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(VAR_PATH);
            then.status(404).json_body(json!({"message": "Not Found"}));
        });

        let client = test_client(&server.base_url());
        assert_eq!(client.get_variable("STRATEGY_PROFILE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_variable_server_error_propagates() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(VAR_PATH);
            then.status(500).body("boom");
        });

        let client = test_client(&server.base_url());
        let err = client.get_variable("STRATEGY_PROFILE").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_upsert_patches_existing_variable() {
        let server = MockServer::start();
        let patch = server.mock(|when, then| {
            when.method(PATCH)
                .path(VAR_PATH)
                .json_body(json!({"name": "STRATEGY_PROFILE", "value": "balanced"}));
            then.status(204);
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/repos/owner/repo/actions/variables");
            then.status(201);
        });

        let client = test_client(&server.base_url());
        let outcome = client
            .upsert_or_create("STRATEGY_PROFILE", "balanced")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        patch.assert_calls(1);
        create.assert_calls(0);
    }

    #[tokio::test]
    async fn test_upsert_creates_on_not_found() {
        let server = MockServer::start();
        let patch = server.mock(|when, then| {
            when.method(PATCH).path(VAR_PATH);
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/owner/repo/actions/variables")
                .json_body(json!({"name": "STRATEGY_PROFILE", "value": "conservative"}));
            then.status(201);
        });

        let client = test_client(&server.base_url());
        let outcome = client
            .upsert_or_create("STRATEGY_PROFILE", "conservative")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
        patch.assert_calls(1);
        create.assert_calls(1);
    }

    #[tokio::test]
    async fn test_upsert_other_patch_failure_does_not_create() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PATCH).path(VAR_PATH);
            then.status(403).body("Resource not accessible by integration");
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/repos/owner/repo/actions/variables");
            then.status(201);
        });

        let client = test_client(&server.base_url());
        let err = client
            .upsert_or_create("STRATEGY_PROFILE", "balanced")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
        create.assert_calls(0);
    }

    #[tokio::test]
    async fn test_upsert_create_failure_propagates() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PATCH).path(VAR_PATH);
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(POST).path("/repos/owner/repo/actions/variables");
            then.status(422).body("Validation Failed");
        });

        let client = test_client(&server.base_url());
        let err = client
            .upsert_or_create("STRATEGY_PROFILE", "balanced")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Validation Failed"));
    }
}
