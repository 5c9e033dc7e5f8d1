use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{ensure_success, GithubClient};

/// Body of a `repository_dispatch` request
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    pub event_type: String,
    pub client_payload: Value,
}

impl GithubClient {
    /// Single POST, no retries. A non-success response becomes an error that
    /// includes the status and the response body.
    pub async fn dispatch(&self, event: &DispatchEvent) -> Result<()> {
        let url = self.repo_url("dispatches");
        let response = self
            .send("dispatch", self.http.post(&url).json(event))
            .await?;
        ensure_success("dispatch", response).await?;

        info!(
            "Dispatched {} event (command: {})",
            event.event_type,
            event.client_payload["command"].as_str().unwrap_or("-")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_client;
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_posts_event() {
        let server = MockServer::start();
        let dispatch = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/owner/repo/dispatches")
                .header("accept", "application/vnd.github+json")
                .json_body(json!({
                    "event_type": "gateway_command",
                    "client_payload": {"command": "status"}
                }));
            then.status(204);
        });

        let client = test_client(&server.base_url());
        client
            .dispatch(&DispatchEvent {
                event_type: "gateway_command".to_string(),
                client_payload: json!({"command": "status"}),
            })
            .await
            .unwrap();
        dispatch.assert_calls(1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_carries_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/repos/owner/repo/dispatches");
            then.status(422).body("Invalid request");
        });

        let client = test_client(&server.base_url());
        let err = client
            .dispatch(&DispatchEvent {
                event_type: "gateway_command".to_string(),
                client_payload: json!({}),
            })
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("422"));
        assert!(message.contains("Invalid request"));
    }
}
