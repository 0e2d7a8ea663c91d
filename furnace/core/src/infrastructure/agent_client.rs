// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for one agent's control API, used by the proxy to forward calls

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::forwarding::{AgentApi, AgentConnector, ForwardError, RenderParams, StartParams};
use crate::domain::registration::{AgentEndpoint, AgentKey};

#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: Client,
    base_url: String,
    agent: AgentKey,
}

impl HttpAgentClient {
    pub fn new(endpoint: &AgentEndpoint, timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Transport {
                agent: endpoint.key.clone(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: endpoint.base_url(),
            agent: endpoint.key.clone(),
        })
    }

    fn transport(&self, e: reqwest::Error) -> ForwardError {
        ForwardError::Transport {
            agent: self.agent.clone(),
            reason: e.to_string(),
        }
    }

    /// Relay a non-success answer with its status and body.
    async fn check(&self, response: Response) -> Result<Response, ForwardError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ForwardError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    async fn start(&self, start: &StartParams, render: &RenderParams) -> Result<(), ForwardError> {
        let response = self
            .client
            .post(format!("{}/start", self.base_url))
            .query(start)
            .query(render)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn stop(&self, render: &RenderParams) -> Result<(), ForwardError> {
        let response = self
            .client
            .post(format!("{}/stop", self.base_url))
            .query(render)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn status(&self) -> Result<String, ForwardError> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response)
            .await?
            .text()
            .await
            .map_err(|e| self.transport(e))
    }

    async fn chart(&self) -> Result<Vec<u8>, ForwardError> {
        let response = self
            .client
            .get(format!("{}/chart", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let bytes = self
            .check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| self.transport(e))?;
        Ok(bytes.to_vec())
    }
}

/// Creates [`HttpAgentClient`]s with a shared per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpAgentConnector {
    timeout: Duration,
}

impl HttpAgentConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl AgentConnector for HttpAgentConnector {
    fn connect(&self, endpoint: &AgentEndpoint) -> Result<Arc<dyn AgentApi>, ForwardError> {
        Ok(Arc::new(HttpAgentClient::new(endpoint, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server) -> HttpAgentClient {
        let address = server.host_with_port();
        let (ip, port) = address.rsplit_once(':').unwrap();
        let endpoint = AgentEndpoint {
            key: AgentKey::new("shop", "web-0"),
            ip: ip.to_string(),
            port: port.parse().unwrap(),
        };
        HttpAgentClient::new(&endpoint, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_start_forwards_parameters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/start")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("stopAfter".into(), "60".into()),
                Matcher::UrlEncoded("processPattern".into(), "java".into()),
                Matcher::UrlEncoded("symbolsFromImage".into(), "true".into()),
                Matcher::UrlEncoded("inverted".into(), "false".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let start = StartParams {
            stop_after: Some(60),
            process_pattern: Some("java".into()),
        };
        let render = RenderParams {
            symbols_from_image: true,
            inverted: false,
            ..RenderParams::default()
        };
        client_for(&server).start(&start, &render).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_agent_error_is_relayed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/stop")
            .match_query(Matcher::Any)
            .with_status(409)
            .with_body("Not running: current status is: idle")
            .create_async()
            .await;

        let err = client_for(&server)
            .stop(&RenderParams::default())
            .await
            .unwrap_err();
        match err {
            ForwardError::Rejected { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "Not running: current status is: idle");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_and_chart_bodies() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_body("perf record")
            .create_async()
            .await;
        server
            .mock("GET", "/chart")
            .with_status(200)
            .with_header("content-type", "image/svg+xml")
            .with_body("<svg/>")
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.status().await.unwrap(), "perf record");
        assert_eq!(client.chart().await.unwrap(), b"<svg/>".to_vec());
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_transport_error() {
        let endpoint = AgentEndpoint {
            key: AgentKey::new("shop", "web-0"),
            ip: "127.0.0.1".into(),
            port: 1,
        };
        let client = HttpAgentClient::new(&endpoint, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.status().await,
            Err(ForwardError::Transport { .. })
        ));
    }
}
