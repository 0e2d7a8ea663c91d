// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Request Router - forwards control calls for a `(namespace, pod)` pair to
//! the agent currently registered for it.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::lease_registry::LeaseRegistry;
use crate::domain::forwarding::{AgentApi, AgentConnector, ForwardError, RenderParams, StartParams};
use crate::domain::registration::{AgentEndpoint, AgentKey};

#[derive(Clone)]
pub struct RequestRouter {
    registry: Arc<LeaseRegistry>,
    connector: Arc<dyn AgentConnector>,
}

impl RequestRouter {
    pub fn new(registry: Arc<LeaseRegistry>, connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    pub fn registry(&self) -> &Arc<LeaseRegistry> {
        &self.registry
    }

    pub fn resolve(&self, key: &AgentKey) -> Result<AgentEndpoint, ForwardError> {
        self.registry.resolve(key)
    }

    fn agent(&self, key: &AgentKey) -> Result<Arc<dyn AgentApi>, ForwardError> {
        self.registry.connection(key, self.connector.as_ref())
    }

    pub async fn start(
        &self,
        key: &AgentKey,
        start: &StartParams,
        render: &RenderParams,
    ) -> Result<(), ForwardError> {
        debug!(agent = %key, ?start, "Forwarding start");
        let result = self.agent(key)?.start(start, render).await;
        record("start", key, &result);
        result
    }

    pub async fn stop(&self, key: &AgentKey, render: &RenderParams) -> Result<(), ForwardError> {
        debug!(agent = %key, "Forwarding stop");
        let result = self.agent(key)?.stop(render).await;
        record("stop", key, &result);
        result
    }

    pub async fn status(&self, key: &AgentKey) -> Result<String, ForwardError> {
        let result = self.agent(key)?.status().await;
        record("status", key, &result);
        result
    }

    pub async fn chart(&self, key: &AgentKey) -> Result<Vec<u8>, ForwardError> {
        let result = self.agent(key)?.chart().await;
        record("chart", key, &result);
        result
    }
}

fn record<T>(operation: &'static str, key: &AgentKey, result: &Result<T, ForwardError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(ForwardError::Rejected { .. }) => "rejected",
        Err(e) => {
            warn!(agent = %key, operation, error = %e, "Forwarding failed");
            "failed"
        }
    };
    metrics::counter!("furnace_forwarded_requests_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}
