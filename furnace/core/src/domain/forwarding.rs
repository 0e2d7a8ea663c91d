// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Control Contract
//!
//! Query parameters understood by an agent's control API and the client-side
//! traits the proxy uses to drive a registered agent.
//!
//! The same parameter structs are parsed by the agent's HTTP handlers and
//! serialized by the forwarding client, so both ends agree on names and
//! defaults (`inverted` defaults to `true`; `symfs`/`stop` are accepted as
//! short aliases).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::pipeline::PostProcessOptions;
use crate::domain::registration::{AgentEndpoint, AgentKey};

fn default_inverted() -> bool {
    true
}

/// Symbol resolution and chart rendering options of a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderParams {
    #[serde(default, alias = "symfs")]
    pub symbols_from_image: bool,

    #[serde(default)]
    pub width: i32,

    #[serde(default)]
    pub colors: String,

    #[serde(default = "default_inverted")]
    pub inverted: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            symbols_from_image: false,
            width: 0,
            colors: String::new(),
            inverted: default_inverted(),
        }
    }
}

impl From<RenderParams> for PostProcessOptions {
    fn from(params: RenderParams) -> Self {
        PostProcessOptions {
            symbols_from_image: params.symbols_from_image,
            width: params.width,
            colors: params.colors,
            inverted: params.inverted,
        }
    }
}

/// Start-only parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    /// Stop automatically after this many seconds.
    #[serde(default, alias = "stop", skip_serializing_if = "Option::is_none")]
    pub stop_after: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_pattern: Option<String>,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no agent registered for namespace {namespace} pod {pod}")]
    AgentNotFound { namespace: String, pod: String },

    /// The agent answered with a non-success status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("agent {agent} unreachable: {reason}")]
    Transport { agent: AgentKey, reason: String },
}

impl ForwardError {
    pub fn not_found(key: &AgentKey) -> Self {
        ForwardError::AgentNotFound {
            namespace: key.namespace.clone(),
            pod: key.pod_name.clone(),
        }
    }
}

/// Remote view of one agent's control API.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn start(&self, start: &StartParams, render: &RenderParams) -> Result<(), ForwardError>;

    async fn stop(&self, render: &RenderParams) -> Result<(), ForwardError>;

    async fn status(&self) -> Result<String, ForwardError>;

    async fn chart(&self) -> Result<Vec<u8>, ForwardError>;
}

/// Builds an [`AgentApi`] bound to one endpoint. Called once per registration;
/// the result is cached by the registry.
pub trait AgentConnector: Send + Sync {
    fn connect(&self, endpoint: &AgentEndpoint) -> Result<Arc<dyn AgentApi>, ForwardError>;
}
