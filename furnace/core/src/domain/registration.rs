// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Registration
//!
//! Agents announce themselves to the proxy with a [`RegistrationRequest`]; the
//! proxy turns it into an [`AgentRegistration`] carrying an expiry and keyed by
//! [`AgentKey`] (`podName`, `namespace`).
//!
//! ## Invariants
//!
//! - There is at most **one** registration per [`AgentKey`]. Registering again
//!   replaces the previous entry, address and port included.
//! - A registration is never extended in place; re-registering is the only
//!   renewal mechanism.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Identity of one agent: the pod it profiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentKey {
    pub namespace: String,
    pub pod_name: String,
}

impl AgentKey {
    pub fn new(namespace: impl Into<String>, pod_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)
    }
}

/// Identifies one particular grant; a re-registration gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of `POST /register`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
    pub ip: Option<String>,
    #[serde(default)]
    pub port: i32,
}

/// A live entry in the proxy's registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub pod_name: String,
    pub namespace: String,
    pub ip: String,
    pub port: u16,
    pub expires_at: DateTime<Utc>,
}

impl AgentRegistration {
    pub fn key(&self) -> AgentKey {
        AgentKey::new(&self.namespace, &self.pod_name)
    }

    pub fn endpoint(&self) -> AgentEndpoint {
        AgentEndpoint {
            key: self.key(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Where to reach one agent's HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentEndpoint {
    pub key: AgentKey,
    pub ip: String,
    pub port: u16,
}

impl AgentEndpoint {
    pub fn base_url(&self) -> String {
        if self.ip.contains(':') {
            format!("http://[{}]:{}", self.ip, self.port)
        } else {
            format!("http://{}:{}", self.ip, self.port)
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid registration: {0}")]
    Rejected(String),

    #[error("Registration transport failure: {0}")]
    Transport(String),
}

/// Client side of `POST /register`, used by the agent's lease renewer.
#[async_trait]
pub trait LeaseRegistrar: Send + Sync {
    /// Register (or re-register) and return the granted lease.
    async fn register(&self, request: &RegistrationRequest) -> Result<Duration, RegistrationError>;
}
