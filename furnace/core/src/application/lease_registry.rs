// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Lease Registry - central directory of live agents
//!
//! Agents re-register before their lease runs out; a background sweep drops
//! registrations whose expiry has passed, together with any forwarding client
//! cached for them.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Registration table, expiry sweep and forwarding client cache

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::forwarding::{AgentApi, AgentConnector, ForwardError};
use crate::domain::registration::{
    AgentEndpoint, AgentKey, AgentRegistration, LeaseId, RegistrationError, RegistrationRequest,
};

/// Shortest lease the registry grants.
pub const MIN_LEASE: Duration = Duration::from_secs(1);

struct RegisteredLease {
    id: LeaseId,
    registration: AgentRegistration,
}

struct CachedClient {
    expires_at: DateTime<Utc>,
    api: Arc<dyn AgentApi>,
}

#[derive(Default)]
struct RegistryTable {
    /// In registration order; at most one entry per key.
    leases: Vec<RegisteredLease>,
    clients: HashMap<LeaseId, CachedClient>,
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub registrations: usize,
    pub clients: usize,
}

pub struct LeaseRegistry {
    lease: Duration,
    default_agent_port: u16,
    table: Mutex<RegistryTable>,
    shutdown_token: CancellationToken,
}

impl LeaseRegistry {
    /// A zero lease is raised to [`MIN_LEASE`]; the sweep needs a non-zero period.
    pub fn new(lease: Duration, default_agent_port: u16) -> Self {
        let lease = if lease < MIN_LEASE {
            warn!(lease_ms = lease.as_millis() as u64, "Lease too short, using the minimum");
            MIN_LEASE
        } else {
            lease
        };
        Self {
            lease,
            default_agent_port,
            table: Mutex::new(RegistryTable::default()),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Get a handle to stop the sweeper
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn register(&self, request: RegistrationRequest) -> Result<Duration, RegistrationError> {
        self.register_at(request, Utc::now())
    }

    /// Validate and store a registration as of `now`, replacing any previous
    /// entry for the same pod.
    pub fn register_at(
        &self,
        request: RegistrationRequest,
        now: DateTime<Utc>,
    ) -> Result<Duration, RegistrationError> {
        let registration = match self.validate(request, now) {
            Ok(registration) => registration,
            Err(e) => {
                warn!(error = %e, "Rejected registration");
                metrics::counter!("furnace_registrations_total", "outcome" => "rejected").increment(1);
                return Err(e);
            }
        };

        let key = registration.key();
        let mut table = self.table.lock();
        let replaced = table.leases.iter().any(|l| l.registration.key() == key);
        table.leases.retain(|l| l.registration.key() != key);
        debug!(
            agent = %key,
            ip = %registration.ip,
            port = registration.port,
            replaced,
            "Registered agent"
        );
        table.leases.push(RegisteredLease {
            id: LeaseId::new(),
            registration,
        });
        metrics::gauge!("furnace_registered_agents").set(table.leases.len() as f64);
        drop(table);

        metrics::counter!("furnace_registrations_total", "outcome" => "accepted").increment(1);
        Ok(self.lease)
    }

    fn validate(
        &self,
        request: RegistrationRequest,
        now: DateTime<Utc>,
    ) -> Result<AgentRegistration, RegistrationError> {
        fn required(value: Option<String>, field: &str) -> Result<String, RegistrationError> {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RegistrationError::Rejected(format!("missing {}", field)))
        }

        let pod_name = required(request.pod_name, "podName")?;
        let namespace = required(request.namespace, "namespace")?;
        let ip = required(request.ip, "ip")?;
        let port = if request.port <= 0 {
            self.default_agent_port
        } else {
            u16::try_from(request.port).map_err(|_| {
                RegistrationError::Rejected(format!("port {} out of range", request.port))
            })?
        };
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| RegistrationError::Rejected(format!("invalid lease: {}", e)))?;

        Ok(AgentRegistration {
            pod_name,
            namespace,
            ip,
            port,
            expires_at: now + lease,
        })
    }

    /// Snapshot of the table, in registration order.
    pub fn list_active(&self) -> Vec<AgentRegistration> {
        self.table
            .lock()
            .leases
            .iter()
            .map(|l| l.registration.clone())
            .collect()
    }

    pub fn resolve(&self, key: &AgentKey) -> Result<AgentEndpoint, ForwardError> {
        self.table
            .lock()
            .leases
            .iter()
            .find(|l| l.registration.key() == *key)
            .map(|l| l.registration.endpoint())
            .ok_or_else(|| ForwardError::not_found(key))
    }

    /// Client for the current registration of `key`, created on first use and
    /// reused until the registration's expiry is swept.
    pub fn connection(
        &self,
        key: &AgentKey,
        connector: &dyn AgentConnector,
    ) -> Result<Arc<dyn AgentApi>, ForwardError> {
        let mut table = self.table.lock();
        let (id, endpoint, expires_at) = table
            .leases
            .iter()
            .find(|l| l.registration.key() == *key)
            .map(|l| (l.id, l.registration.endpoint(), l.registration.expires_at))
            .ok_or_else(|| ForwardError::not_found(key))?;

        if let Some(cached) = table.clients.get(&id) {
            return Ok(cached.api.clone());
        }

        let api = connector.connect(&endpoint)?;
        table.clients.insert(
            id,
            CachedClient {
                expires_at,
                api: api.clone(),
            },
        );
        debug!(agent = %key, url = %endpoint.base_url(), "Created forwarding client");
        Ok(api)
    }

    pub fn cached_connections(&self) -> usize {
        self.table.lock().clients.len()
    }

    /// Drop every registration and cached client that expired before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let mut table = self.table.lock();

        let before = table.leases.len();
        table.leases.retain(|l| !l.registration.is_expired(now));
        let registrations = before - table.leases.len();

        let before = table.clients.len();
        table.clients.retain(|_, c| c.expires_at >= now);
        let clients = before - table.clients.len();

        metrics::gauge!("furnace_registered_agents").set(table.leases.len() as f64);
        SweepReport {
            registrations,
            clients,
        }
    }

    /// Start the expiry sweep, one pass per lease period.
    pub fn start_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_sweeper().await;
        })
    }

    async fn run_sweeper(&self) {
        info!(lease_ms = self.lease.as_millis() as u64, "Starting registration sweeper");
        let mut tick = interval(self.lease);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.sweep_expired(Utc::now());
                    if report.registrations > 0 || report.clients > 0 {
                        info!(
                            registrations = report.registrations,
                            clients = report.clients,
                            "Swept expired registrations"
                        );
                    }
                    metrics::counter!("furnace_registry_sweeps_total").increment(1);
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping registration sweeper");
                    break;
                }
            }
        }
    }
}
