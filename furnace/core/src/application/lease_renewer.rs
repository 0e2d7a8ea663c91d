// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Lease Renewer - keeps this agent registered with the proxy
//!
//! Registers immediately, then again after half of each granted lease. A
//! rejected or failed registration is retried after a fixed backoff.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Background registration loop with graceful shutdown

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::registration::{LeaseRegistrar, RegistrationError, RegistrationRequest};

pub struct LeaseRenewer {
    registrar: Arc<dyn LeaseRegistrar>,
    request: RegistrationRequest,
    retry: Duration,
    shutdown_token: CancellationToken,
}

impl LeaseRenewer {
    pub fn new(
        registrar: Arc<dyn LeaseRegistrar>,
        request: RegistrationRequest,
        retry: Duration,
    ) -> Self {
        Self {
            registrar,
            request,
            retry,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            pod = ?self.request.pod_name,
            namespace = ?self.request.namespace,
            "Starting registration loop"
        );

        loop {
            let delay = self.renew_once().await;
            debug!(delay_ms = delay.as_millis() as u64, "Next registration scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping registration loop");
                    break;
                }
            }
        }
    }

    /// Register once and return the delay until the next attempt.
    pub async fn renew_once(&self) -> Duration {
        match self.registrar.register(&self.request).await {
            Ok(lease) => {
                info!(lease_ms = lease.as_millis() as u64, "Registered with proxy");
                metrics::counter!("furnace_lease_renewals_total", "outcome" => "accepted").increment(1);
                lease / 2
            }
            Err(RegistrationError::Rejected(reason)) => {
                error!(
                    reason = %reason,
                    retry_secs = self.retry.as_secs(),
                    "Registration was not accepted"
                );
                metrics::counter!("furnace_lease_renewals_total", "outcome" => "rejected").increment(1);
                self.retry
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_secs = self.retry.as_secs(),
                    "Failed to register, retrying"
                );
                metrics::counter!("furnace_lease_renewals_total", "outcome" => "failed").increment(1);
                self.retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Replays queued answers, then keeps granting 10 s leases.
    struct ScriptedRegistrar {
        answers: Mutex<VecDeque<Result<Duration, RegistrationError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedRegistrar {
        fn new(answers: Vec<Result<Duration, RegistrationError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LeaseRegistrar for ScriptedRegistrar {
        async fn register(&self, _: &RegistrationRequest) -> Result<Duration, RegistrationError> {
            self.calls.lock().push(Instant::now());
            self.answers
                .lock()
                .pop_front()
                .unwrap_or(Ok(Duration::from_secs(10)))
        }
    }

    fn renewer(registrar: Arc<ScriptedRegistrar>) -> LeaseRenewer {
        LeaseRenewer::new(
            registrar,
            RegistrationRequest {
                pod_name: Some("web-0".into()),
                namespace: Some("shop".into()),
                ip: Some("10.0.0.7".into()),
                port: 12380,
            },
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_delay_follows_result() {
        let registrar = Arc::new(ScriptedRegistrar::new(vec![
            Ok(Duration::from_secs(30)),
            Err(RegistrationError::Rejected("missing ip".into())),
            Err(RegistrationError::Transport("connection refused".into())),
        ]));
        let renewer = renewer(registrar);

        assert_eq!(renewer.renew_once().await, Duration::from_secs(15));
        assert_eq!(renewer.renew_once().await, Duration::from_secs(30));
        assert_eq!(renewer.renew_once().await, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_renews_at_half_lease_and_stops() {
        let registrar = Arc::new(ScriptedRegistrar::new(vec![Err(
            RegistrationError::Transport("down".into()),
        )]));
        let renewer = Arc::new(renewer(registrar.clone()));
        let token = renewer.shutdown_token();
        let started = Instant::now();
        let handle = renewer.start();

        // Failure at 0s, retry at 30s, then every 5s (half of 10s).
        tokio::time::sleep(Duration::from_secs(41)).await;
        token.cancel();
        handle.await.unwrap();

        let offsets: Vec<u64> = registrar
            .calls
            .lock()
            .iter()
            .map(|at| (*at - started).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 30, 35, 40]);
    }
}
