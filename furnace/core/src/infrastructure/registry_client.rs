// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for the proxy's `POST /register` endpoint

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::domain::registration::{LeaseRegistrar, RegistrationError, RegistrationRequest};

#[derive(Debug, Clone)]
pub struct HttpLeaseRegistrar {
    client: Client,
    base_url: String,
}

impl HttpLeaseRegistrar {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistrationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RegistrationError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LeaseRegistrar for HttpLeaseRegistrar {
    async fn register(&self, request: &RegistrationRequest) -> Result<Duration, RegistrationError> {
        let response = self
            .client
            .post(format!("{}/register", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| RegistrationError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RegistrationError::Rejected(error_text));
        }
        if !status.is_success() {
            return Err(RegistrationError::Transport(format!(
                "proxy answered {}",
                status
            )));
        }

        let lease_ms: i64 = response
            .json()
            .await
            .map_err(|e| RegistrationError::Transport(format!("Failed to parse lease: {}", e)))?;

        // The proxy signals a refused registration with a non-positive lease.
        match u64::try_from(lease_ms) {
            Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
            _ => Err(RegistrationError::Rejected(format!(
                "proxy granted lease of {} ms",
                lease_ms
            ))),
        }
    }
}
