// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Proxy API: agent registration plus control calls forwarded by
//! `(namespace, pod)`.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use crate::application::router::RequestRouter;
use crate::domain::forwarding::{ForwardError, RenderParams, StartParams};
use crate::domain::registration::{AgentKey, AgentRegistration, RegistrationError, RegistrationRequest};
use crate::presentation::agent_api::{chart_headers, ChartQuery};

pub fn app(router: RequestRouter) -> Router {
    Router::new()
        .route("/register", post(register_handler))
        .route("/registered", get(registered_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/status", get(status_handler))
        .route("/chart", get(chart_handler))
        .with_state(router)
}

/// Which agent a forwarded call is for.
#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub namespace: String,
    pub pod: String,
}

impl TargetQuery {
    fn key(&self) -> AgentKey {
        AgentKey::new(&self.namespace, &self.pod)
    }
}

pub struct ProxyError(pub ForwardError);

impl From<ForwardError> for ProxyError {
    fn from(e: ForwardError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self.0 {
            ForwardError::AgentNotFound { .. } => {
                (StatusCode::NOT_FOUND, self.0.to_string()).into_response()
            }
            ForwardError::Rejected { status, message } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, message).into_response()
            }
            ForwardError::Transport { .. } => {
                (StatusCode::BAD_GATEWAY, self.0.to_string()).into_response()
            }
        }
    }
}

async fn register_handler(
    State(router): State<RequestRouter>,
    Json(request): Json<RegistrationRequest>,
) -> Response {
    match router.registry().register(request) {
        Ok(lease) => Json(lease.as_millis() as i64).into_response(),
        Err(e @ RegistrationError::Rejected(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn registered_handler(State(router): State<RequestRouter>) -> impl IntoResponse {
    let active: Vec<AgentRegistration> = router.registry().list_active();
    ([(header::CACHE_CONTROL, "no-cache")], Json(active))
}

async fn start_handler(
    State(router): State<RequestRouter>,
    Query(target): Query<TargetQuery>,
    Query(start): Query<StartParams>,
    Query(render): Query<RenderParams>,
) -> Result<StatusCode, ProxyError> {
    debug!(namespace = %target.namespace, pod = %target.pod, "Proxy start");
    router.start(&target.key(), &start, &render).await?;
    Ok(StatusCode::OK)
}

async fn stop_handler(
    State(router): State<RequestRouter>,
    Query(target): Query<TargetQuery>,
    Query(render): Query<RenderParams>,
) -> Result<StatusCode, ProxyError> {
    debug!(namespace = %target.namespace, pod = %target.pod, "Proxy stop");
    router.stop(&target.key(), &render).await?;
    Ok(StatusCode::OK)
}

async fn status_handler(
    State(router): State<RequestRouter>,
    Query(target): Query<TargetQuery>,
) -> Result<impl IntoResponse, ProxyError> {
    let status = router.status(&target.key()).await?;
    Ok(([(header::CACHE_CONTROL, "no-cache")], status))
}

async fn chart_handler(
    State(router): State<RequestRouter>,
    Query(target): Query<TargetQuery>,
    Query(query): Query<ChartQuery>,
) -> Result<Response, ProxyError> {
    let bytes = router.chart(&target.key()).await?;
    let download = query
        .download
        .then_some((target.namespace.as_str(), target.pod.as_str()));
    Ok((chart_headers(download), bytes).into_response())
}
