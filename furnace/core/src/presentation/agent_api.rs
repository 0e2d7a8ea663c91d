// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Agent control API
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/ready` | 200 once the agent is prepared, else 404 |
//! | GET | `/status` | legacy status token (error text in the error state) |
//! | GET | `/status/detail` | structured JSON status |
//! | POST | `/start` | start recording |
//! | POST | `/stop` | stop recording; post-processing continues in the background |
//! | GET | `/chart` | last rendered flame graph |

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::application::controller::AgentController;
use crate::domain::forwarding::{RenderParams, StartParams};
use crate::domain::pipeline::{AgentStatus, PipelineError};

pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

pub fn app(controller: Arc<AgentController>) -> Router {
    Router::new()
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .route("/status/detail", get(status_detail_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/chart", get(chart_handler))
        .with_state(controller)
}

/// Maps pipeline errors onto HTTP statuses; the body is the error text.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::AlreadyRunning(_)
            | PipelineError::NotRunning(_)
            | PipelineError::AlreadyStopping => StatusCode::CONFLICT,
            PipelineError::NoTargetFound(_) => StatusCode::BAD_REQUEST,
            PipelineError::ArtifactNotAvailable => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    #[serde(default)]
    pub download: bool,
}

/// `Content-Disposition` for a downloaded chart.
pub fn attachment_header(namespace: &str, pod: &str) -> String {
    format!("attachment; filename={}_{}.svg", namespace, pod)
}

/// Headers of a chart response.
pub fn chart_headers(download: Option<(&str, &str)>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(SVG_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Some((namespace, pod)) = download {
        if let Ok(value) = HeaderValue::from_str(&attachment_header(namespace, pod)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    headers
}

async fn ready_handler(State(controller): State<Arc<AgentController>>) -> StatusCode {
    if controller.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn status_handler(State(controller): State<Arc<AgentController>>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-cache")],
        controller.status().await,
    )
}

async fn status_detail_handler(State(controller): State<Arc<AgentController>>) -> Json<AgentStatus> {
    Json(controller.detail().await)
}

async fn start_handler(
    State(controller): State<Arc<AgentController>>,
    Query(start): Query<StartParams>,
    Query(render): Query<RenderParams>,
) -> Result<StatusCode, ApiError> {
    let handle = controller
        .start(
            start.stop_after.map(Duration::from_secs),
            start.process_pattern,
            render.into(),
        )
        .await?;
    info!(pid = ?handle.pid, "Start request served");
    Ok(StatusCode::OK)
}

async fn stop_handler(
    State(controller): State<Arc<AgentController>>,
    Query(render): Query<RenderParams>,
) -> Result<StatusCode, ApiError> {
    // The chain's outcome is reported through /status.
    let _completion = controller.stop(render.into()).await?;
    Ok(StatusCode::OK)
}

async fn chart_handler(
    State(controller): State<Arc<AgentController>>,
    Query(query): Query<ChartQuery>,
) -> Result<Response, ApiError> {
    let bytes = controller.chart().await?;
    let identity = &controller.config().identity;
    let download = query
        .download
        .then_some((identity.namespace.as_str(), identity.name.as_str()));
    Ok((chart_headers(download), bytes).into_response())
}
