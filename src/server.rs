// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP server for Prometheus metrics and liveness checks.
//!
//! The server runs on every replica, leader or not, so standby replicas stay
//! observable and pass their liveness probes.

use crate::constants::HEALTHZ_PATH;
use crate::metrics::gather_metrics;
use anyhow::{Context, Result};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Builds the router serving metrics at `metrics_path`, `/healthz`, and an index page.
pub fn router(metrics_path: &str) -> Router {
    let index = format!(
        "<html><head><title>edgelb</title></head><body><h1>edgelb</h1>\
         <p><a href=\"{metrics_path}\">Metrics</a></p></body></html>"
    );
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route(HEALTHZ_PATH, get(|| async { "ok" }))
        .route("/", get(move || async move { Html(index) }))
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serves the router on `listener` until the process exits.
///
/// # Errors
///
/// Returns an error if the server stops.
pub async fn serve(listener: TcpListener, metrics_path: &str) -> Result<()> {
    let addr = listener.local_addr().context("metrics listener has no address")?;
    info!(address = %addr, path = %metrics_path, "Starting metrics server");
    axum::serve(listener, router(metrics_path))
        .await
        .context("metrics server failed")
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
