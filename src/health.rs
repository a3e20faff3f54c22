//! Health/metrics HTTP surface (C14).
//!
//! Consumer-only of the registry's `Status()` — never mutates the core. Grounded in the
//! teacher's `web/routes.rs` router composition, trimmed to the two read-only endpoints
//! this system needs plus a Prometheus text-format exporter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::registry::{Registry, ServiceState};

pub struct HealthState {
    pub registry: Arc<Registry>,
    pub started_at: Instant,
    /// Configured recording directory, if any, for the `lyrebird_disk_free_bytes` gauge.
    pub recording_dir: Option<PathBuf>,
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthzResponse {
    status: &'static str,
    services: usize,
}

/// Reports healthy once the registry exists to be queried at all — the health server is
/// only brought up after the orchestrator's initial discovery pass has registered every
/// device it found, so any request served here reflects at least one registration pass.
async fn healthz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(HealthzResponse {
        status: "healthy",
        services: state.registry.service_count().await,
    })
}

#[derive(Serialize)]
struct StatusEntry {
    name: String,
    state: &'static str,
    uptime_seconds: u64,
    restarts: u32,
    last_error: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    process_uptime_seconds: u64,
    services: Vec<StatusEntry>,
}

async fn status(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let entries = state
        .registry
        .status()
        .await
        .into_iter()
        .map(|s| StatusEntry {
            name: s.name,
            state: state_label(s.state),
            uptime_seconds: s.start_time.elapsed().as_secs(),
            restarts: s.restarts,
            last_error: s.last_error,
        })
        .collect();

    Json(StatusResponse {
        process_uptime_seconds: state.started_at.elapsed().as_secs(),
        services: entries,
    })
}

fn state_label(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Running => "running",
        ServiceState::Failed => "failed",
        ServiceState::Stopped => "stopped",
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let statuses = state.registry.status().await;
    let mut out = String::new();

    out.push_str("# HELP lyrebird_stream_healthy Whether the stream is in the running state.\n");
    out.push_str("# TYPE lyrebird_stream_healthy gauge\n");
    for s in &statuses {
        let healthy = if s.state == ServiceState::Running { 1 } else { 0 };
        out.push_str(&format!(
            "lyrebird_stream_healthy{{name=\"{}\"}} {}\n",
            s.name, healthy
        ));
    }

    out.push_str("# HELP lyrebird_stream_uptime_seconds Seconds since the stream last (re)started.\n");
    out.push_str("# TYPE lyrebird_stream_uptime_seconds gauge\n");
    for s in &statuses {
        out.push_str(&format!(
            "lyrebird_stream_uptime_seconds{{name=\"{}\"}} {}\n",
            s.name,
            s.start_time.elapsed().as_secs()
        ));
    }

    out.push_str("# HELP lyrebird_stream_restarts_total Total restart count observed by the registry.\n");
    out.push_str("# TYPE lyrebird_stream_restarts_total counter\n");
    for s in &statuses {
        out.push_str(&format!(
            "lyrebird_stream_restarts_total{{name=\"{}\"}} {}\n",
            s.name, s.restarts
        ));
    }

    out.push_str("# HELP lyrebird_stream_failures_total Streams currently parked in the failed state.\n");
    out.push_str("# TYPE lyrebird_stream_failures_total counter\n");
    let failures = statuses.iter().filter(|s| s.state == ServiceState::Failed).count();
    out.push_str(&format!("lyrebird_stream_failures_total {failures}\n"));

    if let Some(free) = disk_free_bytes(state.recording_dir.as_deref()) {
        out.push_str("# HELP lyrebird_disk_free_bytes Free space on the recording directory's filesystem.\n");
        out.push_str("# TYPE lyrebird_disk_free_bytes gauge\n");
        out.push_str(&format!("lyrebird_disk_free_bytes {free}\n"));
    }

    ([("content-type", "text/plain; version=0.0.4")], out)
}

fn disk_free_bytes(recording_dir: Option<&std::path::Path>) -> Option<u64> {
    let dir = recording_dir?;
    match nix::sys::statvfs::statvfs(dir) {
        Ok(stat) => Some(stat.blocks_available() as u64 * stat.block_size()),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to read disk-free stats");
            None
        }
    }
}
