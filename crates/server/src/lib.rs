//! Atlas Cortex server
//!
//! Exposes the request-processing core over model-compatible HTTP
//! endpoints (chat completions, speech), the satellite WebSocket, and an
//! auth-gated admin read surface.

pub mod admin;
pub mod http;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use state::{AppState, NullTranscriber, Transcriber};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder; the handle renders `/metrics`
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder already installed")
}
