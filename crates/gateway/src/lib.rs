//! Satellite gateway for Atlas Cortex
//!
//! Per-connection session state for voice satellites: wake events and
//! audio chunks in, speech, filler, and command frames out, plus spatial
//! resolution of which area a voice request came from. The gateway is a
//! transport adapter over the core's frame streams; the server glues it
//! to a WebSocket.

mod frames;
mod session;
mod spatial;

pub use frames::{FillerPhraseSync, SatelliteFrameIn, SatelliteFrameOut};
pub use session::{SatelliteSession, SessionState};
pub use spatial::{MicReport, ResolvedArea, SpatialResolver, SpatialSignals};

use thiserror::Error;

/// Gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Illegal state transition: {0} -> {1}")]
    IllegalTransition(String, String),

    #[error("Session closed: {0}")]
    Closed(String),

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl From<GatewayError> for cortex_core::Error {
    fn from(err: GatewayError) -> Self {
        cortex_core::Error::Gateway(err.to_string())
    }
}
