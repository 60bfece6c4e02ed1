//! Workspace error type
//!
//! Each crate defines its own `thiserror` enum and converts into this
//! aggregate at the boundary, mirroring how errors flow up to the driver.

use thiserror::Error;

/// Top-level error for the request-processing core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("Guardrail error: {0}")]
    Guardrail(String),

    #[error("Action error: {0}")]
    Action(String),

    #[error("Context error: {0}")]
    Context(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Workspace result alias
pub type Result<T> = std::result::Result<T, Error>;
