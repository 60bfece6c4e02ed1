//! Configuration for Atlas Cortex
//!
//! Layered settings: built-in defaults, then an optional YAML file, then
//! environment variables. The `constants` module centralizes the policy
//! numbers shared across crates so there is a single source of truth.

pub mod constants;
mod settings;

pub use settings::{
    load_settings, AdminConfig, ContextConfig, GatewayConfig, GuardrailConfig, MemoryConfig,
    OrchestratorConfig, ProviderEndpoint, ProvidersConfig, RoleModels, ServerConfig, Settings,
    SpeechConfig, StorageConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for cortex_core::Error {
    fn from(err: ConfigError) -> Self {
        cortex_core::Error::Config(err.to_string())
    }
}
