//! Main settings module
//!
//! Priority: environment variables > config/{env}.yaml > defaults.
//! The flat deployment keys (`LLM_URL`, `MODEL_FAST`, `JWT_SECRET`, ...)
//! are mapped onto the structured sections after the layered load.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants;
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server bind configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage roots
    #[serde(default)]
    pub storage: StorageConfig,

    /// Provider endpoints and role → model table
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Context budget overrides
    #[serde(default)]
    pub context: ContextConfig,

    /// Memory store tuning
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Guardrail thresholds
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// Generation orchestrator policy
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Admin surface auth
    #[serde(default)]
    pub admin: AdminConfig,

    /// Satellite gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Speech bridge
    #[serde(default)]
    pub speech: SpeechConfig,
}

/// Server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Emit JSON log lines instead of human-readable
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8321
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_json: false,
            log_level: default_log_level(),
        }
    }
}

/// Storage roots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for indexes, journals, and snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

/// One provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderEndpoint {
    /// Provider kind: "openai", "ollama"
    #[serde(default)]
    pub kind: String,
    /// Base URL
    #[serde(default)]
    pub url: String,
    /// API key, if the endpoint requires one
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Role → model name table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleModels {
    #[serde(default = "default_model_fast")]
    pub fast: String,
    #[serde(default = "default_model_standard")]
    pub standard: String,
    #[serde(default = "default_model_thinking")]
    pub thinking: String,
    #[serde(default = "default_model_embedding")]
    pub embedding: String,
}

fn default_model_fast() -> String {
    "qwen3:4b-instruct".to_string()
}

fn default_model_standard() -> String {
    "qwen3:14b-instruct".to_string()
}

fn default_model_thinking() -> String {
    "qwen3:32b".to_string()
}

fn default_model_embedding() -> String {
    "qwen3-embedding:0.6b".to_string()
}

impl Default for RoleModels {
    fn default() -> Self {
        Self {
            fast: default_model_fast(),
            standard: default_model_standard(),
            thinking: default_model_thinking(),
            embedding: default_model_embedding(),
        }
    }
}

/// Provider endpoints and role table
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Primary chat provider
    #[serde(default = "default_primary")]
    pub primary: ProviderEndpoint,
    /// Embedding provider; falls back to primary, then in-process
    #[serde(default)]
    pub embed: Option<ProviderEndpoint>,
    /// TTS provider
    #[serde(default)]
    pub tts: Option<ProviderEndpoint>,
    /// Role → model names
    #[serde(default)]
    pub roles: RoleModels,
    /// Health check cadence in seconds
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_primary() -> ProviderEndpoint {
    ProviderEndpoint {
        kind: "ollama".to_string(),
        url: "http://localhost:11434".to_string(),
        api_key: None,
    }
}

fn default_health_interval() -> u64 {
    constants::providers::HEALTH_INTERVAL_SECS
}

/// Context budget overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Context window for fast/standard roles (tokens)
    #[serde(default = "default_window")]
    pub window_default: usize,
    /// Context window for the thinking role (tokens)
    #[serde(default = "default_window_thinking")]
    pub window_thinking: usize,
    /// Hardware ceiling on model size, 0 = unlimited (MB)
    #[serde(default)]
    pub max_model_size_mb: usize,
}

fn default_window() -> usize {
    constants::context::WINDOW_DEFAULT
}

fn default_window_thinking() -> usize {
    constants::context::WINDOW_THINKING
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_default: default_window(),
            window_thinking: default_window_thinking(),
            max_model_size_mb: 0,
        }
    }
}

/// Memory store tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_n")]
    pub candidate_top_n: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default = "default_hot_soft_ms")]
    pub hot_soft_timeout_ms: u64,
    #[serde(default = "default_hot_hard_ms")]
    pub hot_hard_timeout_ms: u64,
    /// Embedding dimension when the in-process embedder is used
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
}

fn default_top_k() -> usize {
    constants::memory::DEFAULT_TOP_K
}

fn default_candidate_n() -> usize {
    constants::memory::CANDIDATE_TOP_N
}

fn default_rrf_k() -> f32 {
    constants::memory::RRF_K
}

fn default_hot_soft_ms() -> u64 {
    constants::memory::HOT_SOFT_TIMEOUT_MS
}

fn default_hot_hard_ms() -> u64 {
    constants::memory::HOT_HARD_TIMEOUT_MS
}

fn default_embed_dim() -> usize {
    constants::providers::EMBED_DIM
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_top_n: default_candidate_n(),
            rrf_k: default_rrf_k(),
            hot_soft_timeout_ms: default_hot_soft_ms(),
            hot_hard_timeout_ms: default_hot_hard_ms(),
            embed_dim: default_embed_dim(),
        }
    }
}

/// Guardrail thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,
    #[serde(default = "default_fp_ceiling")]
    pub false_positive_ceiling: f32,
    /// Optional replacement for the shipped known-good corpus
    #[serde(default)]
    pub known_good_path: Option<String>,
}

fn default_semantic_threshold() -> f32 {
    constants::guardrails::SEMANTIC_THRESHOLD
}

fn default_fp_ceiling() -> f32 {
    constants::guardrails::FALSE_POSITIVE_CEILING
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: default_semantic_threshold(),
            false_positive_ceiling: default_fp_ceiling(),
            known_good_path: None,
        }
    }
}

/// Generation orchestrator policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_continuations")]
    pub max_continuations: usize,
    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity: f32,
    #[serde(default = "default_max_total_output")]
    pub max_total_output: usize,
}

fn default_max_continuations() -> usize {
    constants::orchestrator::MAX_CONTINUATIONS
}

fn default_dedup_similarity() -> f32 {
    constants::orchestrator::DEDUP_SIMILARITY
}

fn default_max_total_output() -> usize {
    constants::orchestrator::MAX_TOTAL_OUTPUT
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_continuations: default_max_continuations(),
            dedup_similarity: default_dedup_similarity(),
            max_total_output: default_max_total_output(),
        }
    }
}

/// Admin surface auth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// HS256 signing secret; admin surface disabled when empty
    #[serde(default)]
    pub jwt_secret: String,
    /// Token lifetime in seconds
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_secs: u64,
}

fn default_jwt_expiry() -> u64 {
    86_400
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiry_secs: default_jwt_expiry(),
        }
    }
}

/// Satellite gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
}

fn default_heartbeat_timeout() -> u64 {
    constants::gateway::HEARTBEAT_TIMEOUT_SECS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { heartbeat_timeout_secs: default_heartbeat_timeout() }
    }
}

/// Speech bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Night mode window start hour (local)
    #[serde(default = "default_night_start")]
    pub night_start_hour: u32,
    /// Night mode window end hour (local)
    #[serde(default = "default_night_end")]
    pub night_end_hour: u32,
}

fn default_night_start() -> u32 {
    22
}

fn default_night_end() -> u32 {
    7
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            night_start_hour: default_night_start(),
            night_end_hour: default_night_end(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings, rejecting inconsistent values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.top_k == 0 {
            return Err(ConfigError::Invalid("memory.top_k must be > 0".into()));
        }
        if self.memory.candidate_top_n < self.memory.top_k {
            return Err(ConfigError::Invalid(
                "memory.candidate_top_n must be >= memory.top_k".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.guardrails.semantic_threshold) {
            return Err(ConfigError::Invalid(
                "guardrails.semantic_threshold must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.guardrails.false_positive_ceiling) {
            return Err(ConfigError::Invalid(
                "guardrails.false_positive_ceiling must be in [0, 1]".into(),
            ));
        }
        if self.context.window_default == 0 || self.context.window_thinking == 0 {
            return Err(ConfigError::Invalid("context windows must be > 0".into()));
        }
        if self.orchestrator.dedup_similarity <= 0.0 || self.orchestrator.dedup_similarity > 1.0 {
            return Err(ConfigError::Invalid(
                "orchestrator.dedup_similarity must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Apply the flat deployment environment keys
    fn apply_flat_env(&mut self) {
        if let Ok(v) = std::env::var("CORTEX_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("CORTEX_PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("CORTEX_DATA_DIR") {
            self.storage.data_dir = v;
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.providers.primary.kind = v;
        }
        if let Ok(v) = std::env::var("LLM_URL") {
            self.providers.primary.url = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.providers.primary.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("MODEL_FAST") {
            self.providers.roles.fast = v;
        }
        if let Ok(v) = std::env::var("MODEL_STANDARD") {
            self.providers.roles.standard = v;
        }
        if let Ok(v) = std::env::var("MODEL_THINKING") {
            self.providers.roles.thinking = v;
        }
        if let Ok(v) = std::env::var("MODEL_EMBEDDING") {
            self.providers.roles.embedding = v;
        }
        if let Ok(kind) = std::env::var("EMBED_PROVIDER") {
            let mut ep = self.providers.embed.clone().unwrap_or_default();
            ep.kind = kind;
            self.providers.embed = Some(ep);
        }
        if let Ok(url) = std::env::var("EMBED_URL") {
            let mut ep = self.providers.embed.clone().unwrap_or_default();
            ep.url = url;
            self.providers.embed = Some(ep);
        }
        if let Ok(v) = std::env::var("EMBED_MODEL") {
            self.providers.roles.embedding = v;
        }
        if let Ok(v) = std::env::var("CONTEXT_DEFAULT") {
            if let Ok(n) = v.parse() {
                self.context.window_default = n;
            }
        }
        if let Ok(v) = std::env::var("CONTEXT_THINKING") {
            if let Ok(n) = v.parse() {
                self.context.window_thinking = n;
            }
        }
        if let Ok(v) = std::env::var("MAX_MODEL_SIZE_MB") {
            if let Ok(n) = v.parse() {
                self.context.max_model_size_mb = n;
            }
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.admin.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("JWT_EXPIRY") {
            if let Ok(n) = v.parse() {
                self.admin.jwt_expiry_secs = n;
            }
        }
    }
}

/// Load settings from files and environment
///
/// Priority: flat env keys > `CORTEX_`-prefixed env > config/{env}.yaml >
/// config/default.yaml > built-in defaults.
pub fn load_settings(env_name: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = Path::new("config/default.yaml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }

    if let Some(env) = env_name {
        let env_path = format!("config/{}.yaml", env);
        if Path::new(&env_path).exists() {
            builder = builder.add_source(File::with_name(&env_path));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("CORTEX")
            .separator("__")
            .try_parsing(true),
    );

    let raw = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let mut settings: Settings = raw
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    settings.apply_flat_env();
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn invalid_top_k_rejected() {
        let mut s = Settings::default();
        s.memory.top_k = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn candidate_pool_must_cover_top_k() {
        let mut s = Settings::default();
        s.memory.candidate_top_n = 4;
        s.memory.top_k = 8;
        assert!(s.validate().is_err());
    }

    #[test]
    fn semantic_threshold_range_checked() {
        let mut s = Settings::default();
        s.guardrails.semantic_threshold = 1.5;
        assert!(s.validate().is_err());
    }

    #[test]
    fn default_reserve_constants_sane() {
        assert!(constants::context::RESERVE_THINKING > constants::context::RESERVE_STANDARD);
        assert_eq!(constants::memory::RRF_K, 60.0);
    }
}
