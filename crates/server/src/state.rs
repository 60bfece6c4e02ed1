//! Application state
//!
//! One shared state value for the whole router. Everything inside is an
//! Arc; cloning the state is cheap and the components themselves manage
//! their own interior locking.

use std::sync::Arc;

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;

use cortex_config::Settings;
use cortex_gateway::SpatialResolver;
use cortex_guardrails::GuardrailEngine;
use cortex_memory::MemoryStore;
use cortex_pipeline::{InteractionLog, PipelineDriver};
use cortex_profiles::ProfileService;
use cortex_providers::ProviderRegistry;
use cortex_speech::TtsBridge;

/// Speech-to-text seam. Transcription is an external collaborator; the
/// core ships a null implementation and satellites may also send text
/// directly once their firmware transcribes on-device.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe 16 kHz 16-bit mono PCM. Empty string means "nothing
    /// recognisable".
    async fn transcribe(&self, pcm: &[i16]) -> String;
}

/// Default transcriber: recognises nothing
pub struct NullTranscriber;

#[async_trait]
impl Transcriber for NullTranscriber {
    async fn transcribe(&self, _pcm: &[i16]) -> String {
        String::new()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ProviderRegistry>,
    pub memory: Arc<MemoryStore>,
    pub profiles: Arc<ProfileService>,
    pub guardrails: Arc<GuardrailEngine>,
    pub driver: Arc<PipelineDriver>,
    pub actions: Arc<cortex_actions::ActionRegistry>,
    pub log: Arc<InteractionLog>,
    pub tts: Arc<TtsBridge>,
    pub spatial: Arc<SpatialResolver>,
    pub transcriber: Arc<dyn Transcriber>,
    pub metrics: PrometheusHandle,
}
