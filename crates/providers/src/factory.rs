//! Registry construction from settings
//!
//! Maps the configured endpoints onto backends and binds them to roles.
//! When no embedding backend is reachable the in-process hash embedder is
//! substituted so the memory store always has a vectorizer.

use std::collections::HashMap;
use std::sync::Arc;

use cortex_config::{ProviderEndpoint, Settings};

use crate::embedder::HashEmbedder;
use crate::ollama::{OllamaBackend, OllamaConfig};
use crate::openai::{OpenAiBackend, OpenAiConfig};
use crate::provider::Provider;
use crate::registry::{ProviderRegistry, Role, RoleBinding};
use crate::simple_tts::SimpleTts;
use crate::ProviderError;

fn build_backend(
    endpoint: &ProviderEndpoint,
    thinking: bool,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match endpoint.kind.to_lowercase().as_str() {
        "openai" | "openai-compatible" | "vllm" => {
            let config = OpenAiConfig {
                endpoint: endpoint.url.clone(),
                api_key: endpoint.api_key.clone().unwrap_or_default(),
                thinking,
                ..Default::default()
            };
            Ok(Arc::new(OpenAiBackend::new(config)?))
        }
        "ollama" | "local" | "" => {
            let config = OllamaConfig {
                endpoint: if endpoint.url.is_empty() {
                    OllamaConfig::default().endpoint
                } else {
                    endpoint.url.clone()
                },
                thinking,
                ..Default::default()
            };
            Ok(Arc::new(OllamaBackend::new(config)?))
        }
        other => Err(ProviderError::Configuration(format!("unknown provider kind: {}", other))),
    }
}

/// Build the provider registry from settings
pub fn build_registry(settings: &Settings) -> Result<Arc<ProviderRegistry>, ProviderError> {
    let providers = &settings.providers;

    // Chat roles all advertise thinking so the thinking role can resolve;
    // the registry gate is the model choice, not a separate endpoint.
    let primary = build_backend(&providers.primary, true)?;

    let mut table: HashMap<Role, Vec<RoleBinding>> = HashMap::new();
    table.insert(
        Role::Fast,
        vec![RoleBinding { provider: primary.clone(), model: providers.roles.fast.clone() }],
    );
    table.insert(
        Role::Standard,
        vec![RoleBinding { provider: primary.clone(), model: providers.roles.standard.clone() }],
    );
    table.insert(
        Role::Thinking,
        vec![
            RoleBinding { provider: primary.clone(), model: providers.roles.thinking.clone() },
            // Degraded fallback keeps the role resolvable under pressure.
            RoleBinding { provider: primary.clone(), model: providers.roles.standard.clone() },
        ],
    );

    // Embedding: dedicated endpoint > primary > in-process.
    let hash_dim = settings.memory.embed_dim;
    let mut embed_bindings = Vec::new();
    if let Some(embed_ep) = &providers.embed {
        match build_backend(embed_ep, false) {
            Ok(backend) => embed_bindings.push(RoleBinding {
                provider: backend,
                model: providers.roles.embedding.clone(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "embed endpoint misconfigured, skipping");
            }
        }
    } else if primary.capabilities().embeddings {
        embed_bindings.push(RoleBinding {
            provider: primary.clone(),
            model: providers.roles.embedding.clone(),
        });
    }
    embed_bindings.push(RoleBinding {
        provider: Arc::new(HashEmbedder::new(hash_dim)),
        model: "hash".to_string(),
    });
    table.insert(Role::Embed, embed_bindings);

    // Speech: configured endpoint if its kind is supported later; the
    // built-in synthesis backend is always present as the tail candidate.
    let tts_bindings = vec![RoleBinding {
        provider: Arc::new(SimpleTts::new()) as Arc<dyn Provider>,
        model: "default".to_string(),
    }];
    table.insert(Role::Tts, tts_bindings);

    let registry = ProviderRegistry::build(table)?;
    Ok(Arc::new(registry))
}
