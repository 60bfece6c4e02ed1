//! Provider registry
//!
//! Role → ordered candidate list, resolved from configuration at startup
//! and hot-reloadable via an atomic swap. Roles without a compatible
//! provider are rejected before any pipeline call. Health checks run at a
//! configurable cadence; an unhealthy provider falls back to the next
//! candidate for the role.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::provider::{Capabilities, Provider};
use crate::ProviderError;

/// Named provider role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Fast,
    Standard,
    Thinking,
    Embed,
    Tts,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Fast => "fast",
            Role::Standard => "standard",
            Role::Thinking => "thinking",
            Role::Embed => "embed",
            Role::Tts => "tts",
        }
    }

    /// Capability the role requires of its providers
    fn required(&self, caps: &Capabilities) -> bool {
        match self {
            Role::Fast | Role::Standard => caps.chat,
            Role::Thinking => caps.chat && caps.thinking,
            Role::Embed => caps.embeddings,
            Role::Tts => caps.synthesis,
        }
    }
}

/// A provider bound to a role together with the model name to request
#[derive(Clone)]
pub struct RoleBinding {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

/// Immutable role table; swapped wholesale on reload
struct RoleTable {
    bindings: HashMap<Role, Vec<RoleBinding>>,
}

/// Provider registry with health-aware role resolution
pub struct ProviderRegistry {
    table: RwLock<Arc<RoleTable>>,
    /// provider name → last observed health
    health: DashMap<String, bool>,
}

impl ProviderRegistry {
    /// Build a registry, validating every binding's capability against its
    /// role. An empty candidate list for a role is rejected.
    pub fn build(
        bindings: HashMap<Role, Vec<RoleBinding>>,
    ) -> Result<Self, ProviderError> {
        for role in [Role::Fast, Role::Standard, Role::Thinking, Role::Embed, Role::Tts] {
            let candidates = bindings.get(&role);
            let candidates = match candidates {
                Some(c) if !c.is_empty() => c,
                _ => {
                    return Err(ProviderError::NoProvider(role.as_str().to_string()));
                }
            };
            for binding in candidates {
                let caps = binding.provider.capabilities();
                if !role.required(&caps) {
                    return Err(ProviderError::Configuration(format!(
                        "provider {} lacks the capability required by role {}",
                        binding.provider.name(),
                        role.as_str()
                    )));
                }
            }
        }

        let registry = Self {
            table: RwLock::new(Arc::new(RoleTable { bindings })),
            health: DashMap::new(),
        };
        Ok(registry)
    }

    /// Resolve the first healthy candidate for a role.
    ///
    /// Providers with no recorded health check yet are assumed healthy;
    /// the background refresher corrects this within one cadence.
    pub fn for_role(&self, role: Role) -> Result<RoleBinding, ProviderError> {
        let table = self.table.read().clone();
        let candidates = table
            .bindings
            .get(&role)
            .ok_or_else(|| ProviderError::NoProvider(role.as_str().to_string()))?;

        for binding in candidates {
            let healthy = self
                .health
                .get(binding.provider.name())
                .map(|h| *h)
                .unwrap_or(true);
            if healthy {
                return Ok(binding.clone());
            }
        }

        // All candidates marked unhealthy: fall back to the first so a
        // transient health blip never hard-fails the pipeline.
        tracing::warn!(role = role.as_str(), "all providers unhealthy, using primary");
        candidates
            .first()
            .cloned()
            .ok_or_else(|| ProviderError::NoProvider(role.as_str().to_string()))
    }

    /// Atomically replace the whole role table. Readers see either the old
    /// or the new table, never a mixture.
    pub fn swap(&self, bindings: HashMap<Role, Vec<RoleBinding>>) -> Result<(), ProviderError> {
        // Validate exactly like build() before publishing.
        let staged = Self::build(bindings)?;
        let new_table = staged.table.read().clone();
        *self.table.write() = new_table;
        tracing::info!("provider role table swapped");
        Ok(())
    }

    /// Probe every distinct provider once and update the health table.
    pub async fn refresh_health(&self) {
        let table = self.table.read().clone();
        let mut seen: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        for candidates in table.bindings.values() {
            for binding in candidates {
                seen.entry(binding.provider.name().to_string())
                    .or_insert_with(|| binding.provider.clone());
            }
        }

        for (name, provider) in seen {
            let healthy = provider.health().await;
            let previous = self.health.insert(name.clone(), healthy);
            if previous == Some(!healthy) {
                tracing::info!(provider = %name, healthy, "provider health changed");
            }
        }
    }

    /// Spawn the periodic health refresher
    pub fn spawn_health_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.refresh_health().await;
            }
        })
    }

    /// Current health snapshot for the admin surface
    pub fn health_snapshot(&self) -> HashMap<String, bool> {
        self.health
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::simple_tts::SimpleTts;
    use async_trait::async_trait;

    struct FakeChat {
        name: &'static str,
        thinking: bool,
        healthy: bool,
    }

    #[async_trait]
    impl Provider for FakeChat {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                chat: true,
                streaming: true,
                thinking: self.thinking,
                ..Default::default()
            }
        }

        async fn health(&self) -> bool {
            self.healthy
        }
    }

    fn full_table(primary_healthy: bool) -> HashMap<Role, Vec<RoleBinding>> {
        let primary: Arc<dyn Provider> =
            Arc::new(FakeChat { name: "primary", thinking: true, healthy: primary_healthy });
        let backup: Arc<dyn Provider> =
            Arc::new(FakeChat { name: "backup", thinking: true, healthy: true });
        let embedder: Arc<dyn Provider> = Arc::new(HashEmbedder::new(64));
        let tts: Arc<dyn Provider> = Arc::new(SimpleTts::new());

        let chat = vec![
            RoleBinding { provider: primary.clone(), model: "m-big".into() },
            RoleBinding { provider: backup.clone(), model: "m-backup".into() },
        ];
        let mut table = HashMap::new();
        table.insert(Role::Fast, chat.clone());
        table.insert(Role::Standard, chat.clone());
        table.insert(Role::Thinking, chat);
        table.insert(
            Role::Embed,
            vec![RoleBinding { provider: embedder, model: "hash".into() }],
        );
        table.insert(Role::Tts, vec![RoleBinding { provider: tts, model: "default".into() }]);
        table
    }

    #[test]
    fn missing_role_is_rejected() {
        let mut table = full_table(true);
        table.remove(&Role::Embed);
        assert!(matches!(
            ProviderRegistry::build(table),
            Err(ProviderError::NoProvider(_))
        ));
    }

    #[test]
    fn incompatible_capability_is_rejected() {
        let mut table = full_table(true);
        // An embedder cannot serve chat.
        let embedder: Arc<dyn Provider> = Arc::new(HashEmbedder::new(64));
        table.insert(
            Role::Fast,
            vec![RoleBinding { provider: embedder, model: "hash".into() }],
        );
        assert!(matches!(
            ProviderRegistry::build(table),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn unhealthy_primary_falls_back() {
        let registry = ProviderRegistry::build(full_table(false)).unwrap();
        registry.refresh_health().await;

        let binding = registry.for_role(Role::Standard).unwrap();
        assert_eq!(binding.provider.name(), "backup");
        assert_eq!(binding.model, "m-backup");
    }

    #[tokio::test]
    async fn healthy_primary_is_preferred() {
        let registry = ProviderRegistry::build(full_table(true)).unwrap();
        registry.refresh_health().await;

        let binding = registry.for_role(Role::Standard).unwrap();
        assert_eq!(binding.provider.name(), "primary");
    }

    #[test]
    fn swap_validates_before_publishing() {
        let registry = ProviderRegistry::build(full_table(true)).unwrap();
        let mut bad = full_table(true);
        bad.remove(&Role::Tts);
        assert!(registry.swap(bad).is_err());
        // Old table still resolves.
        assert!(registry.for_role(Role::Tts).is_ok());
    }
}
