//! Layer 2 — action registry
//!
//! Integration-contributed (pattern, priority, capability, handler)
//! entries. Dispatch evaluates patterns in priority order — confidence
//! weighted by recent hits — and the first successful handler wins.
//! Parental policy is resolved before any handler runs; a denied entity
//! short-circuits with a natural refusal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use cortex_profiles::ProfileService;

use crate::ActionError;

/// Where a pattern came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSource {
    Seed,
    Learned,
    Nightly,
    Manual,
}

/// One registered command pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPattern {
    pub id: u64,
    pub pattern: String,
    pub intent: String,
    pub domain: String,
    /// Capture group holding the target entity
    pub entity_group: usize,
    /// Capture group holding the value, if the intent carries one
    pub value_group: Option<usize>,
    /// Template rendered when the handler returns no text of its own;
    /// `{entity}` and `{value}` are substituted
    pub response_template: String,
    pub source: PatternSource,
    pub confidence: f32,
    pub hit_count: u64,
    pub last_hit: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Everything a handler gets to work with
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub user_id: Option<String>,
    /// Resolved spatial area, if the request came from a satellite
    pub area: Option<String>,
    pub intent: String,
    pub domain: String,
    /// Captured target entity, normalised to lowercase
    pub entity: Option<String>,
    /// Captured value
    pub value: Option<String>,
    /// All capture groups in order
    pub captures: Vec<String>,
    /// Texts of memory hits for this request, for value defaults
    pub memory_hints: Vec<String>,
}

/// Handler result
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    /// Handled; empty response defers to the pattern template
    Handled {
        response: String,
        /// Entities the integration observed or changed
        entities: Vec<String>,
    },
    /// Pattern matched but this handler cannot act; fall through
    NotApplicable,
}

/// A capability-tagged action callback
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Capability tags, e.g. `["light", "switch"]`
    fn capabilities(&self) -> Vec<String>;

    async fn handle(&self, context: &ActionContext) -> Result<ActionOutcome, ActionError>;
}

/// Successful dispatch
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub response: String,
    pub pattern_id: u64,
    pub intent: String,
    pub entities: Vec<String>,
}

struct Entry {
    pattern: CommandPattern,
    regex: Regex,
    handler: Arc<dyn ActionHandler>,
}

/// The Layer 2 registry
pub struct ActionRegistry {
    entries: RwLock<Vec<Entry>>,
    profiles: Arc<ProfileService>,
    next_id: AtomicU64,
    /// Messages that fell through to Layer 3 but looked actionable;
    /// consumed by the offline learner collaborator
    fallthroughs: RwLock<Vec<String>>,
}

impl ActionRegistry {
    pub fn new(profiles: Arc<ProfileService>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            profiles,
            next_id: AtomicU64::new(1),
            fallthroughs: RwLock::new(Vec::new()),
        }
    }

    /// Register a pattern with its handler. Returns the assigned id.
    pub fn register(
        &self,
        mut pattern: CommandPattern,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<u64, ActionError> {
        let regex = Regex::new(&format!("(?i){}", pattern.pattern))
            .map_err(|e| ActionError::InvalidPattern(format!("{}: {}", pattern.pattern, e)))?;
        pattern.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = pattern.id;
        self.entries.write().push(Entry { pattern, regex, handler });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Priority: confidence × a recency-weighted hit factor
    fn priority(pattern: &CommandPattern, now: DateTime<Utc>) -> f32 {
        let hit_factor = 1.0 + (1.0 + pattern.hit_count as f32).ln();
        let recency = match pattern.last_hit {
            Some(t) => {
                let idle_days = (now - t).num_seconds().max(0) as f32 / 86_400.0;
                1.0 / (1.0 + idle_days)
            }
            None => 0.5,
        };
        pattern.confidence * hit_factor * (0.5 + recency)
    }

    /// Dispatch a message. `None` means no pattern handled it and Layer 3
    /// should run.
    pub async fn dispatch(
        &self,
        message: &str,
        user_id: Option<&str>,
        area: Option<&str>,
        memory_hints: &[String],
    ) -> Option<DispatchResult> {
        let now = Utc::now();

        // Snapshot matching entries in priority order; the lock is not
        // held across handler awaits.
        let mut matched: Vec<(usize, f32)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.regex.is_match(message))
                .map(|(i, e)| (i, Self::priority(&e.pattern, now)))
                .collect()
        };
        matched.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (index, _) in matched {
            let (context, handler, pattern_id, template) = {
                let entries = self.entries.read();
                let entry = entries.get(index)?;
                let captures = entry.regex.captures(message)?;
                let all: Vec<String> = captures
                    .iter()
                    .skip(1)
                    .map(|c| c.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                let entity = captures
                    .get(entry.pattern.entity_group)
                    .map(|m| m.as_str().to_lowercase());
                let value = entry
                    .pattern
                    .value_group
                    .and_then(|g| captures.get(g))
                    .map(|m| m.as_str().to_string());

                (
                    ActionContext {
                        user_id: user_id.map(str::to_string),
                        area: area.map(str::to_string),
                        intent: entry.pattern.intent.clone(),
                        domain: entry.pattern.domain.clone(),
                        entity,
                        value,
                        captures: all,
                        memory_hints: memory_hints.to_vec(),
                    },
                    Arc::clone(&entry.handler),
                    entry.pattern.id,
                    entry.pattern.response_template.clone(),
                )
            };

            // Parental policy resolves before the handler ever runs.
            if let (Some(user), Some(entity)) = (user_id, context.entity.as_deref()) {
                let qualified = format!("{}.{}", context.domain, entity.replace(' ', "_"));
                if !self.profiles.entity_allowed(user, &qualified) {
                    tracing::info!(user, entity = %qualified, "parental policy refusal");
                    return Some(DispatchResult {
                        response: format!(
                            "Sorry, the {} isn't something you can control. Maybe ask a parent?",
                            entity
                        ),
                        pattern_id,
                        intent: "parental_refusal".to_string(),
                        entities: Vec::new(),
                    });
                }
            }

            match handler.handle(&context).await {
                Ok(ActionOutcome::Handled { response, entities }) => {
                    self.record_hit(pattern_id);
                    let response = if response.is_empty() {
                        render_template(&template, &context)
                    } else {
                        response
                    };
                    return Some(DispatchResult {
                        response,
                        pattern_id,
                        intent: context.intent,
                        entities,
                    });
                }
                Ok(ActionOutcome::NotApplicable) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, pattern_id, "action handler failed, falling through");
                    continue;
                }
            }
        }

        None
    }

    fn record_hit(&self, pattern_id: u64) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.pattern.id == pattern_id) {
            entry.pattern.hit_count += 1;
            entry.pattern.last_hit = Some(Utc::now());
        }
    }

    /// Flag a message that reached Layer 3 but drove an
    /// integration-relevant tool, for offline analysis
    pub fn record_fallthrough(&self, message: &str) {
        self.fallthroughs.write().push(message.to_string());
    }

    pub fn take_fallthroughs(&self) -> Vec<String> {
        std::mem::take(&mut *self.fallthroughs.write())
    }

    /// Remove learned patterns with zero hits older than the idle window
    pub fn prune_idle(&self, window: chrono::Duration, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| {
            !(e.pattern.source == PatternSource::Learned
                && e.pattern.hit_count == 0
                && now - e.pattern.created_at > window)
        });
        before - entries.len()
    }

    /// All patterns, for the admin surface
    pub fn all_patterns(&self) -> Vec<CommandPattern> {
        self.entries.read().iter().map(|e| e.pattern.clone()).collect()
    }
}

fn render_template(template: &str, context: &ActionContext) -> String {
    template
        .replace("{entity}", context.entity.as_deref().unwrap_or("that"))
        .replace("{value}", context.value.as_deref().unwrap_or(""))
        .replace("{area}", context.area.as_deref().unwrap_or("here"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_profiles::ParentalPolicy;
    use cortex_profiles::UserProfile;

    struct LightHandler;

    #[async_trait]
    impl ActionHandler for LightHandler {
        fn capabilities(&self) -> Vec<String> {
            vec!["light".to_string()]
        }

        async fn handle(&self, context: &ActionContext) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome::Handled {
                response: String::new(),
                entities: vec![format!(
                    "light.{}",
                    context.entity.as_deref().unwrap_or("unknown").replace(' ', "_")
                )],
            })
        }
    }

    fn toggle_pattern() -> CommandPattern {
        CommandPattern {
            id: 0,
            pattern: r"turn (on|off) the (\w+) lights?".to_string(),
            intent: "toggle".to_string(),
            domain: "light".to_string(),
            entity_group: 2,
            value_group: Some(1),
            response_template: "Done — {entity} lights {value}.".to_string(),
            source: PatternSource::Seed,
            confidence: 0.9,
            hit_count: 0,
            last_hit: None,
            created_at: Utc::now(),
        }
    }

    fn registry() -> ActionRegistry {
        ActionRegistry::new(Arc::new(ProfileService::new()))
    }

    #[tokio::test]
    async fn toggle_dispatch_renders_the_template() {
        let registry = registry();
        registry.register(toggle_pattern(), Arc::new(LightHandler)).unwrap();

        let result = registry
            .dispatch("turn off the bedroom lights", Some("u1"), None, &[])
            .await
            .unwrap();
        assert_eq!(result.intent, "toggle");
        assert_eq!(result.response, "Done — bedroom lights off.");
        assert_eq!(result.entities, vec!["light.bedroom".to_string()]);
    }

    #[tokio::test]
    async fn unmatched_message_falls_through() {
        let registry = registry();
        registry.register(toggle_pattern(), Arc::new(LightHandler)).unwrap();
        assert!(registry
            .dispatch("explain quantum tunnelling", None, None, &[])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn parental_policy_short_circuits_before_the_handler() {
        let profiles = Arc::new(ProfileService::new());
        let mut child = UserProfile::new("kid");
        child.set_age(9, 0.95);
        child.parent_id = Some("parent".to_string());
        profiles.upsert_profile(child);
        profiles.set_parental_policy(
            "kid",
            ParentalPolicy {
                allowed_entities: vec!["light.bedroom".to_string()],
                tier_override: None,
            },
        );

        let registry = ActionRegistry::new(profiles);
        registry.register(toggle_pattern(), Arc::new(LightHandler)).unwrap();

        // Allowed entity goes through.
        let result = registry
            .dispatch("turn off the bedroom lights", Some("kid"), None, &[])
            .await
            .unwrap();
        assert_eq!(result.response, "Done — bedroom lights off.");

        // Forbidden entity is refused before the handler runs.
        let result = registry
            .dispatch("turn off the garage lights", Some("kid"), None, &[])
            .await
            .unwrap();
        assert_eq!(result.intent, "parental_refusal");
        assert!(result.response.contains("parent"));
    }

    #[tokio::test]
    async fn hits_raise_priority() {
        let registry = registry();
        let id = registry.register(toggle_pattern(), Arc::new(LightHandler)).unwrap();
        registry.dispatch("turn on the kitchen lights", None, None, &[]).await.unwrap();

        let patterns = registry.all_patterns();
        let p = patterns.iter().find(|p| p.id == id).unwrap();
        assert_eq!(p.hit_count, 1);
        assert!(p.last_hit.is_some());
    }

    #[tokio::test]
    async fn not_applicable_falls_to_lower_priority_patterns() {
        struct Refusing;
        #[async_trait]
        impl ActionHandler for Refusing {
            fn capabilities(&self) -> Vec<String> {
                vec![]
            }
            async fn handle(&self, _: &ActionContext) -> Result<ActionOutcome, ActionError> {
                Ok(ActionOutcome::NotApplicable)
            }
        }

        let registry = registry();
        let mut high = toggle_pattern();
        high.confidence = 0.99;
        registry.register(high, Arc::new(Refusing)).unwrap();
        registry.register(toggle_pattern(), Arc::new(LightHandler)).unwrap();

        let result = registry
            .dispatch("turn off the bedroom lights", None, None, &[])
            .await
            .unwrap();
        assert_eq!(result.response, "Done — bedroom lights off.");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let registry = registry();
        let mut p = toggle_pattern();
        p.pattern = "([broken".to_string();
        assert!(registry.register(p, Arc::new(LightHandler)).is_err());
    }

    #[test]
    fn idle_learned_patterns_are_pruned() {
        let registry = registry();
        let mut stale = toggle_pattern();
        stale.source = PatternSource::Learned;
        stale.created_at = Utc::now() - chrono::Duration::days(60);
        registry.register(stale, Arc::new(LightHandler)).unwrap();
        registry.register(toggle_pattern(), Arc::new(LightHandler)).unwrap();

        let pruned = registry.prune_idle(chrono::Duration::days(30), Utc::now());
        assert_eq!(pruned, 1);
        assert_eq!(registry.len(), 1);
    }
}
