//! Conversation drift monitor
//!
//! Per-conversation safety temperature in [0,1]. Warn events heat it,
//! benign turns and elapsed time cool it. Above the safety-context
//! threshold an extra instruction is injected into subsequent system
//! prompts; above the force threshold the conversation is soft-blocked
//! and reset.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use cortex_config::constants::guardrails as gr;

#[derive(Debug, Clone)]
struct DriftState {
    temperature: f32,
    updated_at: DateTime<Utc>,
}

/// What the monitor asks the pipeline to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAction {
    None,
    /// Inject an extra safety instruction into the system prompt
    InjectSafetyContext,
    /// Soft-block and reset the conversation
    ForceBlock,
}

/// Per-conversation drift temperatures
pub struct DriftMonitor {
    states: DashMap<String, DriftState>,
}

impl DriftMonitor {
    pub fn new() -> Self {
        Self { states: DashMap::new() }
    }

    /// Record a warn event; returns the action for the current turn
    pub fn record_warn(&self, conversation_id: &str) -> DriftAction {
        self.update(conversation_id, gr::DRIFT_WARN_STEP)
    }

    /// Record a benign turn
    pub fn record_benign(&self, conversation_id: &str) -> DriftAction {
        self.update(conversation_id, -gr::DRIFT_BENIGN_DECAY)
    }

    fn update(&self, conversation_id: &str, step: f32) -> DriftAction {
        let now = Utc::now();
        let mut entry = self
            .states
            .entry(conversation_id.to_string())
            .or_insert(DriftState { temperature: 0.0, updated_at: now });

        // Time decay since the last event.
        let idle_min = (now - entry.updated_at).num_seconds().max(0) as f32 / 60.0;
        let decayed = entry.temperature - idle_min * gr::DRIFT_IDLE_DECAY_PER_MIN;
        entry.temperature = (decayed + step).clamp(0.0, 1.0);
        entry.updated_at = now;

        let t = entry.temperature;
        drop(entry);

        if t > gr::DRIFT_FORCE_BLOCK {
            self.reset(conversation_id);
            DriftAction::ForceBlock
        } else if t > gr::DRIFT_SAFETY_CONTEXT {
            DriftAction::InjectSafetyContext
        } else {
            DriftAction::None
        }
    }

    pub fn temperature(&self, conversation_id: &str) -> f32 {
        self.states
            .get(conversation_id)
            .map(|s| s.temperature)
            .unwrap_or(0.0)
    }

    pub fn reset(&self, conversation_id: &str) {
        self.states.remove(conversation_id);
    }
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_accumulate_and_benign_decays() {
        let monitor = DriftMonitor::new();
        monitor.record_warn("c1");
        monitor.record_warn("c1");
        let t = monitor.temperature("c1");
        assert!(t > 0.0);

        monitor.record_benign("c1");
        assert!(monitor.temperature("c1") < t);
    }

    #[test]
    fn high_temperature_injects_safety_context() {
        let monitor = DriftMonitor::new();
        let mut action = DriftAction::None;
        for _ in 0..5 {
            action = monitor.record_warn("c1");
        }
        assert_eq!(action, DriftAction::InjectSafetyContext);
    }

    #[test]
    fn runaway_temperature_forces_block_and_resets() {
        let monitor = DriftMonitor::new();
        let mut forced = false;
        for _ in 0..20 {
            if monitor.record_warn("c1") == DriftAction::ForceBlock {
                forced = true;
                break;
            }
        }
        assert!(forced);
        // Reset follows the forced block.
        assert_eq!(monitor.temperature("c1"), 0.0);
    }

    #[test]
    fn conversations_are_independent() {
        let monitor = DriftMonitor::new();
        monitor.record_warn("c1");
        assert_eq!(monitor.temperature("c2"), 0.0);
    }
}
