//! Context assembler
//!
//! Builds each request's prompt under a token budget derived from the
//! selected model's context window. Sections appear in stable order:
//! system, profile/spatial, checkpoints oldest-first, recent summary,
//! active turns, current message — regardless of which sections were
//! compacted away.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cortex_config::constants::context as ctx;
use cortex_core::{estimate_tokens, ChatOptions, Message};
use cortex_memory::MemoryHit;
use cortex_providers::{ProviderRegistry, Role};

use crate::interaction::{InteractionLog, InteractionRecord};
use crate::PipelineError;

/// One verbatim conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_index: usize,
    pub user: String,
    pub assistant: String,
}

impl Turn {
    fn tokens(&self) -> usize {
        estimate_tokens(&self.user) + estimate_tokens(&self.assistant)
    }
}

/// Immutable compressed summary of a window of turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCheckpoint {
    pub conversation_id: String,
    pub number: usize,
    pub summary: String,
    pub token_count: usize,
    /// Inclusive turn range absorbed by this checkpoint
    pub turn_range: (usize, usize),
    pub topics: Vec<String>,
    pub decisions: Vec<String>,
    pub unresolved: Vec<String>,
    pub entities: Vec<String>,
}

/// Mutable per-conversation context state
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub conversation_id: String,
    /// Active verbatim turns, oldest first
    pub turns: Vec<Turn>,
    /// Checkpoints, oldest first; immutable once written
    pub checkpoints: Vec<ContextCheckpoint>,
    /// Rolling summary of recently compacted turns
    pub recent_summary: Option<String>,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self { conversation_id: conversation_id.into(), ..Default::default() }
    }

    pub fn record_turn(&mut self, turn_index: usize, user: &str, assistant: &str) {
        self.turns.push(Turn {
            turn_index,
            user: user.to_string(),
            assistant: assistant.to_string(),
        });
    }
}

/// Inputs for one assembly
#[derive(Debug, Clone, Default)]
pub struct AssembleInputs {
    pub system_prompt: String,
    /// Extra safety instruction from the guardrails, if any
    pub safety_context: Option<String>,
    pub profile_block: Option<String>,
    pub spatial_block: Option<String>,
    pub memory_hits: Vec<MemoryHit>,
    pub current_message: String,
    pub thinking: bool,
}

/// Assembled prompt payload
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub messages: Vec<Message>,
    pub prompt_tokens: usize,
    pub generation_reserve: usize,
    /// Total budget the prompt was assembled under
    pub budget: usize,
}

/// Builds prompt payloads and owns checkpoint construction
pub struct ContextAssembler {
    registry: Arc<ProviderRegistry>,
    log: Arc<InteractionLog>,
    window_default: usize,
    window_thinking: usize,
}

impl ContextAssembler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        log: Arc<InteractionLog>,
        window_default: usize,
        window_thinking: usize,
    ) -> Self {
        Self { registry, log, window_default, window_thinking }
    }

    /// Assemble the prompt, compacting first when the projection crosses a
    /// trigger.
    pub async fn assemble(
        &self,
        conversation: &mut ConversationState,
        inputs: &AssembleInputs,
    ) -> Result<AssembledPrompt, PipelineError> {
        let budget = if inputs.thinking { self.window_thinking } else { self.window_default };
        let reserve = if inputs.thinking { ctx::RESERVE_THINKING } else { ctx::RESERVE_STANDARD };

        // Compaction triggers on the projected utilization with all
        // sections at full size.
        let projected = self.project_utilization(conversation, inputs, budget, reserve);
        if projected >= ctx::COMPACT_CHECKPOINT_AT {
            self.checkpoint_all_but_recent(conversation, ctx::CHECKPOINT_KEEP_TURNS).await;
        } else if projected >= ctx::COMPACT_SUMMARIZE_AT {
            self.summarize_oldest_third(conversation);
        }

        Ok(self.layout(conversation, inputs, budget, reserve))
    }

    /// Force a checkpoint over all prior turns. Used on overflow and on a
    /// mode switch into thinking.
    pub async fn force_checkpoint(&self, conversation: &mut ConversationState) {
        self.checkpoint_all_but_recent(conversation, 0).await;
    }

    /// Retrieve the verbatim turns a checkpoint absorbed
    pub fn expand_checkpoint(&self, checkpoint: &ContextCheckpoint) -> Vec<InteractionRecord> {
        self.log.turns_in_range(
            &checkpoint.conversation_id,
            checkpoint.turn_range.0,
            checkpoint.turn_range.1,
        )
    }

    fn project_utilization(
        &self,
        conversation: &ConversationState,
        inputs: &AssembleInputs,
        budget: usize,
        reserve: usize,
    ) -> f32 {
        let fixed = self.fixed_tokens(inputs);
        let memory: usize = inputs.memory_hits.iter().map(|h| estimate_tokens(&h.record.text)).sum();
        let active: usize = conversation.turns.iter().map(Turn::tokens).sum();
        let checkpoints: usize =
            conversation.checkpoints.iter().map(|c| c.token_count).sum();
        let summary = conversation
            .recent_summary
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0);

        (fixed + memory + active + checkpoints + summary + reserve) as f32 / budget as f32
    }

    fn fixed_tokens(&self, inputs: &AssembleInputs) -> usize {
        estimate_tokens(&inputs.system_prompt)
            + inputs.safety_context.as_deref().map(estimate_tokens).unwrap_or(0)
            + inputs.profile_block.as_deref().map(estimate_tokens).unwrap_or(0)
            + inputs.spatial_block.as_deref().map(estimate_tokens).unwrap_or(0)
            + estimate_tokens(&inputs.current_message)
    }

    /// Final budgeted layout. Memory is discarded first under pressure,
    /// then the oldest active turns; the system prompt and current
    /// message are never discarded.
    fn layout(
        &self,
        conversation: &ConversationState,
        inputs: &AssembleInputs,
        budget: usize,
        reserve: usize,
    ) -> AssembledPrompt {
        let fixed = self.fixed_tokens(inputs);
        let free = budget.saturating_sub(fixed + reserve);

        // Memory region.
        let memory_budget = ((free as f32 * ctx::MEMORY_FRACTION) as usize).min(ctx::MEMORY_CEILING);
        let mut memory_lines: Vec<String> = Vec::new();
        let mut memory_tokens = 0usize;
        for hit in &inputs.memory_hits {
            let line_tokens = estimate_tokens(&hit.record.text);
            if memory_tokens + line_tokens > memory_budget {
                break;
            }
            memory_tokens += line_tokens;
            memory_lines.push(format!("- {}", hit.record.text));
        }

        // Active turns, newest backwards.
        let active_budget = ((free as f32 * ctx::ACTIVE_FRACTION) as usize).min(ctx::ACTIVE_CEILING);
        let mut active: Vec<&Turn> = Vec::new();
        let mut active_tokens = 0usize;
        for turn in conversation.turns.iter().rev() {
            let t = turn.tokens();
            if active_tokens + t > active_budget {
                break;
            }
            active_tokens += t;
            active.push(turn);
        }
        active.reverse();

        // Checkpoints take what remains, oldest first.
        let checkpoint_budget = free.saturating_sub(memory_tokens + active_tokens);
        let mut checkpoint_lines: Vec<String> = Vec::new();
        let mut checkpoint_tokens = 0usize;
        for checkpoint in &conversation.checkpoints {
            if checkpoint_tokens + checkpoint.token_count > checkpoint_budget {
                break;
            }
            checkpoint_tokens += checkpoint.token_count;
            checkpoint_lines.push(checkpoint.summary.clone());
        }

        let summary_tokens = conversation
            .recent_summary
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0);
        let include_summary = summary_tokens <= checkpoint_budget.saturating_sub(checkpoint_tokens);

        // Stable section order.
        let mut messages = Vec::new();

        let mut system = inputs.system_prompt.clone();
        if let Some(safety) = &inputs.safety_context {
            system.push_str("\n\n");
            system.push_str(safety);
        }
        messages.push(Message::system(system));

        let mut context_block = String::new();
        if let Some(profile) = &inputs.profile_block {
            context_block.push_str(profile);
            context_block.push('\n');
        }
        if let Some(spatial) = &inputs.spatial_block {
            context_block.push_str(spatial);
            context_block.push('\n');
        }
        if !memory_lines.is_empty() {
            context_block.push_str("Relevant memory:\n");
            context_block.push_str(&memory_lines.join("\n"));
        }
        if !context_block.is_empty() {
            messages.push(Message::system(context_block));
        }

        for line in &checkpoint_lines {
            messages.push(Message::system(format!("Earlier in this conversation: {}", line)));
        }

        if include_summary {
            if let Some(summary) = &conversation.recent_summary {
                messages.push(Message::system(format!("Recently discussed: {}", summary)));
            }
        }

        for turn in active {
            messages.push(Message::user(turn.user.clone()));
            messages.push(Message::assistant(turn.assistant.clone()));
        }

        messages.push(Message::user(inputs.current_message.clone()));

        let prompt_tokens: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();

        AssembledPrompt { messages, prompt_tokens, generation_reserve: reserve, budget }
    }

    /// Summarize the oldest third of active turns into the rolling
    /// summary. Rule-based; no model call on this path.
    fn summarize_oldest_third(&self, conversation: &mut ConversationState) {
        let count = conversation.turns.len() / 3;
        if count == 0 {
            return;
        }
        let absorbed: Vec<Turn> = conversation.turns.drain(..count).collect();
        let mut summary = conversation.recent_summary.take().unwrap_or_default();
        for turn in &absorbed {
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(&extractive_gist(&turn.user, &turn.assistant));
        }
        conversation.recent_summary = Some(summary);
        tracing::debug!(
            conversation = %conversation.conversation_id,
            absorbed = count,
            "compacted oldest third of active turns"
        );
    }

    /// Absorb all but the last `keep` turns into an immutable checkpoint.
    async fn checkpoint_all_but_recent(&self, conversation: &mut ConversationState, keep: usize) {
        if conversation.turns.len() <= keep {
            return;
        }
        let cut = conversation.turns.len() - keep;
        let absorbed: Vec<Turn> = conversation.turns.drain(..cut).collect();
        let range = (
            absorbed.first().map(|t| t.turn_index).unwrap_or(0),
            absorbed.last().map(|t| t.turn_index).unwrap_or(0),
        );

        let summary = match self.model_checkpoint_summary(&absorbed).await {
            Some(s) => s,
            None => {
                // Degraded path: extractive summary, same shape.
                absorbed
                    .iter()
                    .map(|t| extractive_gist(&t.user, &t.assistant))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        };

        // The rolling summary is absorbed too; the checkpoint replaces it.
        let mut full_summary = summary;
        if let Some(prior) = conversation.recent_summary.take() {
            full_summary = format!("{} {}", prior, full_summary);
        }

        let number = conversation.checkpoints.len();
        let checkpoint = ContextCheckpoint {
            conversation_id: conversation.conversation_id.clone(),
            number,
            token_count: estimate_tokens(&full_summary),
            summary: full_summary,
            turn_range: range,
            topics: topic_words(&absorbed),
            decisions: Vec::new(),
            unresolved: Vec::new(),
            entities: Vec::new(),
        };
        metrics::counter!("context_checkpoints").increment(1);
        tracing::info!(
            conversation = %conversation.conversation_id,
            number,
            turns = cut,
            "context checkpoint created"
        );
        conversation.checkpoints.push(checkpoint);
    }

    /// Ask the fast model for a structured checkpoint summary. `None` on
    /// any provider failure; the caller falls back to extraction.
    async fn model_checkpoint_summary(&self, turns: &[Turn]) -> Option<String> {
        let binding = self.registry.for_role(Role::Fast).ok()?;

        let mut transcript = String::new();
        for turn in turns {
            transcript.push_str(&format!("User: {}\nAssistant: {}\n", turn.user, turn.assistant));
        }

        let messages = vec![
            Message::system(
                "Summarize the conversation excerpt in 2-3 sentences, then list decisions \
                 made, unresolved items, and entities mentioned as short bullet lists.",
            ),
            Message::user(transcript),
        ];
        let options = ChatOptions { max_tokens: 256, ..Default::default() };

        match binding.provider.chat(&binding.model, &messages, &options).await {
            Ok(result) if !result.text.trim().is_empty() => Some(result.text),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "checkpoint summarizer unavailable, extracting");
                None
            }
        }
    }
}

/// First-sentence gist of a turn pair
fn extractive_gist(user: &str, assistant: &str) -> String {
    let first = |text: &str| -> String {
        text.split_inclusive(['.', '!', '?'])
            .next()
            .unwrap_or(text)
            .trim()
            .chars()
            .take(160)
            .collect()
    };
    format!("They asked: {} Answer: {}", first(user), first(assistant))
}

/// Crude topic tags: the most frequent long words
fn topic_words(turns: &[Turn]) -> Vec<String> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for turn in turns {
        for word in turn.user.split_whitespace().chain(turn.assistant.split_whitespace()) {
            let w: String = word.to_lowercase().chars().filter(|c| c.is_alphanumeric()).collect();
            if w.len() > 5 {
                *counts.entry(w).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(5).map(|(w, _)| w).collect()
}
