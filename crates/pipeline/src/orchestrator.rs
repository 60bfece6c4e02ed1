//! Generation orchestrator
//!
//! Masks model latency with a prefetched filler, survives context-window
//! overflow through silent continuation cycles, and accepts user
//! interruptions mid-stream. The orchestrator is the sole writer to the
//! output channel: filler, model tokens, continuation filler, and
//! continuation tokens are serialised over one ordered stream.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use cortex_config::OrchestratorConfig;
use cortex_core::{
    ChatOptions, FinishReason, Message, ResponseFrame, Sentiment, StreamChunk,
};
use cortex_profiles::ProfileService;
use cortex_providers::{ProviderRegistry, Role};

use crate::context::{AssembleInputs, ContextAssembler, ConversationState};
use crate::dedup::dedup_sentences;
use crate::interrupt::{classify_interruption, InterruptKind};
use crate::PipelineError;

const CONTINUATION_FILLERS: &[&str] =
    &["…and continuing with that… ", "Bear with me… ", "There's more — "];

/// One generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub message: String,
    pub sentiment: Sentiment,
    /// Predicted answer confidence, drives the confidence filler
    pub predicted_confidence: f32,
    /// Active follow-up exchange; suppresses the filler
    pub follow_up: bool,
    pub thinking: bool,
    pub inputs: AssembleInputs,
}

/// What a generation produced
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Model text actually delivered (dedup applied), filler excluded
    pub final_text: String,
    pub filler: Option<String>,
    pub interrupted: Option<InterruptKind>,
    /// The message that interrupted, for the driver to act on
    pub pending_message: Option<String>,
    pub continuations: usize,
    pub model: String,
}

/// Overflow state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Streaming,
    FillerSent,
    Compacting,
    Continuing,
    Deduping,
    Done,
    Interrupted,
}

/// Layer 3 orchestrator
pub struct GenerationOrchestrator {
    registry: Arc<ProviderRegistry>,
    profiles: Arc<ProfileService>,
    assembler: Arc<ContextAssembler>,
    config: OrchestratorConfig,
}

impl GenerationOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        profiles: Arc<ProfileService>,
        assembler: Arc<ContextAssembler>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { registry, profiles, assembler, config }
    }

    /// Run a generation. Frames flow through `out`; `interrupt` carries
    /// any user message that arrives mid-stream.
    pub async fn generate(
        &self,
        conversation: &mut ConversationState,
        request: &GenerationRequest,
        out: &mpsc::Sender<ResponseFrame>,
        interrupt: &mut watch::Receiver<Option<String>>,
    ) -> Result<GenerationOutcome, PipelineError> {
        // Step A — filler prefetch from the emotional profile.
        let selection = self.profiles.select_filler(
            request.user_id.as_deref(),
            request.sentiment.label,
            request.predicted_confidence,
            request.follow_up,
        );
        let filler = selection.combined();

        // Step B — the filler streams immediately, ahead of the first
        // model token.
        if let Some(text) = &filler {
            out.send(ResponseFrame::Filler(text.clone()))
                .await
                .map_err(|_| PipelineError::ChannelClosed)?;
        }

        let role = if request.thinking { Role::Thinking } else { Role::Standard };
        let binding = self.registry.for_role(role)?;

        // Step C — the injected directive keeps the model from repeating
        // the prefix the user already heard.
        let mut inputs = request.inputs.clone();
        if let Some(text) = &filler {
            inputs.system_prompt.push_str(&format!(
                "\n\nYou have already said \"{}\" to the user. Continue from there without \
                 repeating that opening.",
                text.trim()
            ));
        }

        let prompt = self.assembler.assemble(conversation, &inputs).await?;
        let options = ChatOptions { max_tokens: prompt.generation_reserve, ..Default::default() };

        let mut state = Flow::Streaming;
        let mut committed = String::new();
        let mut buffered = String::new();
        let mut total_tokens = 0usize;
        let mut continuations = 0usize;
        let mut interrupted: Option<InterruptKind> = None;
        let mut pending_message: Option<String> = None;

        let mut messages = prompt.messages.clone();

        'cycles: loop {
            let (token_tx, mut token_rx) = mpsc::channel::<StreamChunk>(64);
            let provider = Arc::clone(&binding.provider);
            let model = binding.model.clone();
            let call_messages = messages.clone();
            let call_options = options.clone();
            let stream_task = tokio::spawn(async move {
                provider
                    .chat_stream(&model, &call_messages, &call_options, token_tx)
                    .await
            });

            let mut finish = FinishReason::Stop;
            let mut interrupt_open = true;
            loop {
                tokio::select! {
                    biased;

                    changed = interrupt.changed(), if interrupt_open => {
                        if changed.is_err() {
                            // Sender gone; the request can no longer be
                            // interrupted.
                            interrupt_open = false;
                        } else {
                            let message = interrupt.borrow_and_update().clone();
                            if let Some(message) = message {
                                // Dropping the receiver cancels the provider
                                // call at its next emission boundary.
                                drop(token_rx);
                                stream_task.abort();
                                let kind = classify_interruption(&message);
                                tracing::info!(kind = ?kind, "generation interrupted");
                                metrics::counter!("generation_interrupted").increment(1);
                                interrupted = Some(kind);
                                pending_message = Some(message);
                                state = Flow::Interrupted;
                                break 'cycles;
                            }
                        }
                    }

                    chunk = token_rx.recv() => {
                        match chunk {
                            Some(chunk) if !chunk.done => {
                                total_tokens += 1;
                                if state == Flow::Streaming {
                                    committed.push_str(&chunk.text);
                                    out.send(ResponseFrame::Token(chunk.text))
                                        .await
                                        .map_err(|_| PipelineError::ChannelClosed)?;
                                } else {
                                    // Continuation chunks buffer for dedup.
                                    buffered.push_str(&chunk.text);
                                }

                                // Absolute output cap: close out gracefully.
                                if total_tokens >= self.config.max_total_output {
                                    drop(token_rx);
                                    stream_task.abort();
                                    finish = FinishReason::Stop;
                                    state = Flow::Deduping;
                                    let closing = " That covers the essentials.";
                                    if continuations == 0 {
                                        committed.push_str(closing);
                                        out.send(ResponseFrame::Token(closing.to_string()))
                                            .await
                                            .map_err(|_| PipelineError::ChannelClosed)?;
                                    } else {
                                        buffered.push_str(closing);
                                    }
                                    break;
                                }
                            }
                            Some(chunk) => {
                                finish = chunk.finish.unwrap_or(FinishReason::Stop);
                                break;
                            }
                            None => {
                                break;
                            }
                        }
                    }
                }
            }

            if state == Flow::Interrupted {
                break 'cycles;
            }

            // Step D — overflow: the model ran out of generation reserve.
            if finish == FinishReason::Length
                && continuations < self.config.max_continuations
                && total_tokens < self.config.max_total_output
            {
                state = Flow::FillerSent;
                let continuation_filler =
                    CONTINUATION_FILLERS[continuations % CONTINUATION_FILLERS.len()];
                out.send(ResponseFrame::ContinuationFiller(continuation_filler.to_string()))
                    .await
                    .map_err(|_| PipelineError::ChannelClosed)?;

                state = Flow::Compacting;
                self.assembler.force_checkpoint(conversation).await;

                // Compact continuation context: the original question, a
                // short recap of what was delivered, and the instruction.
                let delivered = format!("{}{}", committed, buffered);
                let recap: String = crate::dedup::split_sentences(&delivered)
                    .iter()
                    .rev()
                    .take(3)
                    .rev()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" ");
                messages = vec![
                    Message::system(request.inputs.system_prompt.clone()),
                    Message::user(request.message.clone()),
                    Message::assistant(recap),
                    Message::user(
                        "Continue the answer. Do not repeat points already covered.".to_string(),
                    ),
                ];

                continuations += 1;
                state = Flow::Continuing;
                tracing::debug!(continuations, "reissuing after overflow");
                continue 'cycles;
            }

            state = Flow::Deduping;
            break 'cycles;
        }

        // Dedup the buffered continuations against the committed prefix,
        // then emit only novel sentences. Nothing already sent is retracted.
        if state == Flow::Deduping || state == Flow::Done {
            if !buffered.is_empty() {
                let outcome =
                    dedup_sentences(&committed, &buffered, self.config.dedup_similarity);
                let mut appended = outcome.kept.join(" ");

                if outcome.removed_fraction >= cortex_config::constants::orchestrator::SMOOTHING_THRESHOLD
                    && !appended.is_empty()
                {
                    appended = self.smooth(&appended).await.unwrap_or(appended);
                }

                if !appended.is_empty() {
                    let spaced = format!(" {}", appended);
                    committed.push_str(&spaced);
                    out.send(ResponseFrame::Token(spaced))
                        .await
                        .map_err(|_| PipelineError::ChannelClosed)?;
                }
                metrics::counter!("generation_dedup_removed").increment(outcome.removed as u64);
            }
        }

        if state != Flow::Interrupted {
            state = Flow::Done;
        }
        debug_assert!(matches!(state, Flow::Done | Flow::Interrupted));

        Ok(GenerationOutcome {
            final_text: committed,
            filler,
            interrupted,
            pending_message,
            continuations,
            model: binding.model.clone(),
        })
    }

    /// Second-pass smoothing over a deduped continuation
    async fn smooth(&self, text: &str) -> Option<String> {
        let binding = self.registry.for_role(Role::Fast).ok()?;
        let messages = vec![
            Message::system(
                "Rewrite the following so its sentences flow naturally together. Keep every \
                 point; change only the transitions.",
            ),
            Message::user(text.to_string()),
        ];
        let options = ChatOptions { max_tokens: 512, ..Default::default() };
        match binding.provider.chat(&binding.model, &messages, &options).await {
            Ok(result) if !result.text.trim().is_empty() => Some(result.text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_core::{GenerationResult, TokenUsage};
    use cortex_providers::{Capabilities, Provider, ProviderError, RoleBinding};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted backend: each call streams the next chunk script.
    struct ScriptedModel {
        calls: AtomicUsize,
        scripts: Vec<(Vec<&'static str>, FinishReason)>,
        delay_ms: u64,
    }

    #[async_trait]
    impl Provider for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                chat: true,
                streaming: true,
                embeddings: true,
                thinking: true,
                synthesis: true,
                ..Default::default()
            }
        }

        async fn chat(
            &self,
            _model: &str,
            messages: &[Message],
            _options: &ChatOptions,
        ) -> Result<GenerationResult, ProviderError> {
            // Echo the user content back, as a well-behaved summarizer or
            // smoother would preserve the substance.
            let text = messages
                .iter()
                .rev()
                .find(|m| m.role == cortex_core::Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(GenerationResult {
                text,
                usage: TokenUsage::default(),
                time_to_first_token_ms: 1,
                total_time_ms: 1,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn chat_stream(
            &self,
            _model: &str,
            _messages: &[Message],
            _options: &ChatOptions,
            tx: mpsc::Sender<StreamChunk>,
        ) -> Result<GenerationResult, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let (tokens, finish) = self.scripts[call.min(self.scripts.len() - 1)].clone();
            for token in tokens {
                if self.delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
                }
                if tx
                    .send(StreamChunk { text: token.to_string(), done: false, finish: None })
                    .await
                    .is_err()
                {
                    return Err(ProviderError::Cancelled);
                }
            }
            let _ = tx
                .send(StreamChunk { text: String::new(), done: true, finish: Some(finish) })
                .await;
            Ok(GenerationResult {
                text: String::new(),
                usage: TokenUsage::default(),
                time_to_first_token_ms: 1,
                total_time_ms: 1,
                finish_reason: finish,
            })
        }

        async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(cortex_providers::HashEmbedder::new(64).embed_sync(text))
        }

        async fn health(&self) -> bool {
            true
        }
    }

    fn orchestrator_with(
        scripts: Vec<(Vec<&'static str>, FinishReason)>,
        delay_ms: u64,
    ) -> (GenerationOrchestrator, Arc<ProfileService>) {
        let provider: Arc<dyn Provider> =
            Arc::new(ScriptedModel { calls: AtomicUsize::new(0), scripts, delay_ms });
        let mut table: HashMap<Role, Vec<RoleBinding>> = HashMap::new();
        for role in [Role::Fast, Role::Standard, Role::Thinking, Role::Embed, Role::Tts] {
            table.insert(
                role,
                vec![RoleBinding { provider: Arc::clone(&provider), model: "scripted".into() }],
            );
        }
        // The scripted model claims synthesis too, so the registry builds.
        let registry = Arc::new(cortex_providers::ProviderRegistry::build(table).unwrap());
        let profiles = Arc::new(ProfileService::new());
        let assembler = Arc::new(ContextAssembler::new(
            Arc::clone(&registry),
            Arc::new(crate::interaction::InteractionLog::new()),
            8192,
            32768,
        ));
        (
            GenerationOrchestrator::new(
                registry,
                Arc::clone(&profiles),
                assembler,
                OrchestratorConfig::default(),
            ),
            profiles,
        )
    }

    fn request(message: &str) -> GenerationRequest {
        GenerationRequest {
            conversation_id: "c1".to_string(),
            user_id: Some("u1".to_string()),
            message: message.to_string(),
            sentiment: Sentiment { label: cortex_core::SentimentLabel::Curious, compound: 0.1 },
            predicted_confidence: 0.95,
            follow_up: false,
            thinking: false,
            inputs: AssembleInputs {
                system_prompt: "You are Atlas.".to_string(),
                current_message: message.to_string(),
                ..Default::default()
            },
        }
    }

    async fn collect(rx: &mut mpsc::Receiver<ResponseFrame>) -> Vec<ResponseFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn filler_precedes_model_tokens() {
        let (orchestrator, _) = orchestrator_with(
            vec![(vec!["Quantum ", "tunnelling ", "is neat."], FinishReason::Stop)],
            0,
        );
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let (_itx, mut irx) = watch::channel(None);
        let mut conversation = ConversationState::new("c1");

        let outcome = orchestrator
            .generate(&mut conversation, &request("explain tunnelling"), &out_tx, &mut irx)
            .await
            .unwrap();

        let frames = collect(&mut out_rx).await;
        assert!(matches!(frames[0], ResponseFrame::Filler(_)));
        assert!(outcome.filler.is_some());
        assert_eq!(outcome.final_text, "Quantum tunnelling is neat.");
        assert!(outcome.interrupted.is_none());
        assert_eq!(outcome.continuations, 0);
    }

    #[tokio::test]
    async fn overflow_runs_a_continuation_cycle_and_dedups() {
        let (orchestrator, _) = orchestrator_with(
            vec![
                (
                    vec!["Tunnelling lets particles cross barriers. ", "It is probabilistic."],
                    FinishReason::Length,
                ),
                (
                    vec![
                        "It is probabilistic. ",
                        "Scanning microscopes exploit the effect to image single atoms.",
                    ],
                    FinishReason::Stop,
                ),
            ],
            0,
        );
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let (_itx, mut irx) = watch::channel(None);
        let mut conversation = ConversationState::new("c1");

        let outcome = orchestrator
            .generate(&mut conversation, &request("explain in depth"), &out_tx, &mut irx)
            .await
            .unwrap();

        assert_eq!(outcome.continuations, 1);
        let frames = collect(&mut out_rx).await;
        assert!(frames.iter().any(|f| matches!(f, ResponseFrame::ContinuationFiller(_))));

        // The duplicated sentence appears exactly once in the final text.
        let occurrences = outcome.final_text.matches("It is probabilistic").count();
        assert_eq!(occurrences, 1);
        assert!(outcome.final_text.contains("image single atoms"));
    }

    #[tokio::test]
    async fn stop_interruption_cancels_within_one_boundary() {
        let (orchestrator, _) = orchestrator_with(
            vec![(
                vec!["one ", "two ", "three ", "four ", "five ", "six ", "seven ", "eight "],
                FinishReason::Stop,
            )],
            30,
        );
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let (itx, mut irx) = watch::channel(None);
        let mut conversation = ConversationState::new("c1");

        let request_input = request("count to eight slowly");
        let orchestrate = orchestrator.generate(
            &mut conversation,
            &request_input,
            &out_tx,
            &mut irx,
        );
        let interruptor = async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            let _ = itx.send(Some("stop".to_string()));
        };

        let (outcome, _) = tokio::join!(orchestrate, interruptor);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.interrupted, Some(InterruptKind::Stop));
        assert_eq!(outcome.pending_message.as_deref(), Some("stop"));

        // Partial output was committed but the stream stopped early.
        let frames = collect(&mut out_rx).await;
        let tokens = frames.iter().filter(|f| matches!(f, ResponseFrame::Token(_))).count();
        assert!(tokens > 0);
        assert!(tokens < 8);
    }

    #[tokio::test]
    async fn command_sentiment_suppresses_the_filler() {
        let (orchestrator, _) = orchestrator_with(
            vec![(vec!["Done."], FinishReason::Stop)],
            0,
        );
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (_itx, mut irx) = watch::channel(None);
        let mut conversation = ConversationState::new("c1");

        let mut req = request("turn off the lights");
        req.sentiment = Sentiment { label: cortex_core::SentimentLabel::Command, compound: 0.0 };

        let outcome = orchestrator
            .generate(&mut conversation, &req, &out_tx, &mut irx)
            .await
            .unwrap();
        assert!(outcome.filler.is_none());
        let frames = collect(&mut out_rx).await;
        assert!(!frames.iter().any(|f| matches!(f, ResponseFrame::Filler(_))));
    }
}
