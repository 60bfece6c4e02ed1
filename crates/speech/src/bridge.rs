//! TTS bridge
//!
//! Streams a token channel into synthesized speech. Sentences are
//! detected incrementally; sentence N's frames are forwarded while
//! sentence N+1 synthesises in the background, so playback never waits
//! for the whole response.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use cortex_core::{ResponseFrame, Sentiment};
use cortex_providers::{ProviderRegistry, Role, SpeechFrame, SpeechRequest};

use crate::emotion::{EmotionComposer, NightMode};
use crate::splitter::SentenceSplitter;
use crate::SpeechError;

/// Per-response synthesis parameters
#[derive(Debug, Clone)]
pub struct SpeakParams {
    pub user_id: Option<String>,
    pub voice: String,
    pub sentiment: Sentiment,
    pub confidence: f32,
    pub rapport: f32,
    pub include_phonemes: bool,
    /// Local hour for night mode; `None` disables the window
    pub local_hour: Option<u32>,
    /// Presence-signalled quiet hours
    pub quiet_hours: bool,
    /// Expected sentence count, if known ahead of time (short Layer 1/2
    /// responses); used for paralingual gating before the stream ends
    pub expected_sentences: Option<usize>,
    /// Caller-supplied emotion annotation; bypasses the composer
    pub emotion_override: Option<String>,
}

impl Default for SpeakParams {
    fn default() -> Self {
        Self {
            user_id: None,
            voice: "default".to_string(),
            sentiment: Sentiment::neutral(),
            confidence: 1.0,
            rapport: 0.5,
            include_phonemes: false,
            local_hour: None,
            quiet_hours: false,
            expected_sentences: None,
            emotion_override: None,
        }
    }
}

/// Sentence-boundary streaming bridge
pub struct TtsBridge {
    registry: Arc<ProviderRegistry>,
    composer: EmotionComposer,
    night: NightMode,
}

/// How many sentences may be synthesising ahead of playback
const LOOKAHEAD: usize = 2;

impl TtsBridge {
    pub fn new(registry: Arc<ProviderRegistry>, night: NightMode) -> Self {
        Self { registry, composer: EmotionComposer::new(), night }
    }

    /// Consume a token stream and emit audio + phoneme frames.
    ///
    /// Frames for sentence N are fully forwarded before sentence N+1's,
    /// regardless of synthesis timing.
    pub async fn stream(
        &self,
        mut text_rx: mpsc::Receiver<String>,
        params: SpeakParams,
        out_tx: mpsc::Sender<ResponseFrame>,
    ) -> Result<(), SpeechError> {
        let binding = self
            .registry
            .for_role(Role::Tts)
            .map_err(|_| SpeechError::NoProvider)?;
        let capabilities = binding.provider.capabilities();

        let night_active = self
            .night
            .active(params.local_hour.unwrap_or(12), params.quiet_hours);
        let speed = self.night.speed(night_active);

        let annotation = match &params.emotion_override {
            Some(explicit) if capabilities.emotion => Some(explicit.clone()),
            _ => self
                .composer
                .compose(
                    &params.sentiment,
                    params.confidence,
                    params.rapport,
                    night_active,
                    &capabilities,
                )
                .as_provider_string(),
        };

        let mut splitter = SentenceSplitter::new();
        let mut sentences_seen = 0usize;
        // FIFO of in-flight synthesis receivers; forwarded strictly in order.
        let mut in_flight: VecDeque<mpsc::Receiver<SpeechFrame>> = VecDeque::new();

        let spawn_sentence = |text: String, in_flight: &mut VecDeque<mpsc::Receiver<SpeechFrame>>| {
            let (synth_tx, synth_rx) = mpsc::channel(64);
            let provider = Arc::clone(&binding.provider);
            let request = SpeechRequest {
                text,
                voice: params.voice.clone(),
                emotion: annotation.clone(),
                speed,
                include_phonemes: params.include_phonemes && capabilities.phonemes,
            };
            tokio::spawn(async move {
                if let Err(e) = provider.synthesize(&request, synth_tx).await {
                    tracing::warn!(error = %e, "sentence synthesis failed");
                }
            });
            in_flight.push_back(synth_rx);
        };

        loop {
            // Keep the pipeline primed before draining output.
            while in_flight.len() < LOOKAHEAD {
                match text_rx.recv().await {
                    Some(token) => {
                        for sentence in splitter.push(&token) {
                            sentences_seen += 1;
                            spawn_sentence(sentence, &mut in_flight);
                        }
                    }
                    None => {
                        // Token stream ended: flush the tail, maybe append
                        // a paralingual.
                        if let Some(mut rest) = splitter.flush() {
                            sentences_seen += 1;
                            if let Some(user) = params.user_id.as_deref() {
                                let count =
                                    params.expected_sentences.unwrap_or(sentences_seen);
                                if let Some(p) =
                                    self.composer.paralingual(user, &params.sentiment, count)
                                {
                                    rest = format!("{} {}", rest, p);
                                }
                            }
                            spawn_sentence(rest, &mut in_flight);
                        }
                        // Drain everything still in flight, in order.
                        while let Some(mut rx) = in_flight.pop_front() {
                            forward_frames(&mut rx, &out_tx).await;
                        }
                        return Ok(());
                    }
                }
            }

            // Forward the oldest sentence while later ones synthesise.
            if let Some(mut rx) = in_flight.pop_front() {
                forward_frames(&mut rx, &out_tx).await;
            }
        }
    }
}

async fn forward_frames(rx: &mut mpsc::Receiver<SpeechFrame>, out_tx: &mpsc::Sender<ResponseFrame>) {
    while let Some(frame) = rx.recv().await {
        let mapped = match frame {
            SpeechFrame::Audio { pcm, sample_rate } => ResponseFrame::Audio { pcm, sample_rate },
            SpeechFrame::Phoneme { start_ms, end_ms, phoneme } => {
                ResponseFrame::Phoneme { start_ms, end_ms, phoneme }
            }
            SpeechFrame::Done => break,
        };
        if out_tx.send(mapped).await.is_err() {
            return;
        }
    }
}
