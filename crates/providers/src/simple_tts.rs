//! Built-in synthesis backend
//!
//! Emits silence PCM paced to the text length plus naive per-letter
//! phonemes. Serves as the default `tts` role binding in development and
//! in tests, the same way the audio pipeline ships a silence engine for
//! environments without a real model.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::provider::{Capabilities, Provider, SpeechFrame, SpeechRequest, VoiceInfo};
use crate::ProviderError;

const SAMPLE_RATE: u32 = 22_050;
/// Assumed speaking pace for pacing the silence output
const MS_PER_CHAR: u32 = 60;

/// Silence-output synthesis backend
pub struct SimpleTts;

impl SimpleTts {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimpleTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for SimpleTts {
    fn name(&self) -> &str {
        "simple-tts"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { synthesis: true, phonemes: true, ..Default::default() }
    }

    async fn synthesize(
        &self,
        request: &SpeechRequest,
        tx: mpsc::Sender<SpeechFrame>,
    ) -> Result<(), ProviderError> {
        let speed = if request.speed > 0.0 { request.speed } else { 1.0 };
        let ms_per_char = (MS_PER_CHAR as f32 / speed) as u32;

        let duration_ms = (request.text.chars().count() as u32).saturating_mul(ms_per_char);
        let total_samples = (SAMPLE_RATE as u64 * duration_ms as u64 / 1000) as usize;

        // One frame per ~100ms of audio.
        let frame_samples = (SAMPLE_RATE / 10) as usize;
        let mut emitted = 0usize;
        while emitted < total_samples {
            let n = frame_samples.min(total_samples - emitted);
            let pcm: Arc<[i16]> = vec![0i16; n].into();
            if tx.send(SpeechFrame::Audio { pcm, sample_rate: SAMPLE_RATE }).await.is_err() {
                return Err(ProviderError::Cancelled);
            }
            emitted += n;
        }

        if request.include_phonemes {
            let mut cursor_ms = 0u32;
            for c in request.text.chars().filter(|c| c.is_alphabetic()) {
                let end = cursor_ms + ms_per_char;
                let frame = SpeechFrame::Phoneme {
                    start_ms: cursor_ms,
                    end_ms: end,
                    phoneme: c.to_lowercase().to_string(),
                };
                if tx.send(frame).await.is_err() {
                    return Err(ProviderError::Cancelled);
                }
                cursor_ms = end;
            }
        }

        let _ = tx.send(SpeechFrame::Done).await;
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, ProviderError> {
        Ok(vec![VoiceInfo {
            id: "default".to_string(),
            name: "Default".to_string(),
            language: "en".to_string(),
        }])
    }

    async fn health(&self) -> bool {
        true
    }
}
