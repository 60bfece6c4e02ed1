//! HTTP surface
//!
//! Model-compatible chat and speech endpoints plus health and metrics.
//! Chat streams SSE chunks terminated by `[DONE]`; speech streams raw
//! audio, optionally interleaved with timed phonemes over SSE.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use cortex_core::{MatchedLayer, ResponseFrame};
use cortex_pipeline::{RequestInput, TransportKind};
use cortex_speech::SpeakParams;

use crate::admin;
use crate::state::AppState;
use crate::websocket;

/// Build the full router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/audio/speech", post(audio_speech))
        .route("/ws/satellite", get(websocket::satellite_upgrade))
        .nest("/admin", admin::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

// ---------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Session user identity
    #[serde(default)]
    pub user: Option<String>,
    // Extension fields carried by satellites and integrations.
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub speaker_id: Option<String>,
    #[serde(default)]
    pub satellite_id: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    model: String,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Serialize)]
struct ChatChoice {
    index: usize,
    message: ApiMessage,
    finish_reason: String,
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let Some(last_user) = request.messages.iter().rev().find(|m| m.role == "user") else {
        return (StatusCode::BAD_REQUEST, "no user message in request").into_response();
    };

    let model = request.model.clone().unwrap_or_else(|| "atlas-cortex".to_string());
    let thinking = model.contains("thinking");
    let conversation_id = request
        .conversation_id
        .clone()
        .unwrap_or_else(|| format!("api-{}", request.user.clone().unwrap_or_default()));

    let input = RequestInput {
        request_id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation_id.clone(),
        message: last_user.content.clone(),
        session_user: request.user.clone(),
        voice_embedding: None,
        speaker_id: request.speaker_id.clone(),
        area: request.area.clone(),
        transport: TransportKind::Api,
        thinking,
    };

    // A message arriving while the same conversation is generating is an
    // interruption, not a fresh request.
    if state.driver.interrupt(&conversation_id, &last_user.content) {
        return (StatusCode::ACCEPTED, "delivered as interruption").into_response();
    }

    let mut rx = state.driver.handle(input);

    if request.stream.unwrap_or(false) {
        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let stream = async_stream::stream! {
            while let Some(frame) = rx.recv().await {
                match frame {
                    ResponseFrame::Token(text)
                    | ResponseFrame::Filler(text)
                    | ResponseFrame::ContinuationFiller(text) => {
                        let chunk = serde_json::json!({
                            "id": id,
                            "object": "chat.completion.chunk",
                            "choices": [{ "index": 0, "delta": { "content": text } }],
                        });
                        yield Ok::<Event, Infallible>(Event::default().data(chunk.to_string()));
                    }
                    ResponseFrame::Final { layer } => {
                        let done = serde_json::json!({
                            "id": id,
                            "object": "chat.completion.chunk",
                            "choices": [{
                                "index": 0,
                                "delta": {},
                                "finish_reason": "stop",
                            }],
                            "atlas": { "matched_layer": layer.as_str() },
                        });
                        yield Ok(Event::default().data(done.to_string()));
                        yield Ok(Event::default().data("[DONE]"));
                    }
                    _ => {}
                }
            }
        };
        Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
    } else {
        let mut text = String::new();
        let mut layer = MatchedLayer::Llm;
        while let Some(frame) = rx.recv().await {
            match frame {
                ResponseFrame::Token(t)
                | ResponseFrame::Filler(t)
                | ResponseFrame::ContinuationFiller(t) => text.push_str(&t),
                ResponseFrame::Final { layer: l } => layer = l,
                _ => {}
            }
        }
        Json(ChatCompletionResponse {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            object: "chat.completion",
            model: format!("{}:{}", model, layer.as_str()),
            choices: vec![ChatChoice {
                index: 0,
                message: ApiMessage { role: "assistant".to_string(), content: text },
                finish_reason: "stop".to_string(),
            }],
        })
        .into_response()
    }
}

// ---------------------------------------------------------------------
// Speech
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SpeechApiRequest {
    pub input: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// pcm | wav | opus
    #[serde(default = "default_format")]
    pub response_format: String,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub include_phonemes: bool,
}

fn default_voice() -> String {
    "default".to_string()
}

fn default_format() -> String {
    "pcm".to_string()
}

async fn audio_speech(
    State(state): State<AppState>,
    Json(request): Json<SpeechApiRequest>,
) -> Response {
    match request.response_format.as_str() {
        "pcm" | "wav" => {}
        "opus" => {
            return (StatusCode::NOT_IMPLEMENTED, "opus negotiation not available").into_response()
        }
        other => {
            return (StatusCode::BAD_REQUEST, format!("unknown format: {}", other))
                .into_response()
        }
    }

    let (text_tx, text_rx) = mpsc::channel(4);
    let (frame_tx, mut frame_rx) = mpsc::channel(256);

    let params = SpeakParams {
        voice: request.voice.clone(),
        include_phonemes: request.include_phonemes,
        emotion_override: request.emotion.clone(),
        ..Default::default()
    };

    let tts = state.tts.clone();
    let input_text = request.input.clone();
    tokio::spawn(async move {
        let _ = text_tx.send(input_text).await;
    });
    tokio::spawn(async move {
        if let Err(e) = tts.stream(text_rx, params, frame_tx).await {
            tracing::warn!(error = %e, "speech synthesis stream failed");
        }
    });

    if request.include_phonemes {
        // SSE: audio and phoneme events interleaved.
        let stream = async_stream::stream! {
            while let Some(frame) = frame_rx.recv().await {
                let event = match frame {
                    ResponseFrame::Audio { pcm, sample_rate } => serde_json::json!({
                        "type": "audio",
                        "sample_rate": sample_rate,
                        "data": base64_pcm(&pcm),
                    }),
                    ResponseFrame::Phoneme { start_ms, end_ms, phoneme } => serde_json::json!({
                        "type": "phoneme",
                        "start_ms": start_ms,
                        "end_ms": end_ms,
                        "phoneme": phoneme,
                    }),
                    _ => continue,
                };
                yield Ok::<Event, Infallible>(Event::default().data(event.to_string()));
            }
            yield Ok(Event::default().data("[DONE]"));
        };
        return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    }

    let wav = request.response_format == "wav";
    let stream = async_stream::stream! {
        if wav {
            yield Ok::<Vec<u8>, Infallible>(wav_stream_header(
                cortex_config::constants::gateway::TTS_OUT_SAMPLE_RATE,
            ));
        }
        while let Some(frame) = frame_rx.recv().await {
            if let ResponseFrame::Audio { pcm, .. } = frame {
                yield Ok(pcm_bytes(&pcm));
            }
        }
    };

    let content_type = if wav { "audio/wav" } else { "audio/pcm" };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn pcm_bytes(pcm: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for sample in pcm {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

fn base64_pcm(pcm: &[i16]) -> String {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    BASE64.encode(pcm_bytes(pcm))
}

/// Streaming WAV header with unknown length markers
fn wav_stream_header(sample_rate: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&u32::MAX.to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&1u16.to_le_bytes()); // mono
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    header.extend_from_slice(&2u16.to_le_bytes());
    header.extend_from_slice(&16u16.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&u32::MAX.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_44_bytes() {
        let header = wav_stream_header(22_050);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
    }

    #[test]
    fn pcm_bytes_are_little_endian() {
        let bytes = pcm_bytes(&[1, -1]);
        assert_eq!(bytes, vec![1, 0, 255, 255]);
    }

    #[test]
    fn chat_request_parses_extension_fields() {
        let json = r#"{
            "model": "atlas-cortex",
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true,
            "satellite_id": "sat-1",
            "area": "kitchen"
        }"#;
        let request: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.area.as_deref(), Some("kitchen"));
        assert_eq!(request.stream, Some(true));
    }
}
