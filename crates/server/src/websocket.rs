//! Satellite WebSocket transport
//!
//! Adapts the gateway session protocol onto a WebSocket: JSON frames in
//! and out, with the session state machine enforcing legality. Responses
//! flow back as PLAY_FILLER plus synthesized TTS frames; a heartbeat
//! lapse closes the session.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use cortex_core::ResponseFrame;
use cortex_gateway::{
    MicReport, SatelliteFrameIn, SatelliteFrameOut, SatelliteSession, SpatialSignals,
};
use cortex_pipeline::{RequestInput, TransportKind};
use cortex_speech::SpeakParams;

use crate::state::AppState;

pub async fn satellite_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let mut session = SatelliteSession::new(
        session_id.clone(),
        state.settings.gateway.heartbeat_timeout_secs,
    );
    let (mut sink, mut stream) = socket.split();
    let mut audio_buffer: Vec<i16> = Vec::new();
    let mut heartbeat_check =
        tokio::time::interval(std::time::Duration::from_secs(5));

    tracing::info!(session = %session_id, "satellite connected");

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(Ok(message)) = message else { break };
                let Message::Text(text) = message else { continue };
                let frame: SatelliteFrameIn = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(error = %e, "malformed satellite frame");
                        continue;
                    }
                };

                if let Err(e) = session.on_frame(&frame) {
                    tracing::warn!(session = %session_id, error = %e, "frame rejected");
                    continue;
                }

                match frame {
                    SatelliteFrameIn::Announce { satellite_id, area, .. } => {
                        if let Some(area) = &area {
                            state.spatial.map_satellite(&satellite_id, area);
                        }
                        let accepted = SatelliteFrameOut::Accepted {
                            session_id: session_id.clone(),
                            heartbeat_interval_secs: state
                                .settings
                                .gateway
                                .heartbeat_timeout_secs
                                / 2,
                        };
                        if send_frame(&mut sink, &accepted).await.is_err() {
                            break;
                        }
                        let config = SatelliteFrameOut::Config {
                            tts_sample_rate:
                                cortex_config::constants::gateway::TTS_OUT_SAMPLE_RATE,
                            heartbeat_interval_secs: state
                                .settings
                                .gateway
                                .heartbeat_timeout_secs
                                / 2,
                        };
                        if send_frame(&mut sink, &config).await.is_err() {
                            break;
                        }
                        // Push the filler cache so PLAY_FILLER ids resolve
                        // locally.
                        let phrases = default_filler_cache();
                        if send_frame(&mut sink, &SatelliteFrameOut::SyncFillers { phrases })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    SatelliteFrameIn::AudioStart { .. } => {
                        audio_buffer.clear();
                    }
                    SatelliteFrameIn::AudioChunk { data } => {
                        if let Ok(bytes) = BASE64.decode(data) {
                            audio_buffer.extend(
                                bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])),
                            );
                        }
                    }
                    SatelliteFrameIn::AudioEnd => {
                        let transcript = state.transcriber.transcribe(&audio_buffer).await;
                        audio_buffer.clear();
                        if transcript.trim().is_empty() {
                            continue;
                        }
                        if respond(&state, &mut session, &mut sink, transcript).await.is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
            }

            _ = heartbeat_check.tick() => {
                if session.heartbeat_expired(chrono::Utc::now()) {
                    tracing::info!(session = %session_id, "heartbeat lapsed, closing");
                    break;
                }
            }
        }
    }

    session.close();
    tracing::info!(session = %session_id, "satellite disconnected");
}

type WsSink = futures::stream::SplitSink<WebSocket, Message>;

async fn send_frame(sink: &mut WsSink, frame: &SatelliteFrameOut) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).unwrap_or_default();
    sink.send(Message::Text(json)).await
}

/// Run a transcript through the pipeline and stream speech back
async fn respond(
    state: &AppState,
    session: &mut SatelliteSession,
    sink: &mut WsSink,
    transcript: String,
) -> Result<(), axum::Error> {
    let signals = SpatialSignals {
        satellite_id: session.satellite_id.clone(),
        mic_reports: session
            .satellite_id
            .iter()
            .map(|id| MicReport {
                satellite_id: id.clone(),
                snr_db: session.wake_snr_db.unwrap_or(0.0),
            })
            .collect(),
        speaker_id: None,
    };
    let area = state.spatial.resolve(&signals).map(|r| r.area);

    let input = RequestInput {
        request_id: uuid::Uuid::new_v4().to_string(),
        conversation_id: format!("sat-{}", session.satellite_id.as_deref().unwrap_or("unknown")),
        message: transcript,
        session_user: None,
        voice_embedding: None,
        speaker_id: None,
        area,
        transport: TransportKind::Voice,
        thinking: false,
    };

    let mut frames = state.driver.handle(input);
    let mut response_text = String::new();

    while let Some(frame) = frames.recv().await {
        match frame {
            ResponseFrame::Filler(text) | ResponseFrame::ContinuationFiller(text) => {
                // Cover the latency with a locally cached phrase.
                let phrase_id = filler_phrase_id(&text);
                send_frame(sink, &SatelliteFrameOut::PlayFiller { phrase_id }).await?;
            }
            ResponseFrame::Token(text) => response_text.push_str(&text),
            ResponseFrame::Final { .. } => break,
            _ => {}
        }
    }

    if response_text.is_empty() {
        return Ok(());
    }

    // Synthesize the final text sentence by sentence.
    if session.start_speaking().is_err() {
        return Ok(());
    }
    send_frame(
        sink,
        &SatelliteFrameOut::TtsStart {
            sample_rate: cortex_config::constants::gateway::TTS_OUT_SAMPLE_RATE,
        },
    )
    .await?;

    let (text_tx, text_rx) = mpsc::channel(4);
    let (audio_tx, mut audio_rx) = mpsc::channel(256);
    let tts = Arc::clone(&state.tts);
    tokio::spawn(async move {
        let _ = text_tx.send(response_text).await;
    });
    tokio::spawn(async move {
        if let Err(e) = tts.stream(text_rx, SpeakParams::default(), audio_tx).await {
            tracing::warn!(error = %e, "satellite synthesis failed");
        }
    });

    while let Some(frame) = audio_rx.recv().await {
        if let ResponseFrame::Audio { pcm, .. } = frame {
            let mut bytes = Vec::with_capacity(pcm.len() * 2);
            for sample in pcm.iter() {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            send_frame(sink, &SatelliteFrameOut::TtsChunk { data: BASE64.encode(bytes) })
                .await?;
        }
    }

    send_frame(sink, &SatelliteFrameOut::TtsEnd).await?;
    let _ = session.stop_speaking();
    Ok(())
}

/// Filler phrases satellites cache locally
fn default_filler_cache() -> Vec<cortex_gateway::FillerPhraseSync> {
    [
        "Hmm — ", "Let me think... ", "Good question. ", "One moment — ", "Alright, ",
        "Okay, ", "…and continuing with that… ", "Bear with me… ", "There's more — ",
    ]
    .iter()
    .map(|text| cortex_gateway::FillerPhraseSync {
        phrase_id: filler_phrase_id(text),
        text: text.to_string(),
    })
    .collect()
}

/// Stable id for a filler phrase in the satellite's local cache
fn filler_phrase_id(text: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.trim().to_lowercase().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("filler-{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filler_ids_are_stable_and_distinct() {
        assert_eq!(filler_phrase_id("Hmm — "), filler_phrase_id("hmm —"));
        assert_ne!(filler_phrase_id("Hmm — "), filler_phrase_id("Let me think..."));
    }
}
