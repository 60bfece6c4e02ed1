//! Satellite wire frames
//!
//! JSON-tagged frames over the bidirectional streaming transport. Audio
//! payloads are base64 PCM: 16 kHz 16-bit mono in, 22.05 kHz 16-bit mono
//! out unless renegotiated via CONFIG.

use serde::{Deserialize, Serialize};

/// Frames a satellite sends to the core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SatelliteFrameIn {
    /// First frame after connect; identifies the device
    Announce {
        satellite_id: String,
        firmware: String,
        /// Area hint from device provisioning, if any
        area: Option<String>,
    },
    /// Wake word detected on-device
    Wake {
        /// Signal-to-noise ratio of the wake utterance
        snr_db: f32,
    },
    AudioStart {
        sample_rate: u32,
    },
    AudioChunk {
        /// Base64 16-bit little-endian PCM
        data: String,
    },
    AudioEnd,
    Status {
        battery_pct: Option<u8>,
        volume_pct: Option<u8>,
    },
    Heartbeat,
}

/// Frames the core sends to a satellite
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SatelliteFrameOut {
    /// Announce accepted; session is established
    Accepted {
        session_id: String,
        heartbeat_interval_secs: u64,
    },
    TtsStart {
        sample_rate: u32,
    },
    TtsChunk {
        /// Base64 16-bit little-endian PCM
        data: String,
    },
    TtsEnd,
    /// Play a locally cached filler phrase to cover response latency
    PlayFiller {
        phrase_id: String,
    },
    /// Out-of-band device command (volume, LED, mute)
    Command {
        name: String,
        value: serde_json::Value,
    },
    Config {
        tts_sample_rate: u32,
        heartbeat_interval_secs: u64,
    },
    /// Push the current filler phrase cache
    SyncFillers {
        phrases: Vec<FillerPhraseSync>,
    },
}

/// One cached filler phrase entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FillerPhraseSync {
    pub phrase_id: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip_as_tagged_json() {
        let frame = SatelliteFrameIn::Announce {
            satellite_id: "sat-kitchen".to_string(),
            firmware: "1.4.2".to_string(),
            area: Some("kitchen".to_string()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"announce\""));
        let back: SatelliteFrameIn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn audio_chunk_carries_base64() {
        let json = r#"{"type":"audio_chunk","data":"AAAA"}"#;
        let frame: SatelliteFrameIn = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, SatelliteFrameIn::AudioChunk { .. }));
    }

    #[test]
    fn outbound_play_filler_serializes() {
        let frame = SatelliteFrameOut::PlayFiller { phrase_id: "hmm-1".to_string() };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("play_filler"));
    }
}
