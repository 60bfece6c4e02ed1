//! Response frame alphabet
//!
//! Every user-visible output is a lazy, finite, non-restartable sequence of
//! frames terminated by exactly one `Final`. Chat, speech, and the satellite
//! gateway all consume this shape; transports adapt it to their wire format.

use std::sync::Arc;

/// Which layer produced the terminal response
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedLayer {
    /// Layer 1 deterministic answer
    Instant,
    /// Layer 2 pattern-matched action
    Action,
    /// Layer 3 generative model
    Llm,
    /// Guardrail block replaced the response
    Blocked,
}

impl MatchedLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedLayer::Instant => "instant",
            MatchedLayer::Action => "action",
            MatchedLayer::Llm => "llm",
            MatchedLayer::Blocked => "blocked",
        }
    }
}

/// One frame of a response stream
#[derive(Debug, Clone)]
pub enum ResponseFrame {
    /// Model or synthesized text token
    Token(String),
    /// Latency-masking filler phrase, streamed before the first model token
    Filler(String),
    /// Filler covering an overflow continuation
    ContinuationFiller(String),
    /// Synthesized audio chunk
    Audio {
        pcm: Arc<[i16]>,
        sample_rate: u32,
    },
    /// Timed phoneme for lip-sync
    Phoneme {
        start_ms: u32,
        end_ms: u32,
        phoneme: String,
    },
    /// Terminal frame; exactly one per request
    Final {
        layer: MatchedLayer,
    },
}

impl ResponseFrame {
    /// Text carried by this frame, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            ResponseFrame::Token(t)
            | ResponseFrame::Filler(t)
            | ResponseFrame::ContinuationFiller(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ResponseFrame::Final { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_text_extraction() {
        assert_eq!(ResponseFrame::Token("hi".into()).text(), Some("hi"));
        assert_eq!(ResponseFrame::Filler("hmm".into()).text(), Some("hmm"));
        assert!(ResponseFrame::Final { layer: MatchedLayer::Llm }.text().is_none());
    }

    #[test]
    fn matched_layer_names() {
        assert_eq!(MatchedLayer::Instant.as_str(), "instant");
        assert_eq!(MatchedLayer::Blocked.as_str(), "blocked");
    }
}
