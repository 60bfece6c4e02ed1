//! Speech bridge for Atlas Cortex
//!
//! Consumes the response token stream, detects sentence boundaries,
//! composes a provider-appropriate emotion annotation, and synthesises
//! sentence N while sentence N+1 is still being collected. Audio and
//! phoneme frames flow out in strict sentence order.

mod bridge;
mod emotion;
mod splitter;

pub use bridge::{SpeakParams, TtsBridge};
pub use emotion::{EmotionAnnotation, EmotionComposer, NightMode};
pub use splitter::SentenceSplitter;

use thiserror::Error;

/// Speech bridge errors
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("No synthesis provider available")]
    NoProvider,
}

impl From<SpeechError> for cortex_core::Error {
    fn from(err: SpeechError) -> Self {
        cortex_core::Error::Speech(err.to_string())
    }
}
