//! Profile and identity service for Atlas Cortex
//!
//! Resolves a request to a user profile through the identity chain
//! (session, confident voice match, tentative voice match, anonymous),
//! owns user and emotional profiles, and selects latency-masking filler
//! phrases from per-user pools.

mod emotional;
mod filler;
mod identity;
mod service;
mod user;

pub use emotional::{EmotionalProfile, FillerPhrase};
pub use filler::{FillerSelection, FillerSelector};
pub use identity::{
    EnrolledVoices, IdentityMethod, ResolvedIdentity, VoiceEnrolment, VoiceIdentifier, VoiceMatch,
};
pub use service::{ParentalPolicy, ProfileService, VoiceEnrolmentSummary};
pub use user::{UserProfile, VocabularyLevel};

use thiserror::Error;

/// Profile service errors
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),
}

impl From<ProfileError> for cortex_core::Error {
    fn from(err: ProfileError) -> Self {
        cortex_core::Error::Profile(err.to_string())
    }
}
