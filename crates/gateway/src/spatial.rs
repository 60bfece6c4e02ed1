//! Spatial resolution
//!
//! Resolves the area a voice request came from using four signal sources
//! in precedence order: the satellite-to-area mapping, presence sensors,
//! multi-mic proximity (highest SNR among satellites hearing the same
//! utterance), and speaker-identity correlation. Confidence is the
//! weighted agreement of the active signals. An unresolved area is
//! permitted; commands that need one then ask the user.

use dashmap::DashMap;

/// One satellite's report of the utterance
#[derive(Debug, Clone)]
pub struct MicReport {
    pub satellite_id: String,
    pub snr_db: f32,
}

/// Signals available for one request
#[derive(Debug, Clone, Default)]
pub struct SpatialSignals {
    /// The satellite the request arrived through
    pub satellite_id: Option<String>,
    /// All satellites that heard the same utterance
    pub mic_reports: Vec<MicReport>,
    /// Resolved speaker, for habitual-area correlation
    pub speaker_id: Option<String>,
}

/// A resolved area with its agreement confidence
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArea {
    pub area: String,
    pub confidence: f32,
}

/// Signal weights, in precedence order
const WEIGHT_SATELLITE: f32 = 0.5;
const WEIGHT_PRESENCE: f32 = 0.2;
const WEIGHT_MIC: f32 = 0.2;
const WEIGHT_SPEAKER: f32 = 0.1;

/// Area resolver over live mappings
pub struct SpatialResolver {
    /// satellite id → area
    satellite_areas: DashMap<String, String>,
    /// area → occupied
    presence: DashMap<String, bool>,
    /// user id → habitual area
    speaker_affinity: DashMap<String, String>,
}

impl SpatialResolver {
    pub fn new() -> Self {
        Self {
            satellite_areas: DashMap::new(),
            presence: DashMap::new(),
            speaker_affinity: DashMap::new(),
        }
    }

    pub fn map_satellite(&self, satellite_id: impl Into<String>, area: impl Into<String>) {
        self.satellite_areas.insert(satellite_id.into(), area.into());
    }

    pub fn set_presence(&self, area: impl Into<String>, occupied: bool) {
        self.presence.insert(area.into(), occupied);
    }

    pub fn note_speaker_area(&self, user_id: impl Into<String>, area: impl Into<String>) {
        self.speaker_affinity.insert(user_id.into(), area.into());
    }

    /// Resolve an area. `None` when no signal yields a candidate.
    pub fn resolve(&self, signals: &SpatialSignals) -> Option<ResolvedArea> {
        // Candidate areas from each source, precedence order.
        let from_satellite = signals
            .satellite_id
            .as_ref()
            .and_then(|s| self.satellite_areas.get(s).map(|a| a.clone()));

        let from_mics = signals
            .mic_reports
            .iter()
            .max_by(|a, b| a.snr_db.partial_cmp(&b.snr_db).unwrap_or(std::cmp::Ordering::Equal))
            .and_then(|best| self.satellite_areas.get(&best.satellite_id).map(|a| a.clone()));

        let from_speaker = signals
            .speaker_id
            .as_ref()
            .and_then(|u| self.speaker_affinity.get(u).map(|a| a.clone()));

        // Highest-precedence candidate wins.
        let candidate = from_satellite
            .clone()
            .or_else(|| from_mics.clone())
            .or_else(|| from_speaker.clone())?;

        let presence_agrees = self.presence.get(&candidate).map(|p| *p);

        // Confidence: weighted agreement of the signals that are active.
        let mut active_weight = 0.0f32;
        let mut agreeing_weight = 0.0f32;

        if let Some(area) = &from_satellite {
            active_weight += WEIGHT_SATELLITE;
            if *area == candidate {
                agreeing_weight += WEIGHT_SATELLITE;
            }
        }
        if let Some(occupied) = presence_agrees {
            active_weight += WEIGHT_PRESENCE;
            if occupied {
                agreeing_weight += WEIGHT_PRESENCE;
            }
        }
        if let Some(area) = &from_mics {
            active_weight += WEIGHT_MIC;
            if *area == candidate {
                agreeing_weight += WEIGHT_MIC;
            }
        }
        if let Some(area) = &from_speaker {
            active_weight += WEIGHT_SPEAKER;
            if *area == candidate {
                agreeing_weight += WEIGHT_SPEAKER;
            }
        }

        if active_weight == 0.0 {
            return None;
        }

        Some(ResolvedArea { area: candidate, confidence: agreeing_weight / active_weight })
    }
}

impl Default for SpatialResolver {
    fn default() -> Self {
        Self::new()
    }
}
