//! Satellite session state machine
//!
//! `Connecting → Announced → Idle ↔ Listening ↔ Speaking`, with
//! `Interrupted` as a transient from `Speaking` back to `Idle`. Illegal
//! transitions are rejected, and a missed heartbeat window closes the
//! session.

use chrono::{DateTime, Duration, Utc};

use crate::frames::SatelliteFrameIn;
use crate::GatewayError;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Announced,
    Idle,
    Listening,
    Speaking,
    /// Transient: user barged in while speaking
    Interrupted,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Announced => "announced",
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Speaking => "speaking",
            SessionState::Interrupted => "interrupted",
            SessionState::Closed => "closed",
        }
    }
}

/// One connected satellite
#[derive(Debug, Clone)]
pub struct SatelliteSession {
    pub session_id: String,
    pub satellite_id: Option<String>,
    /// Provisioned area from ANNOUNCE, input to spatial resolution
    pub area_hint: Option<String>,
    state: SessionState,
    last_heartbeat: DateTime<Utc>,
    heartbeat_timeout: Duration,
    /// SNR of the current wake event, for multi-mic arbitration
    pub wake_snr_db: Option<f32>,
}

impl SatelliteSession {
    pub fn new(session_id: impl Into<String>, heartbeat_timeout_secs: u64) -> Self {
        Self {
            session_id: session_id.into(),
            satellite_id: None,
            area_hint: None,
            state: SessionState::Connecting,
            last_heartbeat: Utc::now(),
            heartbeat_timeout: Duration::seconds(heartbeat_timeout_secs as i64),
            wake_snr_db: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Apply an incoming frame to the state machine
    pub fn on_frame(&mut self, frame: &SatelliteFrameIn) -> Result<(), GatewayError> {
        self.last_heartbeat = Utc::now();
        match (self.state, frame) {
            (SessionState::Connecting, SatelliteFrameIn::Announce { satellite_id, area, .. }) => {
                self.satellite_id = Some(satellite_id.clone());
                self.area_hint = area.clone();
                self.transition(SessionState::Announced)
            }
            (SessionState::Announced, _) => {
                // First post-announce frame settles into the idle loop.
                self.transition(SessionState::Idle)?;
                self.on_frame(frame)
            }
            (SessionState::Idle, SatelliteFrameIn::Wake { snr_db }) => {
                self.wake_snr_db = Some(*snr_db);
                Ok(())
            }
            (SessionState::Idle, SatelliteFrameIn::AudioStart { .. }) => {
                self.transition(SessionState::Listening)
            }
            (SessionState::Listening, SatelliteFrameIn::AudioChunk { .. }) => Ok(()),
            (SessionState::Listening, SatelliteFrameIn::AudioEnd) => {
                self.transition(SessionState::Idle)
            }
            // Barge-in: audio starts while the satellite is speaking.
            (SessionState::Speaking, SatelliteFrameIn::AudioStart { .. }) => {
                self.transition(SessionState::Interrupted)?;
                self.transition(SessionState::Idle)?;
                self.transition(SessionState::Listening)
            }
            (_, SatelliteFrameIn::Heartbeat) => Ok(()),
            (_, SatelliteFrameIn::Status { .. }) => Ok(()),
            (state, frame) => Err(GatewayError::IllegalTransition(
                state.as_str().to_string(),
                format!("{:?}", frame),
            )),
        }
    }

    /// Speech playback is starting
    pub fn start_speaking(&mut self) -> Result<(), GatewayError> {
        match self.state {
            SessionState::Idle => self.transition(SessionState::Speaking),
            other => Err(GatewayError::IllegalTransition(
                other.as_str().to_string(),
                "speaking".to_string(),
            )),
        }
    }

    /// Speech playback finished
    pub fn stop_speaking(&mut self) -> Result<(), GatewayError> {
        match self.state {
            SessionState::Speaking => self.transition(SessionState::Idle),
            // Already bounced through Interrupted.
            SessionState::Idle | SessionState::Listening => Ok(()),
            other => Err(GatewayError::IllegalTransition(
                other.as_str().to_string(),
                "idle".to_string(),
            )),
        }
    }

    /// Has the heartbeat window lapsed?
    pub fn heartbeat_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat > self.heartbeat_timeout
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn transition(&mut self, next: SessionState) -> Result<(), GatewayError> {
        tracing::trace!(
            session = %self.session_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "satellite session transition"
        );
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announced() -> SatelliteSession {
        let mut session = SatelliteSession::new("s1", 30);
        session
            .on_frame(&SatelliteFrameIn::Announce {
                satellite_id: "sat-kitchen".to_string(),
                firmware: "1.0".to_string(),
                area: Some("kitchen".to_string()),
            })
            .unwrap();
        session
    }

    #[test]
    fn announce_then_listen_cycle() {
        let mut session = announced();
        assert_eq!(session.state(), SessionState::Announced);

        session.on_frame(&SatelliteFrameIn::Wake { snr_db: 18.5 }).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.wake_snr_db, Some(18.5));

        session.on_frame(&SatelliteFrameIn::AudioStart { sample_rate: 16_000 }).unwrap();
        assert_eq!(session.state(), SessionState::Listening);

        session
            .on_frame(&SatelliteFrameIn::AudioChunk { data: "AAAA".to_string() })
            .unwrap();
        session.on_frame(&SatelliteFrameIn::AudioEnd).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn audio_before_announce_is_illegal() {
        let mut session = SatelliteSession::new("s1", 30);
        let result = session.on_frame(&SatelliteFrameIn::AudioStart { sample_rate: 16_000 });
        assert!(matches!(result, Err(GatewayError::IllegalTransition(_, _))));
    }

    #[test]
    fn barge_in_interrupts_speaking() {
        let mut session = announced();
        session.on_frame(&SatelliteFrameIn::Heartbeat).unwrap();
        session.start_speaking().unwrap();
        assert_eq!(session.state(), SessionState::Speaking);

        // User starts talking over the response.
        session.on_frame(&SatelliteFrameIn::AudioStart { sample_rate: 16_000 }).unwrap();
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn heartbeat_expiry() {
        let session = announced();
        assert!(!session.heartbeat_expired(Utc::now()));
        assert!(session.heartbeat_expired(Utc::now() + Duration::seconds(31)));
    }

    #[test]
    fn heartbeats_are_legal_in_any_state() {
        let mut session = announced();
        session.on_frame(&SatelliteFrameIn::Heartbeat).unwrap();
        session.start_speaking().unwrap();
        session.on_frame(&SatelliteFrameIn::Heartbeat).unwrap();
        assert_eq!(session.state(), SessionState::Speaking);
    }
}
