use crate::api::LiveSessionRequest;
use crate::audio::{CaptureConfig, CaptureSource};

/// Where decoded remote audio goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackTarget {
    /// Render through the default output device
    #[default]
    Speaker,
    /// Decode and drop. For headless runs and tests.
    Discard,
}

/// Configuration for a call session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Agent the service should route the call to
    pub agent_id: Option<u64>,
    /// Caller name forwarded to the service
    pub caller_name: Option<String>,
    /// Caller number forwarded to the service
    pub caller_number: Option<String>,
    /// Conversation language hint
    pub language: Option<String>,
    /// Sample rate outbound audio is normalized to
    pub sample_rate: u32,
    /// Channel count outbound audio is normalized to
    pub channels: u16,
    /// Duration of each outbound audio chunk in milliseconds
    pub chunk_duration_ms: u64,
    /// Where captured audio comes from
    pub source: CaptureSource,
    /// Where remote audio goes
    pub playback: PlaybackTarget,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            caller_name: None,
            caller_number: None,
            language: None,
            sample_rate: 16_000,
            channels: 1,
            chunk_duration_ms: 300,
            source: CaptureSource::Microphone,
            playback: PlaybackTarget::Speaker,
        }
    }
}

impl SessionConfig {
    pub(crate) fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_sample_rate: self.sample_rate,
            target_channels: self.channels,
            frame_duration_ms: 100,
        }
    }

    pub(crate) fn to_request(&self) -> LiveSessionRequest {
        LiveSessionRequest {
            agent_id: self.agent_id,
            caller_name: self.caller_name.clone(),
            caller_number: self.caller_number.clone(),
            language: self.language.clone(),
        }
    }
}
