use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No call in progress
    Idle,
    /// Negotiating the session and opening the voice channel
    Connecting,
    /// Audio flowing both ways
    Live,
    /// The call failed; inspect the last error
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Live => "live",
            ConnectionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Assistant,
    User,
}

impl SpeakerRole {
    /// Unknown or missing roles are attributed to the assistant.
    pub fn from_wire(role: Option<&str>) -> Self {
        match role {
            Some("user") => SpeakerRole::User,
            _ => SpeakerRole::Assistant,
        }
    }
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerRole::Assistant => write!(f, "assistant"),
            SpeakerRole::User => write!(f, "user"),
        }
    }
}

/// One transcript line received during a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Service-assigned message id, or a locally generated one
    pub id: String,
    pub role: SpeakerRole,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn from_wire(role: Option<&str>, text: String, message_id: Option<String>) -> Self {
        Self {
            id: message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            role: SpeakerRole::from_wire(role),
            text,
            received_at: Utc::now(),
        }
    }
}

/// Point-in-time summary of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStats {
    pub status: ConnectionStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds from going live until the call ended (or now, while live)
    pub duration_secs: f64,
    pub transcript_count: usize,
    pub chunks_sent: usize,
    pub chunks_gated: usize,
}

/// Notifications pushed to observers while a call runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new status
    Status(ConnectionStatus),
    /// A transcript line arrived
    Transcript(TranscriptEntry),
    /// The service reported a problem without ending the call
    ServiceError(String),
}
