use serde::{Deserialize, Serialize};

/// Envelope sent to the voice service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEnvelope {
    /// One encoded chunk of local audio. `data` is base64, `file_extension`
    /// names the container (".wav").
    AudioChunk { data: String, file_extension: String },
    /// Best-effort notice that the caller is hanging up.
    Hangup,
}

/// Envelope received from the voice service.
///
/// Unknown envelope types map to [`InboundEnvelope::Unknown`] so the channel
/// can ignore them without failing the call.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    Connected,
    Transcript {
        #[serde(default)]
        role: Option<String>,
        text: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    AudioChunk {
        data: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    Warning {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    Ended,
    #[serde(other)]
    Unknown,
}

/// Parse one inbound text frame. Malformed frames yield `None` and are
/// dropped by the caller.
pub fn parse_inbound(text: &str) -> Option<InboundEnvelope> {
    serde_json::from_str(text).ok()
}
