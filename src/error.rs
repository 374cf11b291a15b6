use thiserror::Error;

/// Failure while negotiating a live session over HTTP.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("session request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("session request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed session response: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("invalid session address: {0}")]
    Address(String),
}

/// Failure on the WebSocket voice channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("voice channel connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("voice channel closed: {0}")]
    Closed(String),
}

/// Local audio device or source failure.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no capture device available")]
    NoInputDevice,

    #[error("capture device unavailable: {0}")]
    InputDevice(String),

    #[error("audio output unavailable: {0}")]
    OutputDevice(String),

    #[error("unsupported capture sample format: {0}")]
    UnsupportedFormat(String),

    #[error("capture source {path}: {message}")]
    SourceFile { path: String, message: String },
}

/// Failure to decode a single inbound audio payload.
///
/// Never fatal to a call; the offending payload is skipped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unrecognized audio container: {0}")]
    UnrecognizedFormat(symphonia::core::errors::Error),

    #[error("no decodable audio track in payload")]
    NoAudioTrack,

    #[error("unsupported audio codec: {0}")]
    UnsupportedCodec(symphonia::core::errors::Error),

    #[error("malformed audio payload: {0}")]
    Malformed(symphonia::core::errors::Error),

    #[error("audio payload decoded to zero samples")]
    Empty,
}

/// Top-level error returned by session control operations.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Media(#[from] MediaError),
}
