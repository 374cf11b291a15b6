pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use api::{ApiClient, LiveSession, LiveSessionRequest};
pub use audio::{
    AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig, CapturePipeline,
    CaptureSource, ControlFlags, PlaybackBuffer, PlaybackHandle, PlaybackOutput,
};
pub use config::Config;
pub use error::{CallError, DecodeError, MediaError, NegotiationError, TransportError};
pub use session::{
    CallSession, CallStats, ConnectionStatus, PlaybackTarget, SessionConfig, SessionEvent,
    SpeakerRole, TranscriptEntry,
};
pub use transport::{ChannelEvent, ChannelSender, InboundEnvelope, OutboundEnvelope, TransportChannel};
