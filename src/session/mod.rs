pub mod config;
pub mod session;
pub mod state;

pub use config::{PlaybackTarget, SessionConfig};
pub use session::CallSession;
pub use state::{CallStats, ConnectionStatus, SessionEvent, SpeakerRole, TranscriptEntry};
