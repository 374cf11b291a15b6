pub mod backend;
pub mod capture;
pub mod gate;
pub mod playback;

pub use backend::{
    AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig, CaptureSource, FileBackend,
    MicrophoneBackend,
};
pub use capture::{encode_wav_chunk, normalize_frame, CapturePipeline, ChunkSlicer, WAV_EXTENSION};
pub use gate::{CaptureGate, ControlFlags};
pub use playback::{
    decode_audio_payload, decode_base64_payload, DiscardOutput, PlaybackBuffer, PlaybackHandle,
    PlaybackOutput, PlaybackQueue, RodioOutput,
};
