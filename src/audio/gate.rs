use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// User-facing control flags for a call.
///
/// Mutated only by the explicit setters on the session; read by the capture
/// pipeline and the playback scheduler at every decision point.
#[derive(Debug)]
pub struct ControlFlags {
    muted: AtomicBool,
    mic_active: AtomicBool,
    speaker_enabled: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self {
            muted: AtomicBool::new(false),
            mic_active: AtomicBool::new(true),
            speaker_enabled: AtomicBool::new(true),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn set_mic_active(&self, active: bool) {
        self.mic_active.store(active, Ordering::SeqCst);
    }

    pub fn is_mic_active(&self) -> bool {
        self.mic_active.load(Ordering::SeqCst)
    }

    pub fn set_speaker_enabled(&self, enabled: bool) {
        self.speaker_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_speaker_enabled(&self) -> bool {
        self.speaker_enabled.load(Ordering::SeqCst)
    }

    /// Back to defaults: unmuted, mic active, speaker enabled.
    pub fn reset(&self) {
        self.set_muted(false);
        self.set_mic_active(true);
        self.set_speaker_enabled(true);
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Half-duplex turn arbitration.
///
/// Capture is allowed only while the mic is active, the user is not muted,
/// and the remote party is not audible. No timers or hysteresis; the flags
/// are re-read at every chunk boundary.
#[derive(Clone)]
pub struct CaptureGate {
    controls: Arc<ControlFlags>,
    remote_speaking: Arc<AtomicBool>,
}

impl CaptureGate {
    pub fn new(controls: Arc<ControlFlags>, remote_speaking: Arc<AtomicBool>) -> Self {
        Self {
            controls,
            remote_speaking,
        }
    }

    pub fn allows_capture(&self) -> bool {
        self.controls.is_mic_active()
            && !self.controls.is_muted()
            && !self.remote_speaking.load(Ordering::SeqCst)
    }
}
