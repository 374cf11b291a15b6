use super::config::{PlaybackTarget, SessionConfig};
use super::state::{CallStats, ConnectionStatus, SessionEvent, TranscriptEntry};
use crate::api::{ApiClient, LiveSession};
use crate::audio::{
    CaptureBackendFactory, CaptureGate, CapturePipeline, ControlFlags, DiscardOutput,
    PlaybackHandle, PlaybackOutput, PlaybackQueue, RodioOutput,
};
use crate::error::{CallError, MediaError};
use crate::transport::{ChannelEvent, InboundEnvelope, OutboundEnvelope, TransportChannel};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A live voice call against the service.
///
/// One session can run many calls, one at a time: `start` negotiates a
/// session, opens the voice channel, and wires capture and playback; `stop`
/// hangs up and releases everything. All observable state survives until the
/// next `start`.
pub struct CallSession {
    config: SessionConfig,
    api: ApiClient,
    inner: Arc<SessionInner>,
}

/// State shared between the session owner and the background tasks.
struct SessionInner {
    status: Mutex<ConnectionStatus>,
    last_error: Mutex<Option<String>>,
    transcripts: Mutex<Vec<TranscriptEntry>>,
    controls: Arc<ControlFlags>,
    remote_speaking: Arc<AtomicBool>,
    chunks_sent: Arc<AtomicUsize>,
    chunks_gated: Arc<AtomicUsize>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<SessionEvent>,
    active: Mutex<Option<ActiveCall>>,
}

/// Everything a live call owns. Dropped as a unit through [`release_call`].
struct ActiveCall {
    session: LiveSession,
    channel: TransportChannel,
    capture: CapturePipeline,
    playback: PlaybackHandle,
    dispatcher: JoinHandle<()>,
}

/// Why a call ended without a local `stop`.
enum CallOutcome {
    RemoteHangup,
    ChannelLost { reason: Option<String> },
}

impl CallSession {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        config: SessionConfig,
    ) -> Result<Self, CallError> {
        let api = ApiClient::new(base_url, auth_token)?;
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            config,
            api,
            inner: Arc::new(SessionInner {
                status: Mutex::new(ConnectionStatus::Idle),
                last_error: Mutex::new(None),
                transcripts: Mutex::new(Vec::new()),
                controls: Arc::new(ControlFlags::new()),
                remote_speaking: Arc::new(AtomicBool::new(false)),
                chunks_sent: Arc::new(AtomicUsize::new(0)),
                chunks_gated: Arc::new(AtomicUsize::new(0)),
                started_at: Mutex::new(None),
                ended_at: Mutex::new(None),
                events,
                active: Mutex::new(None),
            }),
        })
    }

    /// Negotiate a session and bring the call live.
    ///
    /// Already connecting or live: logged no-op. On any failure the session
    /// lands in [`ConnectionStatus::Error`] with the cause recorded, and the
    /// error is also returned. A `stop` racing the connect wins; `start`
    /// then returns `Ok` with everything released.
    pub async fn start(&self) -> Result<(), CallError> {
        {
            let mut status = self.inner.status.lock().await;
            match *status {
                ConnectionStatus::Connecting | ConnectionStatus::Live => {
                    warn!("start ignored; call already {}", *status);
                    return Ok(());
                }
                _ => *status = ConnectionStatus::Connecting,
            }
        }
        self.inner.reset_for_start().await;
        self.inner.emit(SessionEvent::Status(ConnectionStatus::Connecting));
        info!("starting call");

        let session = match self.api.create_live_session(&self.config.to_request()).await {
            Ok(session) => session,
            Err(e) => {
                self.inner.fail(e.to_string()).await;
                return Err(e.into());
            }
        };
        debug!(session_id = %session.session_id, "live session negotiated");

        if !self.inner.still_connecting().await {
            info!("call stopped during negotiation");
            return Ok(());
        }

        let url = match self.api.channel_url(&session) {
            Ok(url) => url,
            Err(e) => {
                self.inner.fail(e.to_string()).await;
                return Err(e.into());
            }
        };

        let (mut channel, events) = match TransportChannel::open(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                self.inner.fail(e.to_string()).await;
                return Err(e.into());
            }
        };

        let output: Box<dyn PlaybackOutput> = match self.config.playback {
            PlaybackTarget::Speaker => {
                // Opening the output device can block on the audio host.
                match tokio::task::spawn_blocking(RodioOutput::new).await {
                    Ok(Ok(output)) => Box::new(output),
                    Ok(Err(e)) => {
                        channel.close().await;
                        self.inner.fail(e.to_string()).await;
                        return Err(CallError::Media(e));
                    }
                    Err(e) => {
                        channel.close().await;
                        let e = MediaError::OutputDevice(format!("output setup failed: {e}"));
                        self.inner.fail(e.to_string()).await;
                        return Err(CallError::Media(e));
                    }
                }
            }
            PlaybackTarget::Discard => Box::new(DiscardOutput),
        };

        let mut playback = PlaybackHandle::spawn(
            output,
            Arc::clone(&self.inner.controls),
            Arc::clone(&self.inner.remote_speaking),
        );

        let gate = CaptureGate::new(
            Arc::clone(&self.inner.controls),
            Arc::clone(&self.inner.remote_speaking),
        );
        let backend = match CaptureBackendFactory::create(
            &self.config.source,
            self.config.capture_config(),
        ) {
            Ok(backend) => backend,
            Err(e) => {
                playback.shutdown().await;
                channel.close().await;
                self.inner.fail(e.to_string()).await;
                return Err(CallError::Media(e));
            }
        };
        let capture = match CapturePipeline::start(
            backend,
            self.config.capture_config(),
            self.config.chunk_duration_ms,
            gate,
            channel.sender(),
            Arc::clone(&self.inner.chunks_sent),
            Arc::clone(&self.inner.chunks_gated),
        )
        .await
        {
            Ok(capture) => capture,
            Err(e) => {
                playback.shutdown().await;
                channel.close().await;
                self.inner.fail(e.to_string()).await;
                return Err(CallError::Media(e));
            }
        };

        let dispatcher = tokio::spawn(dispatch_events(
            Arc::clone(&self.inner),
            events,
            playback.queue(),
        ));

        let call = ActiveCall {
            session,
            channel,
            capture,
            playback,
            dispatcher,
        };

        // Commit the call only if nothing settled the session meanwhile.
        {
            let mut active = self.inner.active.lock().await;
            let mut status = self.inner.status.lock().await;
            if *status != ConnectionStatus::Connecting {
                drop(status);
                drop(active);
                info!("call stopped while connecting; releasing resources");
                release_call(call, true).await;
                return Ok(());
            }
            *status = ConnectionStatus::Live;
            *active = Some(call);
        }
        *self.inner.started_at.lock().await = Some(Utc::now());
        self.inner.emit(SessionEvent::Status(ConnectionStatus::Live));
        info!("call is live");

        Ok(())
    }

    /// Hang up and release the call. Safe to call in any state, any number
    /// of times; always leaves the session idle.
    pub async fn stop(&self) -> CallStats {
        let call = self.inner.active.lock().await.take();

        if let Some(call) = call {
            info!("hanging up");
            call.channel.sender().send(OutboundEnvelope::Hangup);
            release_call(call, true).await;
            *self.inner.ended_at.lock().await = Some(Utc::now());
        }

        self.inner.set_status(ConnectionStatus::Idle).await;
        self.inner.controls.reset();
        self.inner.remote_speaking.store(false, Ordering::SeqCst);

        self.stats().await
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock().await
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().await.clone()
    }

    pub async fn transcripts(&self) -> Vec<TranscriptEntry> {
        self.inner.transcripts.lock().await.clone()
    }

    /// Service-assigned id of the running call, if one is live.
    pub async fn session_id(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|call| call.session.session_id.clone())
    }

    pub async fn stats(&self) -> CallStats {
        let status = *self.inner.status.lock().await;
        let started_at = *self.inner.started_at.lock().await;
        let ended_at = *self.inner.ended_at.lock().await;

        let duration_secs = match started_at {
            Some(start) => {
                let end = ended_at.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        };

        CallStats {
            status,
            started_at,
            duration_secs,
            transcript_count: self.inner.transcripts.lock().await.len(),
            chunks_sent: self.inner.chunks_sent.load(Ordering::SeqCst),
            chunks_gated: self.inner.chunks_gated.load(Ordering::SeqCst),
        }
    }

    /// Live notifications. Subscribe before `start` to observe every event.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.controls.set_muted(muted);
        debug!(muted, "microphone mute changed");
    }

    pub fn is_muted(&self) -> bool {
        self.inner.controls.is_muted()
    }

    pub fn set_mic_active(&self, active: bool) {
        self.inner.controls.set_mic_active(active);
        debug!(active, "microphone activation changed");
    }

    pub fn is_mic_active(&self) -> bool {
        self.inner.controls.is_mic_active()
    }

    /// Enable or disable remote playback. Disabling drops everything queued
    /// and cancels the buffer being rendered.
    pub async fn set_speaker_enabled(&self, enabled: bool) {
        self.inner.controls.set_speaker_enabled(enabled);
        debug!(enabled, "speaker changed");

        if !enabled {
            if let Some(call) = self.inner.active.lock().await.as_ref() {
                call.playback.clear();
            }
            self.inner.remote_speaking.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_speaker_enabled(&self) -> bool {
        self.inner.controls.is_speaker_enabled()
    }

    /// True while remote audio is queued or rendering.
    pub fn assistant_speaking(&self) -> bool {
        self.inner.remote_speaking.load(Ordering::SeqCst)
    }
}

impl SessionInner {
    async fn still_connecting(&self) -> bool {
        *self.status.lock().await == ConnectionStatus::Connecting
    }

    /// Clear out everything the previous call left behind. Control flags are
    /// kept; changes made while idle carry into the next call.
    async fn reset_for_start(&self) {
        *self.last_error.lock().await = None;
        self.transcripts.lock().await.clear();
        *self.started_at.lock().await = None;
        *self.ended_at.lock().await = None;
        self.chunks_sent.store(0, Ordering::SeqCst);
        self.chunks_gated.store(0, Ordering::SeqCst);
        self.remote_speaking.store(false, Ordering::SeqCst);
    }

    async fn set_status(&self, status: ConnectionStatus) -> bool {
        {
            let mut current = self.status.lock().await;
            if *current == status {
                return false;
            }
            *current = status;
        }
        self.emit(SessionEvent::Status(status));
        true
    }

    /// Record a failure and land in the error state.
    async fn fail(&self, message: String) {
        warn!("call failed: {}", message);
        *self.last_error.lock().await = Some(message);
        self.set_status(ConnectionStatus::Error).await;
    }

    /// Record a service-reported problem without changing state.
    async fn record_service_error(&self, message: String) {
        *self.last_error.lock().await = Some(message.clone());
        self.emit(SessionEvent::ServiceError(message));
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

/// Route channel events into session state until the channel closes.
async fn dispatch_events(
    inner: Arc<SessionInner>,
    mut events: mpsc::Receiver<ChannelEvent>,
    playback: PlaybackQueue,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Message(envelope) => match envelope {
                InboundEnvelope::Connected => debug!("service confirmed the channel"),
                InboundEnvelope::Transcript {
                    role,
                    text,
                    message_id,
                } => {
                    let entry = TranscriptEntry::from_wire(role.as_deref(), text, message_id);
                    debug!(role = %entry.role, "transcript: {}", entry.text);
                    inner.transcripts.lock().await.push(entry.clone());
                    inner.emit(SessionEvent::Transcript(entry));
                }
                InboundEnvelope::AudioChunk { data, .. } => playback.enqueue(data),
                InboundEnvelope::Warning { message } => {
                    let message = message.unwrap_or_else(|| "call warning".to_string());
                    warn!("service warning: {}", message);
                    inner.record_service_error(message).await;
                }
                InboundEnvelope::Error { message } => {
                    let message = message.unwrap_or_else(|| "call failed".to_string());
                    warn!("service error: {}", message);
                    inner.record_service_error(message).await;
                }
                InboundEnvelope::Ended => {
                    finish(&inner, CallOutcome::RemoteHangup).await;
                    break;
                }
                InboundEnvelope::Unknown => trace!("ignoring unknown envelope"),
            },
            ChannelEvent::Closed { reason } => {
                finish(&inner, CallOutcome::ChannelLost { reason }).await;
                break;
            }
        }
    }
    trace!("event dispatcher finished");
}

/// Settle the session after the service ended the call or the channel died.
///
/// Runs on the dispatcher task, so the dispatcher is never joined from here.
/// When the call has not committed yet (a `start` still in flight), only the
/// status flips; the pending `start` notices and releases what it built.
async fn finish(inner: &Arc<SessionInner>, outcome: CallOutcome) {
    let call = inner.active.lock().await.take();

    let call = match call {
        Some(call) => call,
        None => {
            // The call never committed. Either a local stop already settled
            // everything, or a start is still in flight; flip the status
            // under its lock so the pending commit check observes it and
            // releases what it built.
            let next = {
                let mut status = inner.status.lock().await;
                if *status != ConnectionStatus::Connecting {
                    return;
                }
                let next = match outcome {
                    CallOutcome::RemoteHangup => ConnectionStatus::Idle,
                    CallOutcome::ChannelLost { .. } => ConnectionStatus::Error,
                };
                *status = next;
                next
            };
            record_outcome(inner, &outcome).await;
            inner.emit(SessionEvent::Status(next));
            return;
        }
    };

    release_call(call, false).await;
    *inner.ended_at.lock().await = Some(Utc::now());
    inner.controls.reset();
    inner.remote_speaking.store(false, Ordering::SeqCst);

    record_outcome(inner, &outcome).await;
    let next = match outcome {
        CallOutcome::RemoteHangup => ConnectionStatus::Idle,
        CallOutcome::ChannelLost { .. } => ConnectionStatus::Error,
    };
    inner.set_status(next).await;
}

async fn record_outcome(inner: &SessionInner, outcome: &CallOutcome) {
    match outcome {
        CallOutcome::RemoteHangup => info!("call ended by the service"),
        CallOutcome::ChannelLost { reason } => {
            let message = match reason {
                Some(reason) => format!("voice channel lost: {reason}"),
                None => "voice channel closed unexpectedly".to_string(),
            };
            warn!("{}", message);
            *inner.last_error.lock().await = Some(message);
        }
    }
}

/// Tear down every half of a call: capture first so nothing new is queued,
/// then playback, then the channel.
async fn release_call(mut call: ActiveCall, join_dispatcher: bool) {
    if let Err(e) = call.capture.stop().await {
        warn!("capture shutdown failed: {}", e);
    }
    call.playback.shutdown().await;
    call.channel.close().await;

    if join_dispatcher {
        let _ = call.dispatcher.await;
    }
    debug!("call resources released");
}
