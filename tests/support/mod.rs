// Shared test support: a scriptable stand-in for the voice service.
//
// Covers both halves of the backend: the session negotiation endpoint and
// the websocket voice channel. Tests script the envelopes the channel should
// push and observe everything the client sent back.
#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const SESSION_ID: &str = "mock-session-1";
pub const SESSION_TOKEN: &str = "mock-token";

pub struct MockServiceBuilder {
    script: Vec<Value>,
    close_after_script: bool,
    session_status: StatusCode,
    session_delay: Option<Duration>,
    malformed_sessions: bool,
}

impl MockServiceBuilder {
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            close_after_script: false,
            session_status: StatusCode::OK,
            session_delay: None,
            malformed_sessions: false,
        }
    }

    /// Push one envelope over the channel right after it opens.
    pub fn send(mut self, envelope: Value) -> Self {
        self.script.push(envelope);
        self
    }

    /// Close the channel once the script is sent.
    pub fn close_after_script(mut self) -> Self {
        self.close_after_script = true;
        self
    }

    /// Fail every negotiation request with the given status.
    pub fn reject_sessions(mut self, status: StatusCode) -> Self {
        self.session_status = status;
        self
    }

    /// Hold every negotiation response for a while before answering.
    pub fn delay_sessions(mut self, delay: Duration) -> Self {
        self.session_delay = Some(delay);
        self
    }

    /// Answer negotiations with 200 and a body that is not JSON.
    pub fn malformed_sessions(mut self) -> Self {
        self.malformed_sessions = true;
        self
    }

    pub async fn start(self) -> MockService {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ServiceState {
            script: self.script,
            close_after_script: self.close_after_script,
            session_status: self.session_status,
            session_delay: self.session_delay,
            malformed_sessions: self.malformed_sessions,
            inbound_tx,
            connections: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            authorizations: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/calls/sessions/live", post(create_session))
            .route("/ws/live/mock-session-1", get(open_channel))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock service");
        let addr = listener.local_addr().expect("mock service address");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock service failed");
        });

        MockService {
            base_url: format!("http://{addr}"),
            state,
            inbound_rx,
        }
    }
}

struct ServiceState {
    script: Vec<Value>,
    close_after_script: bool,
    session_status: StatusCode,
    session_delay: Option<Duration>,
    malformed_sessions: bool,
    inbound_tx: mpsc::UnboundedSender<Value>,
    connections: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
    authorizations: Mutex<Vec<Option<String>>>,
}

pub struct MockService {
    pub base_url: String,
    state: Arc<ServiceState>,
    inbound_rx: mpsc::UnboundedReceiver<Value>,
}

impl MockService {
    /// How many times the voice channel was dialed.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Session tokens presented on each channel connect.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.state.tokens.lock().unwrap().clone()
    }

    /// Authorization headers presented on each negotiation request.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.state.authorizations.lock().unwrap().clone()
    }

    /// Next envelope the client sent over the channel, or `None` on timeout.
    pub async fn next_inbound(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.inbound_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drain everything the client sends within the window.
    pub async fn collect_inbound(&mut self, wait: Duration) -> Vec<Value> {
        let mut envelopes = Vec::new();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                break;
            }
            match tokio::time::timeout(left, self.inbound_rx.recv()).await {
                Ok(Some(envelope)) => envelopes.push(envelope),
                _ => break,
            }
        }
        envelopes
    }
}

async fn create_session(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.authorizations.lock().unwrap().push(
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(String::from),
    );

    if let Some(delay) = state.session_delay {
        tokio::time::sleep(delay).await;
    }

    if state.session_status != StatusCode::OK {
        return (
            state.session_status,
            Json(json!({"detail": "session rejected"})),
        )
            .into_response();
    }

    if state.malformed_sessions {
        return (StatusCode::OK, "not json").into_response();
    }

    Json(json!({
        "session_id": SESSION_ID,
        "session_token": SESSION_TOKEN,
        "websocket_path": format!("/ws/live/{SESSION_ID}"),
    }))
    .into_response()
}

async fn open_channel(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<ServiceState>>,
) -> impl IntoResponse {
    state.tokens.lock().unwrap().push(params.get("token").cloned());
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| run_channel(socket, state))
}

async fn run_channel(mut socket: WebSocket, state: Arc<ServiceState>) {
    for envelope in &state.script {
        if socket
            .send(Message::Text(envelope.to_string()))
            .await
            .is_err()
        {
            return;
        }
    }

    if state.close_after_script {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                let _ = state.inbound_tx.send(value);
            }
        }
    }
}

/// Write a one-channel 16 kHz sine wave for capture tests.
pub fn write_test_wav(dir: &tempfile::TempDir, seconds: f32) -> PathBuf {
    let path = dir.path().join("input.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec).expect("create test wav");
    let total = (16_000.0 * seconds) as usize;
    for i in 0..total {
        let t = i as f32 / 16_000.0;
        let sample = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8_000.0) as i16;
        writer.write_sample(sample).expect("write test sample");
    }
    writer.finalize().expect("finalize test wav");

    path
}

/// Base64 WAV payload suitable for an inbound audio_chunk envelope.
pub fn wav_payload(samples: &[i16], sample_rate: u32) -> String {
    use base64::Engine;

    let bytes =
        livecall::audio::encode_wav_chunk(samples, sample_rate, 1).expect("encode test wav");
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
