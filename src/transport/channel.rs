use super::envelope::{parse_inbound, InboundEnvelope, OutboundEnvelope};
use crate::error::TransportError;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Event delivered to the channel owner.
#[derive(Debug)]
pub enum ChannelEvent {
    /// One parsed inbound envelope.
    Message(InboundEnvelope),
    /// The connection is gone. Terminal; no further events follow.
    Closed { reason: Option<String> },
}

/// Cheap handle for sending envelopes over an open channel.
///
/// Once the channel is closed, sends become silent drops: the envelope is
/// discarded rather than queued, so stale audio is never replayed.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<OutboundEnvelope>,
    open: Arc<AtomicBool>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::UnboundedSender<OutboundEnvelope>, open: Arc<AtomicBool>) -> Self {
        Self { tx, open }
    }

    pub fn send(&self, envelope: OutboundEnvelope) {
        if !self.open.load(Ordering::SeqCst) {
            trace!("channel not open; dropping outbound envelope");
            return;
        }
        if self.tx.send(envelope).is_err() {
            trace!("channel writer gone; dropping outbound envelope");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// One persistent WebSocket connection scoped to a single call.
///
/// The socket is split into a writer task draining an outbound queue and a
/// reader task parsing text frames into [`ChannelEvent`]s. Any close or error
/// observed by the reader is terminal for the call.
pub struct TransportChannel {
    out_tx: Option<mpsc::UnboundedSender<OutboundEnvelope>>,
    open: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportChannel {
    /// Connect to the voice channel. Returns the channel plus the event
    /// stream the owner must drain.
    pub async fn open(
        url: &Url,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), TransportError> {
        let (socket, _response) = connect_async(url.as_str()).await?;
        info!("voice channel open");

        let (mut ws_tx, mut ws_rx) = socket.split();
        let open = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundEnvelope>();
        let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(256);

        let writer = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let text = match serde_json::to_string(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to serialize outbound envelope: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    debug!("outbound send failed: {}", e);
                    break;
                }
            }
            // All senders are gone; say goodbye to the server.
            let _ = ws_tx.close().await;
            trace!("channel writer finished");
        });

        let reader_open = Arc::clone(&open);
        let reader = tokio::spawn(async move {
            let reason = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => match parse_inbound(text.as_str()) {
                        Some(envelope) => {
                            if event_tx.send(ChannelEvent::Message(envelope)).await.is_err() {
                                // Owner stopped listening; the call is over.
                                reader_open.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                        None => debug!("ignoring unparseable channel frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| {
                            if f.reason.is_empty() {
                                format!("closed ({})", f.code)
                            } else {
                                f.reason.to_string()
                            }
                        });
                    }
                    // Binary frames and ping/pong are not part of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };
            reader_open.store(false, Ordering::SeqCst);
            let _ = event_tx.send(ChannelEvent::Closed { reason }).await;
            trace!("channel reader finished");
        });

        let channel = Self {
            out_tx: Some(out_tx),
            open,
            writer: Some(writer),
            reader: Some(reader),
        };

        Ok((channel, event_rx))
    }

    /// Handle for producers (the capture pipeline, hangup notices).
    pub fn sender(&self) -> ChannelSender {
        match &self.out_tx {
            Some(tx) => ChannelSender::new(tx.clone(), Arc::clone(&self.open)),
            // After close() any handed-out sender is inert anyway.
            None => ChannelSender::new(mpsc::unbounded_channel().0, Arc::clone(&self.open)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the channel and join both tasks. Idempotent.
    pub async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.out_tx.take();

        if let Some(writer) = self.writer.take() {
            let abort = writer.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
                warn!("channel writer did not finish in time; aborting");
                abort.abort();
            }
        }
        if let Some(reader) = self.reader.take() {
            let abort = reader.abort_handle();
            if tokio::time::timeout(Duration::from_secs(2), reader).await.is_err() {
                warn!("channel reader did not finish in time; aborting");
                abort.abort();
            }
        }
        debug!("voice channel closed");
    }
}
