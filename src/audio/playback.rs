use super::gate::ControlFlags;
use crate::error::{DecodeError, MediaError};
use base64::Engine;
use rodio::buffer::SamplesBuffer;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// One decoded inbound audio payload, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Interleaved 16-bit samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
}

impl PlaybackBuffer {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Decode an inbound audio payload (any container symphonia can probe) into
/// interleaved 16-bit samples.
pub fn decode_audio_payload(bytes: Vec<u8>) -> Result<PlaybackBuffer, DecodeError> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(DecodeError::UnrecognizedFormat)?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(DecodeError::UnsupportedCodec)?;

    let mut samples: Vec<i16> = Vec::new();
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut sample_buf: Option<SampleBuffer<i16>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                if samples.is_empty() {
                    return Err(DecodeError::Malformed(e));
                }
                debug!("audio payload truncated: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // Corrupt packets are skipped; the decoder recovers on the next one.
            Err(SymphoniaError::DecodeError(e)) => trace!("skipping corrupt packet: {}", e),
            Err(e) => {
                if samples.is_empty() {
                    return Err(DecodeError::Malformed(e));
                }
                debug!("audio payload truncated: {}", e);
                break;
            }
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(PlaybackBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Base64-decode then audio-decode one wire payload.
pub fn decode_base64_payload(data: &str) -> Result<PlaybackBuffer, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    decode_audio_payload(bytes)
}

/// The rendering device behind the scheduler.
///
/// `begin` hands one buffer to the device; `is_done` reports whether that
/// buffer finished; `cancel` silences the device and discards whatever was
/// rendering.
pub trait PlaybackOutput: Send {
    fn begin(&mut self, buffer: PlaybackBuffer) -> Result<(), MediaError>;
    fn is_done(&self) -> bool;
    fn cancel(&mut self);
}

/// Speaker output through rodio.
///
/// `rodio::OutputStream` is not `Send`, so it lives on a dedicated thread
/// that parks until shutdown; the `Sink` handle is rebuilt after every
/// cancel because a stopped sink accepts no more sources.
pub struct RodioOutput {
    handle: rodio::OutputStreamHandle,
    sink: Option<rodio::Sink>,
    shutdown_tx: std::sync::mpsc::Sender<()>,
}

impl RodioOutput {
    pub fn new() -> Result<Self, MediaError> {
        let (init_tx, init_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match rodio::OutputStream::try_default() {
                Ok((stream, handle)) => {
                    if init_tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    // The stream must stay alive, and on this thread, for as
                    // long as anything plays through its handle.
                    let _stream = stream;
                    let _ = shutdown_rx.recv();
                }
                Err(e) => {
                    let _ = init_tx.send(Err(MediaError::OutputDevice(e.to_string())));
                }
            })
            .map_err(|e| MediaError::OutputDevice(format!("output thread failed to start: {e}")))?;

        let handle = init_rx.recv().map_err(|_| {
            MediaError::OutputDevice("output thread exited during startup".to_string())
        })??;

        info!("speaker output ready");

        Ok(Self {
            handle,
            sink: None,
            shutdown_tx,
        })
    }
}

impl PlaybackOutput for RodioOutput {
    fn begin(&mut self, buffer: PlaybackBuffer) -> Result<(), MediaError> {
        if self.sink.is_none() {
            let sink = rodio::Sink::try_new(&self.handle)
                .map_err(|e| MediaError::OutputDevice(e.to_string()))?;
            self.sink = Some(sink);
        }

        if let Some(sink) = &self.sink {
            let PlaybackBuffer {
                samples,
                sample_rate,
                channels,
            } = buffer;
            sink.append(SamplesBuffer::new(channels, sample_rate, samples));
        }

        Ok(())
    }

    fn is_done(&self) -> bool {
        self.sink.as_ref().map(|sink| sink.empty()).unwrap_or(true)
    }

    fn cancel(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Output that swallows every buffer. For headless runs and tests.
#[derive(Debug, Default)]
pub struct DiscardOutput;

impl PlaybackOutput for DiscardOutput {
    fn begin(&mut self, _buffer: PlaybackBuffer) -> Result<(), MediaError> {
        Ok(())
    }

    fn is_done(&self) -> bool {
        true
    }

    fn cancel(&mut self) {}
}

enum PlaybackCommand {
    Enqueue(String),
    Clear,
    Shutdown,
}

/// Cheap handle for feeding the playback scheduler.
#[derive(Clone)]
pub struct PlaybackQueue {
    cmd_tx: mpsc::UnboundedSender<PlaybackCommand>,
}

impl PlaybackQueue {
    /// Queue one base64 wire payload for decode and playback.
    pub fn enqueue(&self, data: String) {
        let _ = self.cmd_tx.send(PlaybackCommand::Enqueue(data));
    }

    /// Drop everything pending and cancel the in-flight buffer.
    pub fn clear(&self) {
        let _ = self.cmd_tx.send(PlaybackCommand::Clear);
    }
}

/// Owner handle for the render task.
pub struct PlaybackHandle {
    queue: PlaybackQueue,
    task: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    /// Spawn the render task around an output device.
    ///
    /// `remote_speaking` is asserted while the FIFO is non-empty or a buffer
    /// is rendering, and cleared when both drain.
    pub fn spawn(
        output: Box<dyn PlaybackOutput>,
        controls: Arc<ControlFlags>,
        remote_speaking: Arc<AtomicBool>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(render_loop(output, controls, remote_speaking, cmd_rx));

        Self {
            queue: PlaybackQueue { cmd_tx },
            task: Some(task),
        }
    }

    pub fn queue(&self) -> PlaybackQueue {
        self.queue.clone()
    }

    pub fn enqueue(&self, data: String) {
        self.queue.enqueue(data);
    }

    pub fn clear(&self) {
        self.queue.clear();
    }

    /// Stop rendering, drop the queue, and join the task.
    pub async fn shutdown(&mut self) {
        let _ = self.queue.cmd_tx.send(PlaybackCommand::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// How often the render loop checks whether the current buffer finished.
const RENDER_POLL: Duration = Duration::from_millis(20);

async fn render_loop(
    mut output: Box<dyn PlaybackOutput>,
    controls: Arc<ControlFlags>,
    remote_speaking: Arc<AtomicBool>,
    mut cmd_rx: mpsc::UnboundedReceiver<PlaybackCommand>,
) {
    let mut fifo: VecDeque<PlaybackBuffer> = VecDeque::new();
    let mut rendering = false;
    let mut poll = tokio::time::interval(RENDER_POLL);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(PlaybackCommand::Enqueue(data)) => {
                    if !controls.is_speaker_enabled() {
                        trace!("speaker disabled; dropping inbound audio payload");
                        continue;
                    }
                    match decode_base64_payload(&data) {
                        Ok(buffer) => {
                            debug!("queued {:.2}s of remote audio", buffer.duration().as_secs_f32());
                            fifo.push_back(buffer);
                            remote_speaking.store(true, Ordering::SeqCst);
                        }
                        Err(e) => warn!("skipping undecodable audio payload: {}", e),
                    }
                }
                Some(PlaybackCommand::Clear) => {
                    fifo.clear();
                    output.cancel();
                    rendering = false;
                    remote_speaking.store(false, Ordering::SeqCst);
                    debug!("playback queue cleared");
                }
                Some(PlaybackCommand::Shutdown) | None => {
                    fifo.clear();
                    output.cancel();
                    remote_speaking.store(false, Ordering::SeqCst);
                    break;
                }
            },
            _ = poll.tick() => {
                if rendering && output.is_done() {
                    rendering = false;
                }
                if !rendering {
                    match fifo.pop_front() {
                        // Strictly sequential: the next buffer starts only
                        // after the previous one finished.
                        Some(buffer) => match output.begin(buffer) {
                            Ok(()) => rendering = true,
                            Err(e) => warn!("playback output failed; skipping buffer: {}", e),
                        },
                        None => remote_speaking.store(false, Ordering::SeqCst),
                    }
                }
            }
        }
    }

    debug!("playback task finished");
}
