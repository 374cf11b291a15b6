use crate::error::MediaError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Audio sample data (16-bit PCM, interleaved).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for a capture backend.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (frames are downsampled toward it when possible)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Frame granularity in milliseconds (affects latency)
    pub frame_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            target_channels: 1,
            frame_duration_ms: 100,
        }
    }
}

/// Audio capture backend trait.
///
/// Implementations:
/// - Microphone: default input device via cpal
/// - File: WAV file replayed at real-time pacing (demos, tests)
#[async_trait::async_trait]
pub trait CaptureBackend: Send {
    /// Start capturing audio.
    ///
    /// Returns a channel receiver that will receive audio frames.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, MediaError>;

    /// Stop capturing and release the device.
    async fn stop(&mut self) -> Result<(), MediaError>;

    /// Check if the backend is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Capture source selector.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Default input device
    Microphone,
    /// WAV file replayed in real time
    File(PathBuf),
}

/// Capture backend factory.
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    pub fn create(
        source: &CaptureSource,
        config: CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>, MediaError> {
        match source {
            CaptureSource::Microphone => Ok(Box::new(MicrophoneBackend::new(config))),
            CaptureSource::File(path) => Ok(Box::new(FileBackend::new(path.clone(), &config))),
        }
    }
}

/// Microphone capture through cpal.
///
/// `cpal::Stream` is not `Send`, so the stream is built and owned by a
/// dedicated thread; frames cross back over an mpsc channel and the thread
/// parks until stop.
pub struct MicrophoneBackend {
    config: CaptureConfig,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    capturing: bool,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
            capturing: false,
        }
    }

    /// Names of the available input devices.
    pub fn list_devices() -> Result<Vec<String>, MediaError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| MediaError::InputDevice(e.to_string()))?;

        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, MediaError> {
        if self.capturing {
            return Err(MediaError::InputDevice(
                "microphone capture already started".to_string(),
            ));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let frame_duration_ms = self.config.frame_duration_ms.max(10);

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture_thread(frame_duration_ms, frame_tx, ready_tx, stop_rx))
            .map_err(|e| {
                MediaError::InputDevice(format!("capture thread failed to start: {e}"))
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(MediaError::InputDevice(
                    "capture thread exited during startup".to_string(),
                ));
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);
        self.capturing = true;
        info!("microphone capture started");

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<(), MediaError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            // Join off the runtime; the thread exits as soon as it drops the stream.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        if self.capturing {
            self.capturing = false;
            info!("microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

/// Accumulates device callback samples into fixed-size frames.
struct FrameAccumulator {
    pending: Vec<i16>,
    frame_samples: usize,
    sample_rate: u32,
    channels: u16,
    started: Instant,
    frame_tx: mpsc::Sender<AudioFrame>,
}

impl FrameAccumulator {
    fn new(
        frame_samples: usize,
        sample_rate: u32,
        channels: u16,
        frame_tx: mpsc::Sender<AudioFrame>,
    ) -> Self {
        Self {
            pending: Vec::with_capacity(frame_samples),
            frame_samples,
            sample_rate,
            channels,
            started: Instant::now(),
            frame_tx,
        }
    }

    fn extend(&mut self, samples: impl Iterator<Item = i16>) {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() >= self.frame_samples {
                let samples = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_samples),
                );
                let frame = AudioFrame {
                    samples,
                    sample_rate: self.sample_rate,
                    channels: self.channels,
                    timestamp_ms: self.started.elapsed().as_millis() as u64,
                };
                // try_send: never block the device callback. A full queue
                // means the consumer is stopping; the frame is dropped.
                let _ = self.frame_tx.try_send(frame);
            }
        }
    }
}

fn run_capture_thread(
    frame_duration_ms: u64,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<(), MediaError>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let stream = match build_input_stream(frame_duration_ms, frame_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(MediaError::InputDevice(format!(
            "capture stream failed to start: {e}"
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Park until stop() or the backend is dropped; the stream must stay on
    // this thread until then.
    let _ = stop_rx.recv();
    drop(stream);
    debug!("capture thread finished");
}

fn build_input_stream(
    frame_duration_ms: u64,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, MediaError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(MediaError::NoInputDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| MediaError::InputDevice(format!("{device_name}: {e}")))?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels;

    info!(
        "capturing from {} ({} Hz, {} channels, {:?})",
        device_name, sample_rate, channels, sample_format
    );

    let frame_samples =
        (sample_rate as u64 * channels as u64 * frame_duration_ms / 1000).max(1) as usize;
    let accumulator = FrameAccumulator::new(frame_samples, sample_rate, channels, frame_tx);
    let err_fn = |err| warn!("capture stream error: {}", err);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            {
                let mut acc = accumulator;
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    acc.extend(
                        data.iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    )
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            {
                let mut acc = accumulator;
                move |data: &[i16], _: &cpal::InputCallbackInfo| acc.extend(data.iter().copied())
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            {
                let mut acc = accumulator;
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    acc.extend(data.iter().map(|s| (*s as i32 - 32_768) as i16))
                }
            },
            err_fn,
            None,
        ),
        other => return Err(MediaError::UnsupportedFormat(format!("{other:?}"))),
    }
    .map_err(|e| MediaError::InputDevice(format!("{device_name}: {e}")))?;

    Ok(stream)
}

/// WAV file capture source.
///
/// Streams the file's samples as frames at real-time pacing, then goes
/// quiet. Only 16-bit PCM WAV is accepted.
pub struct FileBackend {
    path: PathBuf,
    frame_duration_ms: u64,
    task: Option<JoinHandle<()>>,
    capturing: bool,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: &CaptureConfig) -> Self {
        Self {
            path: path.into(),
            frame_duration_ms: config.frame_duration_ms.max(10),
            task: None,
            capturing: false,
        }
    }

    fn source_error(&self, message: impl Into<String>) -> MediaError {
        MediaError::SourceFile {
            path: self.path.display().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, MediaError> {
        let reader =
            hound::WavReader::open(&self.path).map_err(|e| self.source_error(e.to_string()))?;
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(self.source_error("only 16-bit PCM WAV sources are supported"));
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| self.source_error(e.to_string()))?;

        info!(
            "file capture source loaded: {} ({} Hz, {} channels, {} samples)",
            self.path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let frame_duration_ms = self.frame_duration_ms;
        let frame_samples =
            (spec.sample_rate as u64 * spec.channels as u64 * frame_duration_ms / 1000).max(1)
                as usize;

        let task = tokio::spawn(async move {
            let mut timestamp_ms = 0u64;
            for chunk in samples.chunks(frame_samples) {
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: spec.sample_rate,
                    channels: spec.channels,
                    timestamp_ms,
                };
                if frame_tx.send(frame).await.is_err() {
                    break;
                }
                timestamp_ms += frame_duration_ms;
                tokio::time::sleep(Duration::from_millis(frame_duration_ms)).await;
            }
            debug!("file capture source drained");
        });

        self.task = Some(task);
        self.capturing = true;

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<(), MediaError> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "file"
    }
}
