use super::backend::{AudioFrame, CaptureBackend, CaptureConfig};
use super::gate::CaptureGate;
use crate::error::MediaError;
use crate::transport::{ChannelSender, OutboundEnvelope};
use base64::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Codec hint attached to every outbound chunk.
pub const WAV_EXTENSION: &str = ".wav";

/// Slices normalized frames into fixed-cadence chunks.
///
/// Samples accumulate across frame boundaries; a chunk is emitted exactly
/// when one cadence worth of samples is available.
pub struct ChunkSlicer {
    sample_rate: u32,
    channels: u16,
    chunk_duration_ms: u64,
    chunk_samples: usize,
    pending: Vec<i16>,
}

impl ChunkSlicer {
    pub fn new(sample_rate: u32, channels: u16, chunk_duration_ms: u64) -> Self {
        let chunk_samples =
            (sample_rate as u64 * channels as u64 * chunk_duration_ms / 1000).max(1) as usize;
        Self {
            sample_rate,
            channels,
            chunk_duration_ms,
            chunk_samples,
            pending: Vec::with_capacity(chunk_samples),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    pub fn matches(&self, sample_rate: u32, channels: u16) -> bool {
        self.sample_rate == sample_rate && self.channels == channels
    }

    /// Feed samples in; get every completed chunk out.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend_from_slice(samples);

        let mut chunks = Vec::new();
        while self.pending.len() >= self.chunk_samples {
            let rest = self.pending.split_off(self.chunk_samples);
            chunks.push(std::mem::replace(&mut self.pending, rest));
        }
        chunks
    }

    fn rebuilt_for(&self, sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, self.chunk_duration_ms)
    }
}

/// Normalize a frame toward the target format: fold stereo to mono, then
/// downsample by decimation when the rates divide evenly. A rate that does
/// not divide is kept; the WAV header carries the true rate.
pub fn normalize_frame(
    frame: AudioFrame,
    target_sample_rate: u32,
    target_channels: u16,
) -> AudioFrame {
    let mut frame = frame;

    if frame.channels != target_channels && target_channels == 1 {
        frame = stereo_to_mono(frame);
    }

    if frame.sample_rate != target_sample_rate {
        frame = downsample_frame(frame, target_sample_rate);
    }

    frame
}

/// Convert stereo to mono by summing channels.
fn stereo_to_mono(frame: AudioFrame) -> AudioFrame {
    if frame.channels != 2 {
        return frame;
    }

    let mut mono_samples = Vec::with_capacity(frame.samples.len() / 2);

    // Sum left and right (no division, to preserve volume).
    for pair in frame.samples.chunks_exact(2) {
        let sum = pair[0] as i32 + pair[1] as i32;
        mono_samples.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }

    AudioFrame {
        samples: mono_samples,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}

/// Downsample by decimation. Only exact integer ratios; anything else is
/// returned unchanged.
fn downsample_frame(frame: AudioFrame, target_rate: u32) -> AudioFrame {
    if target_rate == 0 || frame.sample_rate <= target_rate || frame.sample_rate % target_rate != 0
    {
        return frame;
    }

    let ratio = (frame.sample_rate / target_rate) as usize;
    let channels = frame.channels.max(1) as usize;

    // Decimate whole interleaved sample groups so channels stay aligned.
    let samples: Vec<i16> = frame
        .samples
        .chunks_exact(channels)
        .step_by(ratio)
        .flatten()
        .copied()
        .collect();

    AudioFrame {
        samples,
        sample_rate: target_rate,
        channels: frame.channels,
        timestamp_ms: frame.timestamp_ms,
    }
}

/// Encode one chunk of samples as an in-memory WAV container.
pub fn encode_wav_chunk(
    samples: &[i16],
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Capture pipeline: backend frames in, gated encoded chunks out.
///
/// The gate is re-evaluated at every chunk boundary; a gated chunk is
/// dropped, never buffered, so there is no catch-up of skipped audio.
pub struct CapturePipeline {
    backend: Box<dyn CaptureBackend>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub async fn start(
        mut backend: Box<dyn CaptureBackend>,
        config: CaptureConfig,
        chunk_duration_ms: u64,
        gate: CaptureGate,
        sender: ChannelSender,
        chunks_sent: Arc<AtomicUsize>,
        chunks_gated: Arc<AtomicUsize>,
    ) -> Result<Self, MediaError> {
        let mut frames = backend.start().await?;
        info!(
            "capture pipeline started ({}, {} ms chunks)",
            backend.name(),
            chunk_duration_ms
        );

        let target_rate = config.target_sample_rate;
        let target_channels = config.target_channels;

        let task = tokio::spawn(async move {
            let mut slicer = ChunkSlicer::new(target_rate, target_channels, chunk_duration_ms);

            while let Some(frame) = frames.recv().await {
                let frame = normalize_frame(frame, target_rate, target_channels);

                if !slicer.matches(frame.sample_rate, frame.channels) {
                    debug!(
                        "capture format settled at {} Hz, {} channels",
                        frame.sample_rate, frame.channels
                    );
                    slicer = slicer.rebuilt_for(frame.sample_rate, frame.channels);
                }

                for chunk in slicer.push(&frame.samples) {
                    if !gate.allows_capture() {
                        chunks_gated.fetch_add(1, Ordering::SeqCst);
                        trace!("chunk gated; dropping {} samples", chunk.len());
                        continue;
                    }

                    match encode_wav_chunk(&chunk, slicer.sample_rate(), slicer.channels()) {
                        Ok(bytes) => {
                            let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
                            sender.send(OutboundEnvelope::AudioChunk {
                                data,
                                file_extension: WAV_EXTENSION.to_string(),
                            });
                            chunks_sent.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => error!("failed to encode audio chunk: {}", e),
                    }
                }
            }

            debug!("capture pipeline task finished");
        });

        Ok(Self {
            backend,
            task: Some(task),
        })
    }

    /// Release the capture device and drain the pipeline task. Idempotent.
    pub async fn stop(&mut self) -> Result<(), MediaError> {
        self.backend.stop().await?;

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("capture task panicked: {}", e);
            }
            info!("capture pipeline stopped");
        }

        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.backend.is_capturing()
    }
}
