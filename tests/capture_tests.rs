// Integration tests for the outbound capture pipeline
//
// These verify that raw frames are normalized, sliced into fixed-duration
// chunks, WAV-encoded, and gated before anything reaches the channel.

use anyhow::Result;
use livecall::audio::{
    encode_wav_chunk, normalize_frame, AudioFrame, CaptureBackend, CaptureConfig, CaptureGate,
    CapturePipeline, ChunkSlicer, ControlFlags, WAV_EXTENSION,
};
use livecall::error::MediaError;
use livecall::transport::{ChannelSender, OutboundEnvelope};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[test]
fn test_slicer_emits_chunks_at_exact_boundaries() {
    // 300ms of 16kHz mono = 4800 samples per chunk
    let mut slicer = ChunkSlicer::new(16_000, 1, 300);
    assert_eq!(slicer.chunk_samples(), 4800);

    // Feed 100ms at a time; the third frame completes the chunk
    assert!(slicer.push(&vec![1i16; 1600]).is_empty());
    assert!(slicer.push(&vec![2i16; 1600]).is_empty());
    let chunks = slicer.push(&vec![3i16; 1600]);

    assert_eq!(chunks.len(), 1, "Third frame should complete one chunk");
    assert_eq!(chunks[0].len(), 4800);
    assert_eq!(chunks[0][0], 1);
    assert_eq!(chunks[0][4799], 3);
}

#[test]
fn test_slicer_handles_oversized_frames() {
    let mut slicer = ChunkSlicer::new(16_000, 1, 300);

    // 1s of audio at once = 3 full chunks + 1600 samples left over
    let chunks = slicer.push(&vec![7i16; 16_000]);
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.len() == 4800));

    // The remainder completes on the next push
    let chunks = slicer.push(&vec![7i16; 3200]);
    assert_eq!(chunks.len(), 1);
}

#[test]
fn test_encoded_chunk_is_a_valid_wav() -> Result<()> {
    let samples: Vec<i16> = (0..4800).map(|i| (i % 256) as i16).collect();
    let bytes = encode_wav_chunk(&samples, 16_000, 1)?;

    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 16_000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);

    let decoded: Vec<i16> = reader.into_samples().collect::<Result<_, _>>()?;
    assert_eq!(decoded, samples, "Samples should round-trip unchanged");

    Ok(())
}

#[test]
fn test_normalize_folds_stereo_to_mono() {
    let frame = AudioFrame {
        samples: vec![100, 200, -50, 50, i16::MAX, i16::MAX],
        sample_rate: 16_000,
        channels: 2,
        timestamp_ms: 0,
    };

    let mono = normalize_frame(frame, 16_000, 1);
    assert_eq!(mono.channels, 1);
    // Pairs are summed, and the hot pair clamps instead of wrapping
    assert_eq!(mono.samples, vec![300, 0, i16::MAX]);
}

#[test]
fn test_normalize_downsamples_integer_ratios() {
    let frame = AudioFrame {
        samples: (0..4800).map(|i| i as i16).collect(),
        sample_rate: 48_000,
        channels: 1,
        timestamp_ms: 0,
    };

    let out = normalize_frame(frame, 16_000, 1);
    assert_eq!(out.sample_rate, 16_000);
    assert_eq!(out.samples.len(), 1600);
    assert_eq!(&out.samples[..3], &[0, 3, 6], "Every third sample is kept");
}

#[test]
fn test_normalize_leaves_awkward_rates_alone() {
    let frame = AudioFrame {
        samples: vec![0i16; 441],
        sample_rate: 44_100,
        channels: 1,
        timestamp_ms: 0,
    };

    // 44.1kHz -> 16kHz is not an integer ratio; the frame passes through
    let out = normalize_frame(frame, 16_000, 1);
    assert_eq!(out.sample_rate, 44_100);
    assert_eq!(out.samples.len(), 441);
}

/// Backend that replays a fixed list of frames, quickly.
struct ScriptedBackend {
    frames: Vec<AudioFrame>,
    capturing: bool,
}

impl ScriptedBackend {
    fn new(frames: Vec<AudioFrame>) -> Self {
        Self {
            frames,
            capturing: false,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, MediaError> {
        let (tx, rx) = mpsc::channel(64);
        let frames = std::mem::take(&mut self.frames);
        self.capturing = true;

        tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), MediaError> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn frames_100ms(count: usize) -> Vec<AudioFrame> {
    (0..count)
        .map(|i| AudioFrame {
            samples: vec![42i16; 1600],
            sample_rate: 16_000,
            channels: 1,
            timestamp_ms: i as u64 * 100,
        })
        .collect()
}

#[tokio::test]
async fn test_pipeline_sends_encoded_chunks() -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));
    let sender = ChannelSender::new(tx, open);

    let controls = Arc::new(ControlFlags::new());
    let gate = CaptureGate::new(Arc::clone(&controls), Arc::new(AtomicBool::new(false)));
    let chunks_sent = Arc::new(AtomicUsize::new(0));
    let chunks_gated = Arc::new(AtomicUsize::new(0));

    // 900ms of frames = 3 full 300ms chunks
    let backend = Box::new(ScriptedBackend::new(frames_100ms(9)));
    let mut pipeline = CapturePipeline::start(
        backend,
        CaptureConfig::default(),
        300,
        gate,
        sender,
        Arc::clone(&chunks_sent),
        Arc::clone(&chunks_gated),
    )
    .await?;

    // Wait for the scripted frames to drain
    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.stop().await?;

    let mut received = 0;
    while let Ok(envelope) = rx.try_recv() {
        match envelope {
            OutboundEnvelope::AudioChunk {
                data,
                file_extension,
            } => {
                assert_eq!(file_extension, WAV_EXTENSION);
                assert!(!data.is_empty(), "Chunk payload should not be empty");
                received += 1;
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    assert_eq!(received, 3, "Expected three 300ms chunks");
    assert_eq!(chunks_sent.load(Ordering::SeqCst), 3);
    assert_eq!(chunks_gated.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_pipeline_discards_chunks_while_gated() -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sender = ChannelSender::new(tx, Arc::new(AtomicBool::new(true)));

    let controls = Arc::new(ControlFlags::new());
    controls.set_muted(true);
    let gate = CaptureGate::new(Arc::clone(&controls), Arc::new(AtomicBool::new(false)));
    let chunks_sent = Arc::new(AtomicUsize::new(0));
    let chunks_gated = Arc::new(AtomicUsize::new(0));

    let backend = Box::new(ScriptedBackend::new(frames_100ms(9)));
    let mut pipeline = CapturePipeline::start(
        backend,
        CaptureConfig::default(),
        300,
        gate,
        sender,
        Arc::clone(&chunks_sent),
        Arc::clone(&chunks_gated),
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.stop().await?;

    assert!(rx.try_recv().is_err(), "Nothing should reach the channel while muted");
    assert_eq!(chunks_sent.load(Ordering::SeqCst), 0);
    assert_eq!(
        chunks_gated.load(Ordering::SeqCst),
        3,
        "Gated chunks are counted, not buffered"
    );

    Ok(())
}

#[tokio::test]
async fn test_pipeline_resumes_after_unmute() -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sender = ChannelSender::new(tx, Arc::new(AtomicBool::new(true)));

    let controls = Arc::new(ControlFlags::new());
    controls.set_muted(true);
    let gate = CaptureGate::new(Arc::clone(&controls), Arc::new(AtomicBool::new(false)));
    let chunks_sent = Arc::new(AtomicUsize::new(0));
    let chunks_gated = Arc::new(AtomicUsize::new(0));

    // 1.8s of frames; unmute partway through
    let backend = Box::new(ScriptedBackend::new(frames_100ms(18)));
    let mut pipeline = CapturePipeline::start(
        backend,
        CaptureConfig::default(),
        300,
        gate,
        sender,
        Arc::clone(&chunks_sent),
        Arc::clone(&chunks_gated),
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(20)).await;
    controls.set_muted(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.stop().await?;

    let sent = chunks_sent.load(Ordering::SeqCst);
    let gated = chunks_gated.load(Ordering::SeqCst);
    assert_eq!(sent + gated, 6, "Every chunk is either sent or discarded");
    assert!(sent > 0, "Chunks should flow again after unmute");

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, sent);

    Ok(())
}
