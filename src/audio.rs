//! Audio capture module using cpal
//!
//! A dedicated OS thread owns the input device for the duration of one
//! recording, reads fixed-size PCM chunks and hands them to the network
//! sender through a bounded channel. Device failures end the thread and
//! leave a `DeviceLost` marker in the channel so the sender stops waiting.

use crate::config::Config;
use crate::core::signals::EngineSignals;
use crate::error::{VoiceError, VoiceResult};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, trace, warn};

const BYTES_PER_SAMPLE: usize = 2;
const DEVICE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// PCM layout requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per chunk handed to the sender
    pub chunk_bytes: usize,
}

impl AudioFormat {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            chunk_bytes: config.chunk_size,
        }
    }

    pub fn samples_per_chunk(&self) -> usize {
        (self.chunk_bytes / BYTES_PER_SAMPLE).max(1)
    }
}

/// One captured chunk, 16-bit little-endian PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub index: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Chunk(AudioChunk),
    DeviceLost(String),
}

/// An opened input; `read_frame` blocks until one chunk is available
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Vec<u8>>;
}

/// Opens input sources. `open` runs on the capture thread, so sources need
/// not be `Send`.
pub trait AudioInput: Send + Sync {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn FrameSource>>;

    fn name(&self) -> &str;
}

/// Microphone input through the default cpal host
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_index: Option<usize>,
}

impl CpalInput {
    pub fn new(device_index: Option<usize>) -> Self {
        Self { device_index }
    }
}

impl AudioInput for CpalInput {
    fn open(&self, format: &AudioFormat) -> Result<Box<dyn FrameSource>> {
        let host = cpal::default_host();

        let device = if let Some(idx) = self.device_index {
            host.input_devices()?
                .nth(idx)
                .context("Device index out of range")?
        } else {
            host.default_input_device()
                .context("No default input device")?
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("🎙️ Using audio device: {}", device_name);

        let stream_config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = mpsc::channel::<Vec<i16>>();
        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Receiver gone means the recording already ended
                let _ = tx.send(data.to_vec());
            },
            |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;

        Ok(Box::new(CpalSource {
            _stream: stream,
            samples: rx,
            pending: Vec::with_capacity(format.samples_per_chunk() * 2),
            samples_per_chunk: format.samples_per_chunk(),
        }))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

struct CpalSource {
    /// Dropping the stream releases the device
    _stream: cpal::Stream,
    samples: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    samples_per_chunk: usize,
}

impl FrameSource for CpalSource {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        while self.pending.len() < self.samples_per_chunk {
            match self.samples.recv_timeout(DEVICE_STALL_TIMEOUT) {
                Ok(samples) => self.pending.extend_from_slice(&samples),
                Err(RecvTimeoutError::Timeout) => anyhow::bail!("audio device stalled"),
                Err(RecvTimeoutError::Disconnected) => anyhow::bail!("audio stream closed"),
            }
        }

        let frame: Vec<i16> = self.pending.drain(..self.samples_per_chunk).collect();
        Ok(frame.iter().flat_map(|s| s.to_le_bytes()).collect())
    }
}

/// Names of the input devices cpal can see, in index order
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    Ok(host
        .input_devices()?
        .map(|d| d.name().unwrap_or_else(|_| "Unknown".to_string()))
        .collect())
}

/// Calculate audio energy of little-endian 16-bit PCM
pub fn calculate_energy(pcm: &[u8]) -> f32 {
    let samples: Vec<i16> = pcm
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    if samples.is_empty() {
        return 0.0;
    }

    let sum: i64 = samples.iter().map(|&s| (s as i64).pow(2)).sum();
    (sum as f32 / samples.len() as f32).sqrt()
}

/// Handle to a running capture thread
#[derive(Debug)]
pub struct CaptureThread {
    recording: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    pub fn spawn(
        input: Arc<dyn AudioInput>,
        format: AudioFormat,
        frames: Sender<CaptureEvent>,
        recording: Arc<AtomicBool>,
        signals: Arc<EngineSignals>,
    ) -> VoiceResult<Self> {
        let flag = recording.clone();
        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_loop(input.as_ref(), format, frames, flag, signals))
            .map_err(|e| VoiceError::Device(format!("cannot start capture thread: {e}")))?;

        Ok(Self {
            recording,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Clear the recording flag and wait for the device to be released
    pub fn stop(&mut self) {
        self.recording.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("❌ Audio capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    input: &dyn AudioInput,
    format: AudioFormat,
    frames: Sender<CaptureEvent>,
    recording: Arc<AtomicBool>,
    signals: Arc<EngineSignals>,
) {
    let mut source = match input.open(&format) {
        Ok(source) => source,
        Err(e) => {
            error!("❌ Failed to open audio input '{}': {:#}", input.name(), e);
            let _ = frames.blocking_send(CaptureEvent::DeviceLost(e.to_string()));
            return;
        }
    };

    info!(
        "🎤 Recording started ({} Hz, {} ch, {} byte chunks)",
        format.sample_rate, format.channels, format.chunk_bytes
    );

    let mut index: u64 = 0;
    while recording.load(Ordering::SeqCst) && !signals.should_wind_down() {
        let data = match source.read_frame() {
            Ok(data) => data,
            Err(e) => {
                error!("❌ Audio read failed: {:#}", e);
                let _ = frames.blocking_send(CaptureEvent::DeviceLost(e.to_string()));
                return;
            }
        };

        if data.is_empty() || !recording.load(Ordering::SeqCst) {
            continue;
        }

        trace!("chunk {} energy {:.0}", index, calculate_energy(&data));
        if frames
            .blocking_send(CaptureEvent::Chunk(AudioChunk { index, data }))
            .is_err()
        {
            debug!("Audio sender gone, capture ending");
            break;
        }
        index += 1;
    }

    info!("🎤 Recording stopped after {} chunk(s)", index);
}
