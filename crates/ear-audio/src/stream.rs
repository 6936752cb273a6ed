//! cpal duplex transport
//!
//! The input stream pushes interleaved f32 frames into an `rtrb` ring; the
//! output callback pulls one period's worth, deinterleaves it into planar
//! f64 buffers and drives the processor:
//! - input channels 0/1 are the microphones
//! - input channels 2/3, when the device has them, carry the reference

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig,
    SupportedStreamConfig,
};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use ear_core::{BufferSize, MAX_BLOCK_SIZE, SampleRate};

use crate::engine::{AudioProcessor, AudioTransport, PeriodBuffers};
use crate::{AudioConfig, AudioError, AudioResult, input_device, output_device};

/// Periods of input buffered ahead of the output callback
const RING_PERIODS: usize = 8;

/// Input channels we read: microphone pair plus reference pair
const MAX_INPUT_CHANNELS: usize = 4;

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STREAM STATE
// ═══════════════════════════════════════════════════════════════════════════════

struct StreamState {
    /// Taken back on deactivate; the audio thread only try-locks it
    processor: Mutex<Option<Box<dyn AudioProcessor>>>,
    running: AtomicBool,
    /// Input samples dropped because the ring was full
    overruns: AtomicU64,
    /// Input samples missing when the output callback ran
    underruns: AtomicU64,
}

impl StreamState {
    fn new() -> Self {
        Self {
            processor: Mutex::new(None),
            running: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    /// Run `start`, then hand `processor` to the callbacks.
    ///
    /// On failure nothing is installed and the state stays idle, so the
    /// transport can be activated again.
    fn start_with<T>(
        &self,
        processor: Box<dyn AudioProcessor>,
        start: impl FnOnce() -> AudioResult<T>,
    ) -> AudioResult<T> {
        self.overruns.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);

        let started = start()?;
        *self.processor.lock() = Some(processor);
        self.running.store(true, Ordering::Release);
        Ok(started)
    }
}

/// Duplex cpal binding
pub struct CpalTransport {
    input_device: Device,
    output_device: Device,
    config: AudioConfig,
    state: Arc<StreamState>,
    streams: Option<(Stream, Stream)>,
}

impl CpalTransport {
    /// Resolve the configured devices; streams are built on `activate`
    pub fn new(config: AudioConfig) -> AudioResult<Self> {
        let input_device = input_device(config.input_device.as_deref())?;
        let output_device = output_device(config.output_device.as_deref())?;

        log::info!(
            "Audio devices: input '{}', output '{}'",
            input_device.name().unwrap_or_default(),
            output_device.name().unwrap_or_default()
        );

        Ok(Self {
            input_device,
            output_device,
            config,
            state: Arc::new(StreamState::new()),
            streams: None,
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Input samples lost to a full ring since activation
    pub fn overruns(&self) -> u64 {
        self.state.overruns.load(Ordering::Relaxed)
    }

    /// Input samples missing at output time since activation
    pub fn underruns(&self) -> u64 {
        self.state.underruns.load(Ordering::Relaxed)
    }
}

impl AudioTransport for CpalTransport {
    fn sample_rate(&self) -> SampleRate {
        self.config.sample_rate
    }

    fn buffer_size(&self) -> BufferSize {
        self.config.buffer_size
    }

    fn activate(&mut self, processor: Box<dyn AudioProcessor>) -> AudioResult<()> {
        if self.streams.is_some() {
            return Err(AudioError::AlreadyActive);
        }

        let input_config = find_stream_config(&self.input_device, &self.config, true)?;
        let output_config = find_stream_config(&self.output_device, &self.config, false)?;
        let input_channels = input_config.channels() as usize;
        if input_channels < 4 {
            log::warn!(
                "Input has {} channels, no external reference available",
                input_channels
            );
        }

        let period = self.config.buffer_size.as_usize();
        let (producer, consumer) = RingBuffer::new(period * input_channels * RING_PERIODS);

        // Callbacks play silence until the processor is installed
        let state = Arc::clone(&self.state);
        let streams = state.start_with(processor, || {
            let input = build_input_stream(
                &self.input_device,
                &input_config,
                self.config.buffer_size,
                producer,
                Arc::clone(&self.state),
            )?;
            let output = build_output_stream(
                &self.output_device,
                &output_config,
                self.config.buffer_size,
                consumer,
                input_channels,
                Arc::clone(&self.state),
            )?;

            input
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            output
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            Ok((input, output))
        })?;

        self.streams = Some(streams);
        log::info!(
            "Audio started: {} Hz, {} frames, {} input channels",
            self.config.sample_rate.as_u32(),
            period,
            input_channels
        );
        Ok(())
    }

    fn deactivate(&mut self) -> AudioResult<Box<dyn AudioProcessor>> {
        let (input, output) = self.streams.take().ok_or(AudioError::NotActive)?;
        self.state.running.store(false, Ordering::Release);

        output
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        input
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        drop(output);
        drop(input);

        log::info!(
            "Audio stopped ({} overruns, {} underruns)",
            self.overruns(),
            self.underruns()
        );
        self.state.processor.lock().take().ok_or(AudioError::NotActive)
    }

    fn is_active(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }
}

impl Drop for CpalTransport {
    fn drop(&mut self) {
        if self.streams.is_some() {
            let _ = self.deactivate();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAM CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// First f32 config at the requested rate with enough channels. For input,
/// a range carrying the reference pair is preferred.
fn find_stream_config(
    device: &Device,
    config: &AudioConfig,
    is_input: bool,
) -> AudioResult<SupportedStreamConfig> {
    let sample_rate = cpal::SampleRate(config.sample_rate.as_u32());

    let ranges: Vec<_> = if is_input {
        device
            .supported_input_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect()
    } else {
        device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect()
    };

    let wanted = if is_input {
        config.input_channels
    } else {
        config.output_channels
    };
    let usable = |min_channels: u16| {
        ranges.iter().find(|r| {
            r.channels() >= min_channels
                && r.min_sample_rate() <= sample_rate
                && r.max_sample_rate() >= sample_rate
                && r.sample_format() == SampleFormat::F32
        })
    };

    usable(wanted)
        .or_else(|| usable(2))
        .map(|r| r.clone().with_sample_rate(sample_rate))
        .ok_or_else(|| {
            AudioError::ConfigError(format!(
                "No f32 {} config with {} channels @ {}Hz",
                if is_input { "input" } else { "output" },
                wanted,
                config.sample_rate.as_u32()
            ))
        })
}

fn stream_config(supported: &SupportedStreamConfig, buffer_size: BufferSize) -> StreamConfig {
    StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size.as_usize() as u32),
    }
}

fn build_input_stream(
    device: &Device,
    supported: &SupportedStreamConfig,
    buffer_size: BufferSize,
    mut producer: Producer<f32>,
    state: Arc<StreamState>,
) -> AudioResult<Stream> {
    let config = stream_config(supported, buffer_size);

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut dropped = 0;
                for &sample in data {
                    if producer.push(sample).is_err() {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    state.overruns.fetch_add(dropped, Ordering::Relaxed);
                }
            },
            move |err| {
                log::error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

fn build_output_stream(
    device: &Device,
    supported: &SupportedStreamConfig,
    buffer_size: BufferSize,
    mut consumer: Consumer<f32>,
    input_channels: usize,
    state: Arc<StreamState>,
) -> AudioResult<Stream> {
    let config = stream_config(supported, buffer_size);
    let output_channels = supported.channels() as usize;

    // Pre-allocated; callbacks larger than this run in pieces
    let mut buffers = PeriodBuffers::new(MAX_BLOCK_SIZE.max(buffer_size.as_usize()));

    device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let capacity = buffers.capacity();
                for block in data.chunks_mut(capacity * output_channels) {
                    let frames = block.len() / output_channels;

                    let missing = deinterleave_input(&mut consumer, input_channels, &mut buffers, frames);
                    if missing > 0 {
                        state.underruns.fetch_add(missing as u64, Ordering::Relaxed);
                    }

                    match state.processor.try_lock() {
                        Some(mut guard) => match guard.as_mut() {
                            Some(processor) => buffers.dispatch(processor.as_mut(), frames),
                            None => buffers.dispatch(&mut Silence, frames),
                        },
                        None => buffers.dispatch(&mut Silence, frames),
                    }

                    interleave_output(&buffers, block, output_channels);
                }
            },
            move |err| {
                log::error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Stand-in while the processor is unavailable
struct Silence;

impl AudioProcessor for Silence {
    fn process_period(&mut self, _buffers: ear_core::ProcessBuffers<'_>) {}
}

/// Pull `frames` interleaved frames from the ring into the planar buffers.
///
/// Missing samples read as silence; returns how many were missing.
fn deinterleave_input(
    consumer: &mut Consumer<f32>,
    channels: usize,
    buffers: &mut PeriodBuffers,
    frames: usize,
) -> usize {
    let mut missing = 0;

    for frame in 0..frames {
        let mut values = [0.0_f64; MAX_INPUT_CHANNELS];
        for channel in 0..channels {
            match consumer.pop() {
                Ok(sample) if channel < MAX_INPUT_CHANNELS => values[channel] = sample as f64,
                Ok(_) => {}
                Err(_) => missing += 1,
            }
        }

        // Mono input feeds both microphone channels
        let right_mic = if channels == 1 { values[0] } else { values[1] };
        buffers.microphone_mut(0)[frame] = values[0];
        buffers.microphone_mut(1)[frame] = right_mic;
        buffers.reference_mut(0)[frame] = values[2];
        buffers.reference_mut(1)[frame] = values[3];
    }

    missing
}

/// Write the planar stereo output into an interleaved device block
fn interleave_output(buffers: &PeriodBuffers, block: &mut [f32], channels: usize) {
    let (left, right) = (buffers.output(0), buffers.output(1));

    match channels {
        1 => {
            for (i, sample) in block.iter_mut().enumerate() {
                *sample = ((left[i] + right[i]) * 0.5) as f32;
            }
        }
        _ => {
            for (i, frame) in block.chunks_mut(channels).enumerate() {
                frame[0] = left[i] as f32;
                frame[1] = right[i] as f32;
                frame[2..].fill(0.0);
            }
        }
    }
}
