//! Transport abstraction
//!
//! Provides:
//! - `AudioProcessor`, the per-period callback a transport drives
//! - `AudioTransport`, the narrow interface every audio binding implements
//! - `PeriodBuffers`, pre-allocated planar scratch shared by the bindings

use ear_core::{BufferSize, ProcessBuffers, Sample, SampleRate};
use ear_dsp::Processor;

use crate::AudioResult;

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO PROCESSOR TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Anything a transport can drive once per audio period
pub trait AudioProcessor: Send + 'static {
    /// Process one period.
    ///
    /// Runs on the real-time thread: must not block or allocate.
    fn process_period(&mut self, buffers: ProcessBuffers<'_>);
}

impl AudioProcessor for Processor {
    #[inline]
    fn process_period(&mut self, buffers: ProcessBuffers<'_>) {
        self.process(buffers);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// An audio binding: owns the period clock and calls the processor
pub trait AudioTransport {
    fn sample_rate(&self) -> SampleRate;

    /// Nominal frames per period
    fn buffer_size(&self) -> BufferSize;

    /// Start calling `processor` once per period
    fn activate(&mut self, processor: Box<dyn AudioProcessor>) -> AudioResult<()>;

    /// Stop the period clock and hand the processor back
    fn deactivate(&mut self) -> AudioResult<Box<dyn AudioProcessor>>;

    fn is_active(&self) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════════
// PERIOD BUFFERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Planar stereo scratch for one period: microphone, reference, output
pub struct PeriodBuffers {
    microphone: [Vec<Sample>; 2],
    reference: [Vec<Sample>; 2],
    output: [Vec<Sample>; 2],
}

impl PeriodBuffers {
    pub fn new(max_frames: usize) -> Self {
        let channel = || vec![0.0; max_frames];
        Self {
            microphone: [channel(), channel()],
            reference: [channel(), channel()],
            output: [channel(), channel()],
        }
    }

    /// Largest period these buffers hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.output[0].len()
    }

    #[inline]
    pub fn microphone_mut(&mut self, channel: usize) -> &mut [Sample] {
        &mut self.microphone[channel]
    }

    #[inline]
    pub fn reference_mut(&mut self, channel: usize) -> &mut [Sample] {
        &mut self.reference[channel]
    }

    /// Both reference channels at once
    #[inline]
    pub fn references_mut(&mut self) -> (&mut [Sample], &mut [Sample]) {
        let [left, right] = &mut self.reference;
        (left, right)
    }

    #[inline]
    pub fn output(&self, channel: usize) -> &[Sample] {
        &self.output[channel]
    }

    /// Run `processor` over the first `frames` frames.
    ///
    /// Outputs are zeroed first, so a processor that writes nothing plays
    /// silence.
    pub fn dispatch(&mut self, processor: &mut dyn AudioProcessor, frames: usize) {
        let frames = frames.min(self.capacity());
        let [output_left, output_right] = &mut self.output;
        output_left[..frames].fill(0.0);
        output_right[..frames].fill(0.0);

        processor.process_period(ProcessBuffers {
            microphone_left: &self.microphone[0][..frames],
            microphone_right: &self.microphone[1][..frames],
            reference_left: &self.reference[0][..frames],
            reference_right: &self.reference[1][..frames],
            output_left: &mut output_left[..frames],
            output_right: &mut output_right[..frames],
        });
    }
}
