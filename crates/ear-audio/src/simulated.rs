//! Simulated room transport
//!
//! Deterministic in-process stand-in for a sound card. Whatever the
//! processor plays comes back on the microphones `delay` samples later,
//! scaled by `gain`. Periods are driven explicitly with `run_periods`.

use std::collections::VecDeque;

use ear_core::{BufferSize, Sample, SampleRate};

use crate::engine::{AudioProcessor, AudioTransport, PeriodBuffers};
use crate::{AudioError, AudioResult};

/// Produces the external reference for one period (left, right)
pub type ReferenceSource = Box<dyn FnMut(&mut [Sample], &mut [Sample]) + Send>;

/// Loudspeaker-to-microphone path with a fixed delay and gain
pub struct SimulatedRoom {
    sample_rate: SampleRate,
    buffer_size: BufferSize,
    delay: usize,
    gain: f64,
    /// Played output not yet heard, per channel; always `delay` samples long
    in_flight: [VecDeque<Sample>; 2],
    reference: Option<ReferenceSource>,
    processor: Option<Box<dyn AudioProcessor>>,
    buffers: PeriodBuffers,
    periods: u64,
}

impl SimulatedRoom {
    pub fn new(sample_rate: SampleRate, buffer_size: BufferSize, delay: usize, gain: f64) -> Self {
        let line = || VecDeque::from(vec![0.0; delay]);
        Self {
            sample_rate,
            buffer_size,
            delay,
            gain,
            in_flight: [line(), line()],
            reference: None,
            processor: None,
            buffers: PeriodBuffers::new(buffer_size.as_usize()),
            periods: 0,
        }
    }

    /// Feed an external reference; without one the reference inputs are silent
    pub fn with_reference(mut self, source: ReferenceSource) -> Self {
        self.reference = Some(source);
        self
    }

    /// Periods run since construction
    #[inline]
    pub fn periods(&self) -> u64 {
        self.periods
    }

    /// Output of the last period
    pub fn last_output(&self, channel: usize) -> &[Sample] {
        self.buffers.output(channel)
    }

    /// Run `count` periods through the active processor
    pub fn run_periods(&mut self, count: usize) -> AudioResult<()> {
        let mut processor = self.processor.take().ok_or(AudioError::NotActive)?;
        for _ in 0..count {
            self.run_period(processor.as_mut());
        }
        self.processor = Some(processor);
        Ok(())
    }

    fn run_period(&mut self, processor: &mut dyn AudioProcessor) {
        let frames = self.buffers.capacity();

        // The microphone hears output from `delay` samples ago. With a delay
        // shorter than the period, output of this same period is not
        // available yet and reads as silence.
        for channel in 0..2 {
            let available = self.in_flight[channel].len().min(frames);
            let gain = self.gain;
            let heard = self.in_flight[channel].drain(..available);
            let microphone = self.buffers.microphone_mut(channel);
            for (mic, played) in microphone.iter_mut().zip(heard) {
                *mic = played * gain;
            }
            microphone[available..].fill(0.0);
        }

        match self.reference.as_mut() {
            Some(source) => {
                let (left, right) = self.buffers.references_mut();
                source(left, right);
            }
            None => {
                let (left, right) = self.buffers.references_mut();
                left.fill(0.0);
                right.fill(0.0);
            }
        }

        self.buffers.dispatch(processor, frames);

        // Keep the most recent `delay` output samples in flight
        let keep_from = frames.saturating_sub(self.delay);
        for channel in 0..2 {
            let output = &self.buffers.output(channel)[keep_from..];
            self.in_flight[channel].extend(output.iter().copied());
        }

        self.periods += 1;
    }
}

impl AudioTransport for SimulatedRoom {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn buffer_size(&self) -> BufferSize {
        self.buffer_size
    }

    fn activate(&mut self, processor: Box<dyn AudioProcessor>) -> AudioResult<()> {
        if self.processor.is_some() {
            return Err(AudioError::AlreadyActive);
        }
        log::info!(
            "Simulated room: delay {} samples, gain {}",
            self.delay,
            self.gain
        );
        self.processor = Some(processor);
        Ok(())
    }

    fn deactivate(&mut self) -> AudioResult<Box<dyn AudioProcessor>> {
        self.processor.take().ok_or(AudioError::NotActive)
    }

    fn is_active(&self) -> bool {
        self.processor.is_some()
    }
}
