//! Processor - per-callback entry point of the adaptive engine
//!
//! Owns everything the audio thread touches:
//! - two equalizers (left/right)
//! - the spectral adaptation engine and reference histories
//! - the latency calibrator
//! - the built-in noise sources
//!
//! The control thread talks to it through [`ProcessorHandle`] (atomics and
//! the equalizers' control handles) and hears back through
//! [`ProcessorEvents`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use rtrb::{Consumer, Producer, RingBuffer};

use ear_core::{
    Channel, EarConfig, EarResult, MAX_BLOCK_SIZE, OperationMode, ProcessBuffers, Sample,
    SampleRate, SignalSource, peak_level,
};

use crate::adaptation::AdaptationEngine;
use crate::calibration::{LatencyCalibrator, StereoLatency};
use crate::equalizer::{ControlsHandle, Equalizer};
use crate::history::ReferenceHistory;
use crate::noise::{PinkNoise, WhiteNoise};

/// Pending notifications kept for the control thread
const EVENT_QUEUE_CAPACITY: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Notifications sent from the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorEvent {
    /// Calibration converged; latencies in samples, margin included
    CalibrationFinished { left: usize, right: usize },
}

/// Receiving end of the processor's event queue
pub struct ProcessorEvents {
    consumer: Consumer<ProcessorEvent>,
}

impl ProcessorEvents {
    /// Next pending event, if any
    pub fn pop(&mut self) -> Option<ProcessorEvent> {
        self.consumer.pop().ok()
    }

    /// Drain all pending events
    pub fn drain(&mut self) -> impl Iterator<Item = ProcessorEvent> + '_ {
        std::iter::from_fn(move || self.pop())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE (lock-free)
// ═══════════════════════════════════════════════════════════════════════════════

/// f64 stored as bits
#[derive(Debug, Default)]
struct AtomicLevel(AtomicU64);

impl AtomicLevel {
    #[inline]
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct SharedState {
    mode: AtomicU8,
    /// Set by `calibrate()`, consumed by the audio thread
    calibration_requested: AtomicBool,
    calibration_finished: AtomicBool,
    automatic_adaption: AtomicBool,
    bypass: AtomicBool,
    signal_source: AtomicU8,
    latency: [AtomicUsize; 2],
    microphone_level: [AtomicLevel; 2],
    reference_level: [AtomicLevel; 2],
}

impl SharedState {
    fn new(config: &EarConfig) -> Self {
        Self {
            mode: AtomicU8::new(OperationMode::ProcessingAudio as u8),
            calibration_requested: AtomicBool::new(false),
            calibration_finished: AtomicBool::new(false),
            automatic_adaption: AtomicBool::new(config.automatic_adaption),
            bypass: AtomicBool::new(config.bypass),
            signal_source: AtomicU8::new(config.signal_source as u8),
            latency: [AtomicUsize::new(0), AtomicUsize::new(0)],
            microphone_level: Default::default(),
            reference_level: Default::default(),
        }
    }

    #[inline]
    fn mode(&self) -> OperationMode {
        OperationMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    #[inline]
    fn set_mode(&self, mode: OperationMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Control-thread API. Cheap to clone; every call is non-blocking except
/// the ones that go through a [`ControlsHandle`].
#[derive(Clone)]
pub struct ProcessorHandle {
    shared: Arc<SharedState>,
    controls: [ControlsHandle; 2],
}

impl ProcessorHandle {
    /// Start a fresh latency calibration; any running one is restarted
    pub fn calibrate(&self) {
        self.shared.calibration_finished.store(false, Ordering::Release);
        self.shared.set_mode(OperationMode::CalibratingLatency);
        self.shared.calibration_requested.store(true, Ordering::Release);
        log::info!("Latency calibration requested");
    }

    /// Switch to adaptive equalization, cancelling a running calibration
    pub fn set_mode_to_rectification(&self) {
        self.shared.set_mode(OperationMode::ProcessingAudio);
    }

    pub fn set_automatic_adaption_active(&self, active: bool) {
        self.shared.automatic_adaption.store(active, Ordering::Relaxed);
    }

    pub fn is_automatic_adaption_active(&self) -> bool {
        self.shared.automatic_adaption.load(Ordering::Relaxed)
    }

    pub fn set_bypass_active(&self, active: bool) {
        self.shared.bypass.store(active, Ordering::Relaxed);
    }

    pub fn is_bypass_active(&self) -> bool {
        self.shared.bypass.load(Ordering::Relaxed)
    }

    pub fn set_signal_source(&self, source: SignalSource) {
        self.shared.signal_source.store(source as u8, Ordering::Relaxed);
    }

    pub fn signal_source(&self) -> SignalSource {
        SignalSource::from_u8(self.shared.signal_source.load(Ordering::Relaxed))
    }

    /// Peak |x| of the last callback's left microphone input
    pub fn microphone_level_left(&self) -> f64 {
        self.shared.microphone_level[0].get()
    }

    pub fn microphone_level_right(&self) -> f64 {
        self.shared.microphone_level[1].get()
    }

    /// Peak |x| of the last callback's left reference
    pub fn signal_source_level_left(&self) -> f64 {
        self.shared.reference_level[0].get()
    }

    pub fn signal_source_level_right(&self) -> f64 {
        self.shared.reference_level[1].get()
    }

    /// Round-trip latency in samples, margin included
    pub fn left_latency(&self) -> usize {
        self.shared.latency[0].load(Ordering::Acquire)
    }

    pub fn right_latency(&self) -> usize {
        self.shared.latency[1].load(Ordering::Acquire)
    }

    pub fn mode(&self) -> OperationMode {
        self.shared.mode()
    }

    /// True once the last requested calibration converged
    pub fn is_calibration_finished(&self) -> bool {
        self.shared.calibration_finished.load(Ordering::Acquire)
    }

    /// Gain controls of one channel's equalizer
    pub fn equalizer(&self, channel: Channel) -> ControlsHandle {
        self.controls[channel.index()].clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Real-time half of the engine, driven once per audio callback
pub struct Processor {
    shared: Arc<SharedState>,
    events: Producer<ProcessorEvent>,
    equalizers: [Equalizer; 2],
    adaptation: AdaptationEngine,
    calibrator: LatencyCalibrator,
    history: [ReferenceHistory; 2],
    white: [WhiteNoise; 2],
    pink: [PinkNoise; 2],
    /// Reference actually used for the current chunk
    reference: [Vec<Sample>; 2],
    latency: StereoLatency,
    /// Mode seen on the previous chunk
    last_mode: OperationMode,
}

impl Processor {
    /// Build the processor and its control-thread counterparts.
    ///
    /// All buffers are allocated here; `process` never allocates.
    pub fn new(
        config: &EarConfig,
        sample_rate: SampleRate,
    ) -> EarResult<(Self, ProcessorHandle, ProcessorEvents)> {
        config.validate()?;

        let eq = &config.equalizer;
        let equalizers = [
            Equalizer::new(eq.number_of_controls, eq.filter_spread),
            Equalizer::new(eq.number_of_controls, eq.filter_spread),
        ];

        let history_len = (sample_rate.as_f64() * config.history_seconds).ceil() as usize;
        let seed = config.noise_seed;
        let amplitude = config.noise_amplitude;

        let shared = Arc::new(SharedState::new(config));
        let (producer, consumer) = RingBuffer::new(EVENT_QUEUE_CAPACITY);

        let handle = ProcessorHandle {
            shared: Arc::clone(&shared),
            controls: [equalizers[0].controls_handle(), equalizers[1].controls_handle()],
        };

        log::info!(
            "Processor ready: {} Hz, {} controls, spread {}, {} samples of history",
            sample_rate.as_u32(),
            equalizers[0].number_of_controls(),
            equalizers[0].filter_spread(),
            history_len
        );

        let processor = Self {
            shared,
            events: producer,
            equalizers,
            adaptation: AdaptationEngine::new(config.adaptation.clone()),
            calibrator: LatencyCalibrator::new(config.calibration.clone()),
            history: [
                ReferenceHistory::new(history_len),
                ReferenceHistory::new(history_len),
            ],
            white: [
                WhiteNoise::new(amplitude, seed),
                WhiteNoise::new(amplitude, seed.wrapping_add(1)),
            ],
            pink: [
                PinkNoise::new(amplitude, seed.wrapping_add(2)),
                PinkNoise::new(amplitude, seed.wrapping_add(3)),
            ],
            reference: [vec![0.0; MAX_BLOCK_SIZE], vec![0.0; MAX_BLOCK_SIZE]],
            latency: [0; 2],
            last_mode: OperationMode::ProcessingAudio,
        };

        Ok((processor, handle, consumer.into()))
    }

    /// Latencies the audio thread currently compensates
    pub fn latency(&self) -> StereoLatency {
        self.latency
    }

    pub fn equalizer(&self, channel: Channel) -> &Equalizer {
        &self.equalizers[channel.index()]
    }

    /// Process one callback. Oversized callbacks run in 4096-sample chunks.
    pub fn process(&mut self, mut buffers: ProcessBuffers<'_>) {
        let len = buffers.len();

        self.shared.microphone_level[0].set(peak_level(buffers.microphone_left));
        self.shared.microphone_level[1].set(peak_level(buffers.microphone_right));

        let mut reference_peak = [0.0_f64; 2];
        let mut start = 0;
        while start < len {
            let end = (start + MAX_BLOCK_SIZE).min(len);
            let peaks = self.process_chunk(buffers.slice(start, end));
            reference_peak[0] = reference_peak[0].max(peaks[0]);
            reference_peak[1] = reference_peak[1].max(peaks[1]);
            start = end;
        }

        self.shared.reference_level[0].set(reference_peak[0]);
        self.shared.reference_level[1].set(reference_peak[1]);
    }

    /// Returns the reference peaks of the chunk
    fn process_chunk(&mut self, chunk: ProcessBuffers<'_>) -> [Sample; 2] {
        if self.shared.calibration_requested.swap(false, Ordering::AcqRel) {
            self.calibrator.reset();
        }

        let mode = self.shared.mode();
        if self.last_mode == OperationMode::CalibratingLatency
            && mode == OperationMode::ProcessingAudio
        {
            self.calibrator.reset();
            log::info!("Latency calibration cancelled");
        }
        self.last_mode = mode;

        match mode {
            OperationMode::CalibratingLatency => {
                self.calibrate_chunk(chunk);
                [0.0; 2]
            }
            OperationMode::ProcessingAudio => self.rectify_chunk(chunk),
        }
    }

    fn calibrate_chunk(&mut self, chunk: ProcessBuffers<'_>) {
        let Some(latency) = self.calibrator.process(
            chunk.microphone_left,
            chunk.microphone_right,
            chunk.output_left,
            chunk.output_right,
        ) else {
            return;
        };

        self.latency = latency;
        self.shared.latency[0].store(latency[0], Ordering::Release);
        self.shared.latency[1].store(latency[1], Ordering::Release);
        self.shared.set_mode(OperationMode::ProcessingAudio);
        self.last_mode = OperationMode::ProcessingAudio;
        self.shared.calibration_finished.store(true, Ordering::Release);

        // A full queue only loses the notification; the flag stays set
        let event = ProcessorEvent::CalibrationFinished {
            left: latency[0],
            right: latency[1],
        };
        if self.events.push(event).is_err() {
            log::warn!("Event queue full, calibration notification dropped");
        }
        log::info!(
            "Latency calibration finished: left {} samples, right {} samples",
            latency[0],
            latency[1]
        );
    }

    fn rectify_chunk(&mut self, chunk: ProcessBuffers<'_>) -> [Sample; 2] {
        let len = chunk.len();
        let source = SignalSource::from_u8(self.shared.signal_source.load(Ordering::Relaxed));
        let adapt = self.shared.automatic_adaption.load(Ordering::Relaxed);
        let bypass = self.shared.bypass.load(Ordering::Relaxed);

        let microphone = [chunk.microphone_left, chunk.microphone_right];
        let external = [chunk.reference_left, chunk.reference_right];
        let outputs = [chunk.output_left, chunk.output_right];
        let mut peaks = [0.0; 2];

        for (c, output) in outputs.into_iter().enumerate() {
            let reference = &mut self.reference[c][..len];
            match source {
                SignalSource::External => reference.copy_from_slice(external[c]),
                SignalSource::WhiteNoise => self.white[c].fill(reference),
                SignalSource::PinkNoise => self.pink[c].fill(reference),
            }
            let reference = &self.reference[c][..len];
            peaks[c] = peak_level(reference);

            self.history[c].push(reference);

            let equalizer = &mut self.equalizers[c];
            if adapt && !bypass {
                self.adaptation.update_controls(
                    microphone[c],
                    &self.history[c],
                    self.latency[c],
                    equalizer,
                );
            }

            // Control-thread writes land here
            if equalizer.controls_changed() {
                equalizer.try_generate_filter();
            }

            equalizer.process(reference, output);
            if bypass {
                output.copy_from_slice(reference);
            }
        }

        peaks
    }
}

impl From<Consumer<ProcessorEvent>> for ProcessorEvents {
    fn from(consumer: Consumer<ProcessorEvent>) -> Self {
        Self { consumer }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const PERIOD: usize = 512;

    fn processor(config: EarConfig) -> (Processor, ProcessorHandle, ProcessorEvents) {
        Processor::new(&config, SampleRate::Hz48000).unwrap()
    }

    fn run(
        processor: &mut Processor,
        microphone: &[f64],
        reference: &[f64],
    ) -> (Vec<f64>, Vec<f64>) {
        let mut out_l = vec![0.0; reference.len()];
        let mut out_r = vec![0.0; reference.len()];
        processor.process(ProcessBuffers {
            microphone_left: microphone,
            microphone_right: microphone,
            reference_left: reference,
            reference_right: reference,
            output_left: &mut out_l,
            output_right: &mut out_r,
        });
        (out_l, out_r)
    }

    fn sine(len: usize) -> Vec<f64> {
        (0..len).map(|i| 0.5 * (i as f64 * 0.05).sin()).collect()
    }

    #[test]
    fn test_unity_equalizer_delays_reference() {
        let config = EarConfig {
            automatic_adaption: false,
            ..Default::default()
        };
        let (mut processor, _handle, _events) = processor(config);
        let reference = sine(PERIOD);
        let (out_l, out_r) = run(&mut processor, &vec![0.0; PERIOD], &reference);

        for t in 100..PERIOD {
            assert_abs_diff_eq!(out_l[t], reference[t - 100], epsilon = 1e-9);
            assert_abs_diff_eq!(out_r[t], reference[t - 100], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_bypass_passes_reference_through() {
        let (mut processor, handle, _events) = processor(EarConfig::default());
        handle.set_bypass_active(true);
        handle.equalizer(Channel::Left).reset(0.5);

        let reference = sine(PERIOD);
        let (out_l, _) = run(&mut processor, &sine(PERIOD), &reference);
        assert_eq!(out_l, reference);

        // Controls stay frozen while bypassed
        assert!(handle.equalizer(Channel::Right).acquire().iter().all(|&c| c == 1.0));
    }

    #[test]
    fn test_meters_track_last_callback() {
        let (mut processor, handle, _events) = processor(EarConfig::default());
        let microphone = vec![-0.25; PERIOD];
        let reference = sine(PERIOD);
        run(&mut processor, &microphone, &reference);

        assert_eq!(handle.microphone_level_left(), 0.25);
        assert_eq!(handle.microphone_level_right(), 0.25);
        assert_eq!(handle.signal_source_level_left(), peak_level(&reference));

        run(&mut processor, &vec![0.0; PERIOD], &vec![0.0; PERIOD]);
        assert_eq!(handle.microphone_level_left(), 0.0);
        assert_eq!(handle.signal_source_level_right(), 0.0);
    }

    #[test]
    fn test_noise_source_replaces_reference() {
        let (mut processor, handle, _events) = processor(EarConfig::default());
        handle.set_signal_source(SignalSource::WhiteNoise);
        handle.set_bypass_active(true);

        let (out_l, out_r) = run(&mut processor, &vec![0.0; PERIOD], &vec![0.0; PERIOD]);
        assert!(peak_level(&out_l) > 0.1);
        assert!(peak_level(&out_l) <= 0.5);
        assert_ne!(out_l, out_r);
        assert_eq!(handle.signal_source_level_left(), peak_level(&out_l));

        handle.set_signal_source(SignalSource::PinkNoise);
        let (out_l, _) = run(&mut processor, &vec![0.0; PERIOD], &vec![0.0; PERIOD]);
        assert!(peak_level(&out_l) > 0.0);
    }

    #[test]
    fn test_control_thread_writes_regenerate_filter() {
        let config = EarConfig {
            automatic_adaption: false,
            ..Default::default()
        };
        let (mut processor, handle, _events) = processor(config);
        handle.equalizer(Channel::Left).reset(0.25);

        run(&mut processor, &vec![0.0; PERIOD], &sine(PERIOD));
        assert_abs_diff_eq!(
            processor.equalizer(Channel::Left).coefficients()[100],
            0.25,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            processor.equalizer(Channel::Right).coefficients()[100],
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_calibration_outputs_click_then_silence() {
        let (mut processor, handle, _events) = processor(EarConfig::default());
        handle.calibrate();
        assert_eq!(handle.mode(), OperationMode::CalibratingLatency);

        let (out_l, out_r) = run(&mut processor, &vec![0.0; PERIOD], &sine(PERIOD));
        assert_eq!(out_l[PERIOD - 1], 1.0);
        assert_eq!(out_r[PERIOD - 1], 1.0);
        assert_eq!(peak_level(&out_l[..PERIOD - 1]), 0.0);

        let (out_l, _) = run(&mut processor, &vec![0.0; PERIOD], &sine(PERIOD));
        assert_eq!(peak_level(&out_l), 0.0);
        assert!(!handle.is_calibration_finished());
    }

    #[test]
    fn test_cancel_calibration_returns_to_rectification() {
        let config = EarConfig {
            automatic_adaption: false,
            ..Default::default()
        };
        let (mut processor, handle, mut events) = processor(config);
        handle.calibrate();
        run(&mut processor, &vec![0.0; PERIOD], &sine(PERIOD));

        handle.set_mode_to_rectification();
        let reference = sine(PERIOD);
        let (out_l, _) = run(&mut processor, &vec![0.0; PERIOD], &reference);

        assert_eq!(handle.mode(), OperationMode::ProcessingAudio);
        assert!(peak_level(&out_l) > 0.1);
        assert!(events.pop().is_none());
        assert!(!handle.is_calibration_finished());
    }

    #[test]
    fn test_oversized_callback_is_chunked() {
        let config = EarConfig {
            automatic_adaption: false,
            ..Default::default()
        };
        let (mut whole, _h1, _e1) = processor(config.clone());
        let (mut split, _h2, _e2) = processor(config);

        let reference = sine(10_000);
        let silence = vec![0.0; 10_000];
        let (expected, _) = run(&mut whole, &silence, &reference);

        let mut actual = Vec::new();
        for (mic, reference) in silence.chunks(1000).zip(reference.chunks(1000)) {
            actual.extend(run(&mut split, mic, reference).0);
        }
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_arbitrary_control_count() {
        let mut config = EarConfig::default();
        config.equalizer.number_of_controls = 1000;
        assert!(config.validate().is_ok());

        let (mut processor, handle, _events) = processor(config);
        assert_eq!(processor.equalizer(Channel::Left).number_of_controls(), 1000);
        assert_eq!(handle.equalizer(Channel::Right).len(), 1000);

        let reference = sine(PERIOD);
        for _ in 0..4 {
            run(&mut processor, &sine(PERIOD), &reference);
        }
        let controls = handle.equalizer(Channel::Left).acquire().to_vec();
        assert!(controls.iter().all(|&c| (0.01..=1.0).contains(&c)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EarConfig::default();
        config.history_seconds = 0.0;
        assert!(Processor::new(&config, SampleRate::Hz48000).is_err());
    }
}
