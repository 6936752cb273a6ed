//! Simulated room transport tests
//!
//! Verifies:
//! - echo path timing and gain
//! - transport lifecycle errors
//! - end-to-end calibration through the transport

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ear_audio::{AudioError, AudioProcessor, AudioTransport, SimulatedRoom};
use ear_core::{BufferSize, EarConfig, OperationMode, ProcessBuffers, SampleRate, SignalSource};
use ear_dsp::Processor;
use parking_lot::Mutex;

const PERIOD: BufferSize = BufferSize::Samples256;

/// Emits one impulse and records every microphone sample it hears
struct Probe {
    emitted: bool,
    heard: Arc<Mutex<Vec<f64>>>,
}

impl AudioProcessor for Probe {
    fn process_period(&mut self, buffers: ProcessBuffers<'_>) {
        self.heard.lock().extend_from_slice(buffers.microphone_left);
        if !self.emitted {
            buffers.output_left[0] = 1.0;
            self.emitted = true;
        }
    }
}

fn probe() -> (Box<Probe>, Arc<Mutex<Vec<f64>>>) {
    let heard = Arc::new(Mutex::new(Vec::new()));
    let probe = Box::new(Probe {
        emitted: false,
        heard: Arc::clone(&heard),
    });
    (probe, heard)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ECHO PATH
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_echo_arrives_after_delay() {
    for delay in [256, 300, 1000] {
        let mut room = SimulatedRoom::new(SampleRate::Hz48000, PERIOD, delay, 0.5);
        let (probe, heard) = probe();
        room.activate(probe).unwrap();
        room.run_periods(8).unwrap();

        let heard = heard.lock();
        assert_eq!(heard.len(), 8 * 256);
        assert_abs_diff_eq!(heard[delay], 0.5);
        let energy: f64 = heard.iter().map(|x| x.abs()).sum();
        assert_abs_diff_eq!(energy, 0.5, epsilon = 1e-12);
    }
}

#[test]
fn test_echo_within_same_period_is_lost() {
    let mut room = SimulatedRoom::new(SampleRate::Hz48000, PERIOD, 100, 1.0);
    let (probe, heard) = probe();
    room.activate(probe).unwrap();
    room.run_periods(4).unwrap();

    assert!(heard.lock().iter().all(|&x| x == 0.0));
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_transport_lifecycle() {
    let mut room = SimulatedRoom::new(SampleRate::Hz44100, PERIOD, 600, 1.0);
    assert!(!room.is_active());
    assert!(matches!(room.run_periods(1), Err(AudioError::NotActive)));
    assert!(matches!(room.deactivate(), Err(AudioError::NotActive)));

    let (first, _) = probe();
    let (second, _) = probe();
    room.activate(first).unwrap();
    assert!(matches!(room.activate(second), Err(AudioError::AlreadyActive)));

    room.run_periods(3).unwrap();
    assert_eq!(room.periods(), 3);
    assert_eq!(room.sample_rate(), SampleRate::Hz44100);
    assert_eq!(room.buffer_size(), PERIOD);

    assert!(room.deactivate().is_ok());
    assert!(!room.is_active());
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROCESSOR IN THE ROOM
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_calibration_through_transport() {
    let delay = 1500;
    let (processor, handle, mut events) =
        Processor::new(&EarConfig::default(), SampleRate::Hz48000).unwrap();

    let mut room = SimulatedRoom::new(SampleRate::Hz48000, PERIOD, delay, 0.95);
    room.activate(Box::new(processor)).unwrap();

    handle.calibrate();
    for _ in 0..500 {
        room.run_periods(1).unwrap();
        if handle.is_calibration_finished() {
            break;
        }
    }

    assert!(handle.is_calibration_finished());
    assert_eq!(handle.mode(), OperationMode::ProcessingAudio);
    assert_eq!(handle.left_latency(), delay + 50);
    assert_eq!(handle.right_latency(), delay + 50);
    assert!(events.pop().is_some());
}

#[test]
fn test_external_reference_reaches_output() {
    let config = EarConfig {
        bypass: true,
        ..Default::default()
    };
    let (processor, handle, _events) = Processor::new(&config, SampleRate::Hz48000).unwrap();
    assert_eq!(handle.signal_source(), SignalSource::External);

    let mut room = SimulatedRoom::new(SampleRate::Hz48000, PERIOD, 700, 0.5).with_reference(
        Box::new(|left: &mut [f64], right: &mut [f64]| {
            left.fill(0.25);
            right.fill(-0.25);
        }),
    );
    room.activate(Box::new(processor)).unwrap();
    room.run_periods(2).unwrap();

    assert!(room.last_output(0).iter().all(|&x| x == 0.25));
    assert!(room.last_output(1).iter().all(|&x| x == -0.25));
    assert_eq!(handle.signal_source_level_left(), 0.25);
}
