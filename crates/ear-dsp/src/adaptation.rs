//! Spectral Adaptation
//!
//! Nudges an equalizer's gain controls so the microphone spectrum follows
//! the latency-compensated reference spectrum. Runs on the audio thread once
//! per period and channel.

use ear_core::{AdaptationSettings, MAX_BLOCK_SIZE, MAX_CONTROLS, Sample};

use crate::equalizer::Equalizer;
use crate::fft::MagnitudeAnalyzer;
use crate::history::ReferenceHistory;

/// What an adaptation step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationOutcome {
    /// Controls moved and the kernel was rebuilt
    Updated,
    /// Not enough reference history for the current latency yet
    InsufficientHistory,
    /// The control thread held the controls; retried next period
    ControlsBusy,
}

/// Spectral comparison state, shared by both channels
pub struct AdaptationEngine {
    settings: AdaptationSettings,
    analyzer: MagnitudeAnalyzer,
    delayed_reference: Vec<Sample>,
    microphone_magnitudes: Vec<f64>,
    reference_magnitudes: Vec<f64>,
}

impl AdaptationEngine {
    pub fn new(settings: AdaptationSettings) -> Self {
        Self {
            settings,
            analyzer: MagnitudeAnalyzer::new(),
            delayed_reference: vec![0.0; MAX_BLOCK_SIZE],
            microphone_magnitudes: vec![0.0; MAX_CONTROLS],
            reference_magnitudes: vec![0.0; MAX_CONTROLS],
        }
    }

    pub fn settings(&self) -> &AdaptationSettings {
        &self.settings
    }

    /// Compare one channel's microphone block against the reference that is
    /// `latency` samples old and update `equalizer` accordingly.
    pub fn update_controls(
        &mut self,
        microphone: &[Sample],
        history: &ReferenceHistory,
        latency: usize,
        equalizer: &mut Equalizer,
    ) -> AdaptationOutcome {
        let microphone = &microphone[microphone.len().saturating_sub(MAX_BLOCK_SIZE)..];
        let delayed = &mut self.delayed_reference[..microphone.len()];

        if !history.copy_delayed(latency, delayed) {
            return AdaptationOutcome::InsufficientHistory;
        }

        self.analyzer
            .analyze(microphone, &mut self.microphone_magnitudes);
        self.analyzer
            .analyze(delayed, &mut self.reference_magnitudes);

        {
            let Some(mut controls) = equalizer.try_acquire_controls() else {
                return AdaptationOutcome::ControlsBusy;
            };
            adapt_controls(
                &mut controls,
                &self.reference_magnitudes,
                &self.microphone_magnitudes,
                &self.settings,
            );
        }

        equalizer.try_generate_filter();
        AdaptationOutcome::Updated
    }
}

/// One adaptation step over a control vector:
/// spectral gap step, 3-tap moving average, clamp.
pub fn adapt_controls(
    controls: &mut [f64],
    reference: &[f64],
    microphone: &[f64],
    settings: &AdaptationSettings,
) {
    let bins = controls.len().min(reference.len()).min(microphone.len());

    // Higher bins adapt more slowly
    for (i, control) in controls[..bins].iter_mut().enumerate() {
        let gap = reference[i] - microphone[i];
        *control += gap / settings.step_divisor / (settings.rate_offset - i as f64);
    }

    smooth(controls);

    for control in controls.iter_mut() {
        *control = control.clamp(settings.control_floor, settings.control_ceiling);
    }
}

/// Mean of each inner value and its neighbours, ends untouched
fn smooth(controls: &mut [f64]) {
    let n = controls.len();
    if n < 3 {
        return;
    }

    let mut previous = controls[0];
    for i in 1..n - 1 {
        let current = controls[i];
        controls[i] = (previous + current + controls[i + 1]) / 3.0;
        previous = current;
    }
}
