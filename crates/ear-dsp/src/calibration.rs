//! Latency Calibration
//!
//! Measures the acoustic round trip with a click train:
//! - emit a single full-scale sample at the end of a period
//! - watch the microphone until a strong enough peak shows up far enough
//!   after the click
//! - repeat until enough measurements are collected, then vote
//!
//! Offsets count samples elapsed since the click itself. The click is the
//! last sample of its period, so the next period starts one sample later.

use ear_core::{CalibrationSettings, Sample};

/// Offset of the first sample of the period after the click
const CLICK_ORIGIN: usize = 1;

/// Per-channel round-trip latencies in samples
pub type StereoLatency = [usize; 2];

/// Click-train latency calibrator
#[derive(Debug, Clone)]
pub struct LatencyCalibrator {
    settings: CalibrationSettings,
    waiting_for_click: bool,
    offset: usize,
    measurements: [Vec<usize>; 2],
}

impl LatencyCalibrator {
    pub fn new(settings: CalibrationSettings) -> Self {
        let capacity = settings.required_measurements.max(1);
        Self {
            settings,
            waiting_for_click: false,
            offset: 0,
            measurements: [Vec::with_capacity(capacity), Vec::with_capacity(capacity)],
        }
    }

    /// Forget all measurements and start over with a fresh click
    pub fn reset(&mut self) {
        self.waiting_for_click = false;
        self.offset = 0;
        for channel in &mut self.measurements {
            channel.clear();
        }
    }

    /// Accepted measurements so far
    #[inline]
    pub fn measurement_count(&self) -> usize {
        self.measurements[0].len()
    }

    /// Accepted measurements of one channel, in arrival order
    pub fn measurements(&self, channel: usize) -> &[usize] {
        &self.measurements[channel]
    }

    #[inline]
    pub fn is_waiting_for_click(&self) -> bool {
        self.waiting_for_click
    }

    /// Samples elapsed since the last click
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Run one period.
    ///
    /// Writes the click or silence to the outputs. Returns the resolved
    /// latencies (voted value plus safety margin) once enough measurements
    /// have been accepted; the calibrator is reset at that point.
    pub fn process(
        &mut self,
        microphone_left: &[Sample],
        microphone_right: &[Sample],
        output_left: &mut [Sample],
        output_right: &mut [Sample],
    ) -> Option<StereoLatency> {
        output_left.fill(0.0);
        output_right.fill(0.0);

        let len = output_left.len();
        if len == 0 {
            return None;
        }

        if !self.waiting_for_click {
            output_left[len - 1] = 1.0;
            output_right[len - 1] = 1.0;
            self.offset = CLICK_ORIGIN;
            self.waiting_for_click = true;
            return None;
        }

        let (index_l, peak_l) = find_peak(microphone_left);
        let (index_r, peak_r) = find_peak(microphone_right);

        let threshold = self.settings.detection_threshold;
        let min_latency = self.settings.min_latency;
        let latency_l = index_l + self.offset;
        let latency_r = index_r + self.offset;

        let accepted = peak_l > threshold
            && peak_r > threshold
            && latency_l > min_latency
            && latency_r > min_latency;

        if !accepted {
            self.offset += len;
            return None;
        }

        self.measurements[0].push(latency_l);
        self.measurements[1].push(latency_r);
        self.waiting_for_click = false;
        log::debug!(
            "Click {} detected after {}/{} samples",
            self.measurement_count(),
            latency_l,
            latency_r
        );

        if self.measurement_count() < self.settings.required_measurements {
            return None;
        }

        let margin = self.settings.safety_margin;
        let resolved = [
            most_frequent(&self.measurements[0]).unwrap_or(0) + margin,
            most_frequent(&self.measurements[1]).unwrap_or(0) + margin,
        ];
        self.reset();
        Some(resolved)
    }
}

/// Index and value of the largest sample (first one on ties)
fn find_peak(samples: &[Sample]) -> (usize, Sample) {
    samples
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, s)| if s > best.1 { (i, s) } else { best })
}

/// Histogram vote: the value seen most often, first seen wins ties.
///
/// Counts in place so the audio thread never allocates.
fn most_frequent(values: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;

    for (i, &candidate) in values.iter().enumerate() {
        if values[..i].contains(&candidate) {
            continue;
        }
        let count = values[i..].iter().filter(|&&v| v == candidate).count();
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((candidate, count));
        }
    }

    best.map(|(value, _)| value)
}
