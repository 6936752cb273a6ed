//! Engine configuration
//!
//! Every empirically tuned constant of the adaptive core lives here as a
//! default, so a deployment can override it without touching the DSP code.

use serde::{Deserialize, Serialize};

use crate::{EarError, EarResult, SignalSource, MAX_CONTROLS};

/// Equalizer sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerSettings {
    /// Gain controls per equalizer (clamped to 64..=2048)
    pub number_of_controls: usize,
    /// Half-width of the FIR kernel (clamped to 32..=controls/2)
    pub filter_spread: usize,
}

impl Default for EqualizerSettings {
    fn default() -> Self {
        Self {
            number_of_controls: MAX_CONTROLS,
            filter_spread: 100,
        }
    }
}

/// Spectral adaptation tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationSettings {
    /// Per-bin learning rate is `1 / (rate_offset - bin)`
    pub rate_offset: f64,
    /// Global divisor applied to every spectral difference
    pub step_divisor: f64,
    /// Lowest allowed control value
    pub control_floor: f64,
    /// Highest allowed control value
    pub control_ceiling: f64,
}

impl Default for AdaptationSettings {
    fn default() -> Self {
        Self {
            rate_offset: 2049.0,
            step_divisor: 2.0,
            control_floor: 0.01,
            control_ceiling: 1.0,
        }
    }
}

/// Click-train latency measurement tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Peak level a click echo must exceed on both channels
    pub detection_threshold: f64,
    /// Echoes closer than this (in samples) are rejected
    pub min_latency: usize,
    /// Added to the voted latency
    pub safety_margin: usize,
    /// Accepted measurements needed before voting
    pub required_measurements: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            detection_threshold: 0.8,
            min_latency: 512,
            safety_margin: 50,
            required_measurements: 20,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarConfig {
    pub equalizer: EqualizerSettings,
    pub adaptation: AdaptationSettings,
    pub calibration: CalibrationSettings,
    /// Length of the reference history used for latency compensation
    pub history_seconds: f64,
    /// Peak amplitude of the built-in noise sources
    pub noise_amplitude: f64,
    /// Seed for the built-in noise sources
    pub noise_seed: u64,
    pub signal_source: SignalSource,
    pub automatic_adaption: bool,
    pub bypass: bool,
}

impl Default for EarConfig {
    fn default() -> Self {
        Self {
            equalizer: EqualizerSettings::default(),
            adaptation: AdaptationSettings::default(),
            calibration: CalibrationSettings::default(),
            history_seconds: 1.0,
            noise_amplitude: 0.5,
            noise_seed: 0x5EED,
            signal_source: SignalSource::External,
            automatic_adaption: true,
            bypass: false,
        }
    }
}

impl EarConfig {
    /// Reject settings the DSP cannot work with
    pub fn validate(&self) -> EarResult<()> {
        let a = &self.adaptation;
        if !(a.control_floor > 0.0 && a.control_floor <= a.control_ceiling) {
            return Err(EarError::InvalidParam(format!(
                "control range [{}, {}]",
                a.control_floor, a.control_ceiling
            )));
        }
        if a.step_divisor <= 0.0 {
            return Err(EarError::InvalidParam(format!(
                "step divisor {}",
                a.step_divisor
            )));
        }
        if a.rate_offset <= MAX_CONTROLS as f64 {
            return Err(EarError::InvalidParam(format!(
                "rate offset {} must exceed {}",
                a.rate_offset, MAX_CONTROLS
            )));
        }
        if self.calibration.required_measurements == 0 {
            return Err(EarError::InvalidParam(
                "required measurements must be at least 1".into(),
            ));
        }
        if !(self.history_seconds > 0.0 && self.history_seconds.is_finite()) {
            return Err(EarError::InvalidParam(format!(
                "history length {}s",
                self.history_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EarConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "calibration": { "min_latency": 256 }, "bypass": true }"#;
        let config: EarConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.calibration.min_latency, 256);
        assert_eq!(config.calibration.safety_margin, 50);
        assert_eq!(config.equalizer.number_of_controls, 2048);
        assert!(config.bypass);
    }

    #[test]
    fn test_rejects_inverted_control_range() {
        let mut config = EarConfig::default();
        config.adaptation.control_floor = 2.0;
        assert!(config.validate().is_err());
    }
}
