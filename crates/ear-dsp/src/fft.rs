//! Spectral transforms
//!
//! Both transforms are planned once at construction and keep their own
//! scratch space, so `forward`/`inverse`/`analyze` never allocate.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use ear_core::{MAX_BLOCK_SIZE, MAX_CONTROLS, Sample};

/// Fixed analysis size for the adaptation loop
pub const ANALYSIS_FFT_SIZE: usize = MAX_BLOCK_SIZE;

/// Smallest transform we plan
const MIN_FFT_SIZE: usize = 2;

/// Largest complex transform: the design spectrum of a full equalizer
const MAX_FFT_SIZE: usize = 2 * MAX_CONTROLS;

// ============ Complex Transform ============

/// Forward/inverse DFT over complex buffers of a fixed size
pub struct SpectralTransform {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex<f64>>,
    size: usize,
}

impl SpectralTransform {
    /// Plan transforms of exactly `size` points, clamped to [2, 4096].
    ///
    /// Any length is planned; the design spectrum of `n` controls is `2n`
    /// bins whether or not `n` is a power of two.
    pub fn new(size: usize) -> Self {
        let size = size.clamp(MIN_FFT_SIZE, MAX_FFT_SIZE);

        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);

        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            forward,
            inverse,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            size,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// In-place forward transform. `buffer.len()` must equal `size()`.
    pub fn forward(&mut self, buffer: &mut [Complex<f64>]) {
        debug_assert_eq!(buffer.len(), self.size);
        self.forward.process_with_scratch(buffer, &mut self.scratch);
    }

    /// In-place inverse transform, normalized by `1/size`
    pub fn inverse(&mut self, buffer: &mut [Complex<f64>]) {
        debug_assert_eq!(buffer.len(), self.size);
        self.inverse.process_with_scratch(buffer, &mut self.scratch);

        let norm = 1.0 / self.size as f64;
        for value in buffer.iter_mut() {
            *value *= norm;
        }
    }
}

// ============ Magnitude Analyzer ============

/// Magnitude spectrum of real windows, zero-padded to 4096 points
pub struct MagnitudeAnalyzer {
    fft: Arc<dyn RealToComplex<f64>>,
    input: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl MagnitudeAnalyzer {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(ANALYSIS_FFT_SIZE);

        Self {
            input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            fft,
        }
    }

    /// Write `|X[i]|` for the first `magnitudes.len()` bins (at most 2048).
    ///
    /// Windows longer than the analysis size contribute their most recent
    /// samples.
    pub fn analyze(&mut self, window: &[Sample], magnitudes: &mut [f64]) {
        let window = &window[window.len().saturating_sub(ANALYSIS_FFT_SIZE)..];

        self.input[..window.len()].copy_from_slice(window);
        self.input[window.len()..].fill(0.0);

        if self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            // Unreachable with plan-sized buffers; reads as silence
            magnitudes.fill(0.0);
            return;
        }

        let bins = magnitudes.len().min(MAX_CONTROLS);
        for (mag, c) in magnitudes[..bins].iter_mut().zip(&self.spectrum) {
            *mag = (c.re * c.re + c.im * c.im).sqrt();
        }
    }
}

impl Default for MagnitudeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_size_is_exact_and_bounded() {
        assert_eq!(SpectralTransform::new(1000).size(), 1000);
        assert_eq!(SpectralTransform::new(200).size(), 200);
        assert_eq!(SpectralTransform::new(4096).size(), 4096);
        assert_eq!(SpectralTransform::new(100_000).size(), 4096);
        assert_eq!(SpectralTransform::new(0).size(), 2);
    }

    #[test]
    fn test_inverse_non_power_of_two() {
        // Flat unit spectrum of 200 bins is a unit impulse at t = 0
        let mut transform = SpectralTransform::new(200);
        let mut buffer = vec![Complex::new(1.0, 0.0); 200];
        transform.inverse(&mut buffer);

        assert!((buffer[0].re - 1.0).abs() < 1e-12);
        for value in &buffer[1..] {
            assert!(value.norm() < 1e-12);
        }
    }

    #[test]
    fn test_forward_inverse_restores_signal() {
        let mut transform = SpectralTransform::new(256);
        let original: Vec<Complex<f64>> = (0..256)
            .map(|i| Complex::new((i as f64 * 0.1).sin(), 0.0))
            .collect();

        let mut buffer = original.clone();
        transform.forward(&mut buffer);
        transform.inverse(&mut buffer);

        for (a, b) in original.iter().zip(&buffer) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn test_analyzer_finds_sine_bin() {
        let mut analyzer = MagnitudeAnalyzer::new();
        let bin = 64;
        let window: Vec<f64> = (0..ANALYSIS_FFT_SIZE)
            .map(|i| (2.0 * PI * bin as f64 * i as f64 / ANALYSIS_FFT_SIZE as f64).sin())
            .collect();

        let mut magnitudes = vec![0.0; MAX_CONTROLS];
        analyzer.analyze(&window, &mut magnitudes);

        let peak = magnitudes
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
        assert_eq!(peak.0, bin);
        assert!((peak.1 - ANALYSIS_FFT_SIZE as f64 / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_analyzer_zero_pads_short_windows() {
        let mut analyzer = MagnitudeAnalyzer::new();
        let mut magnitudes = vec![0.0; 16];

        // A single unit sample has a flat unit-magnitude spectrum
        analyzer.analyze(&[1.0], &mut magnitudes);
        for m in magnitudes {
            assert!((m - 1.0).abs() < 1e-12);
        }
    }
}
