//! Built-in reference sources
//!
//! White and pink noise that can stand in for an external reference signal.
//! Both fill caller-provided blocks and never allocate.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ear_core::Sample;

/// Uniform white noise in `[-amplitude, amplitude)`
#[derive(Debug, Clone)]
pub struct WhiteNoise {
    rng: StdRng,
    amplitude: f64,
}

impl WhiteNoise {
    pub fn new(amplitude: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }

    #[inline]
    pub fn next_sample(&mut self) -> Sample {
        self.rng.random_range(-1.0..1.0) * self.amplitude
    }

    pub fn fill(&mut self, block: &mut [Sample]) {
        for sample in block.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

/// Pink noise (-3 dB/octave), Paul Kellet's refined filter over white noise
#[derive(Debug, Clone)]
pub struct PinkNoise {
    white: WhiteNoise,
    amplitude: f64,
    b: [f64; 7],
}

impl PinkNoise {
    /// Filter output peaks a little above 1.0 for unit white input
    const GAIN: f64 = 0.11;

    pub fn new(amplitude: f64, seed: u64) -> Self {
        Self {
            white: WhiteNoise::new(1.0, seed),
            amplitude: amplitude.clamp(0.0, 1.0),
            b: [0.0; 7],
        }
    }

    #[inline]
    pub fn next_sample(&mut self) -> Sample {
        let white = self.white.next_sample();
        let b = &mut self.b;

        b[0] = 0.99886 * b[0] + white * 0.0555179;
        b[1] = 0.99332 * b[1] + white * 0.0750759;
        b[2] = 0.96900 * b[2] + white * 0.1538520;
        b[3] = 0.86650 * b[3] + white * 0.3104856;
        b[4] = 0.55000 * b[4] + white * 0.5329522;
        b[5] = -0.7616 * b[5] - white * 0.0168980;
        let pink = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
        b[6] = white * 0.115926;

        (pink * Self::GAIN).clamp(-1.0, 1.0) * self.amplitude
    }

    pub fn fill(&mut self, block: &mut [Sample]) {
        for sample in block.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_square(block: &[f64]) -> f64 {
        block.iter().map(|x| x * x).sum::<f64>() / block.len() as f64
    }

    #[test]
    fn test_white_noise_bounds() {
        let mut noise = WhiteNoise::new(0.5, 1);
        let mut block = vec![0.0; 48000];
        noise.fill(&mut block);

        assert!(block.iter().all(|&s| (-0.5..0.5).contains(&s)));
        // Uniform distribution: E[x^2] = a^2 / 3
        assert!((mean_square(&block) - 0.25 / 3.0).abs() < 0.005);
    }

    #[test]
    fn test_same_seed_same_noise() {
        let mut a = WhiteNoise::new(1.0, 42);
        let mut b = WhiteNoise::new(1.0, 42);
        for _ in 0..100 {
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn test_pink_noise_is_bounded_and_alive() {
        let mut noise = PinkNoise::new(1.0, 7);
        let mut block = vec![0.0; 48000];
        noise.fill(&mut block);

        assert!(block.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        assert!(mean_square(&block) > 1e-4);
    }

    #[test]
    fn test_pink_noise_favours_low_frequencies() {
        let mut noise = PinkNoise::new(1.0, 3);
        let mut block = vec![0.0; 1 << 15];
        noise.fill(&mut block);

        // First difference acts as a crude high-pass: pink noise loses far
        // more energy to it than white noise does (white keeps ~2x).
        let diff: Vec<f64> = block.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(mean_square(&diff) < mean_square(&block));
    }
}
