//! Adaptive FIR Equalizer
//!
//! One gain control per frequency bin. The controls are turned into a
//! windowed, zero-phase FIR kernel by inverse transform and applied with a
//! direct-form convolution over a persistent delay line.
//!
//! The control vector is shared with the control thread and only reachable
//! through [`ControlsGuard`]. The audio thread never blocks on it: it uses
//! [`Equalizer::try_generate_filter`] and defers work when the lock is busy.

use std::f64::consts::PI;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rustfft::num_complex::Complex;

use ear_core::{EarError, EarResult, MAX_CONTROLS, Sample};

use crate::fft::SpectralTransform;

// ============ Constants ============

/// Fewest controls an equalizer accepts
pub const MIN_CONTROLS: usize = 64;

/// Narrowest FIR half-width
pub const MIN_FILTER_SPREAD: usize = 32;

/// Separator used by control files
const CONTROL_FILE_SEPARATOR: &str = "; ";

/// Clamp a requested control count to the supported range
#[inline]
pub fn bound_number_of_controls(n: usize) -> usize {
    n.clamp(MIN_CONTROLS, MAX_CONTROLS)
}

/// Clamp a requested spread so the kernel fits the control count
#[inline]
pub fn bound_filter_spread(spread: usize, number_of_controls: usize) -> usize {
    spread.clamp(MIN_FILTER_SPREAD, number_of_controls / 2)
}

// ============ Shared Controls ============

struct ControlsCell {
    values: Mutex<Vec<f64>>,
    dirty: AtomicBool,
}

/// Exclusive access to a gain-control vector.
///
/// Dereferences to the control slice. Any mutable access marks the controls
/// as changed so the owning equalizer regenerates its kernel. The lock is
/// released when the guard is dropped.
pub struct ControlsGuard<'a> {
    values: MutexGuard<'a, Vec<f64>>,
    dirty: &'a AtomicBool,
    touched: bool,
}

impl ControlsGuard<'_> {
    #[inline]
    pub fn controls(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn controls_mut(&mut self) -> &mut [f64] {
        self.touched = true;
        &mut self.values
    }

    /// Release the lock. Equivalent to dropping the guard.
    #[inline]
    pub fn release(self) {}
}

impl Deref for ControlsGuard<'_> {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.values
    }
}

impl DerefMut for ControlsGuard<'_> {
    fn deref_mut(&mut self) -> &mut [f64] {
        self.controls_mut()
    }
}

impl Drop for ControlsGuard<'_> {
    fn drop(&mut self) {
        if self.touched {
            self.dirty.store(true, Ordering::Release);
        }
    }
}

/// Cloneable handle to an equalizer's controls, for the control thread
#[derive(Clone)]
pub struct ControlsHandle {
    cell: Arc<ControlsCell>,
}

impl ControlsHandle {
    fn new(number_of_controls: usize) -> Self {
        Self {
            cell: Arc::new(ControlsCell {
                values: Mutex::new(vec![1.0; number_of_controls]),
                dirty: AtomicBool::new(true),
            }),
        }
    }

    /// Block until the controls are available
    pub fn acquire(&self) -> ControlsGuard<'_> {
        ControlsGuard {
            values: self.cell.values.lock(),
            dirty: &self.cell.dirty,
            touched: false,
        }
    }

    /// Take the controls only if nobody else holds them
    pub fn try_acquire(&self) -> Option<ControlsGuard<'_>> {
        self.cell.values.try_lock().map(|values| ControlsGuard {
            values,
            dirty: &self.cell.dirty,
            touched: false,
        })
    }

    /// Current number of controls
    pub fn len(&self) -> usize {
        self.cell.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set every control to `value`
    pub fn reset(&self, value: f64) {
        self.acquire().fill(value);
    }

    /// True when the controls were written since the kernel was last built
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.cell.dirty.load(Ordering::Acquire)
    }

    fn clear_dirty(&self) {
        self.cell.dirty.store(false, Ordering::Release);
    }

    /// Write the controls as `v0; v1; ...; vn-1`
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> EarResult<()> {
        let path = path.as_ref();
        let text = {
            let controls = self.acquire();
            format_controls(&controls)
        };

        fs::write(path, text)?;
        log::info!("Saved {} controls to {}", self.len(), path.display());
        Ok(())
    }

    /// Load controls written by [`save_to_file`](Self::save_to_file).
    ///
    /// Malformed values are skipped (the control at that position keeps its
    /// value) and values beyond the control count are ignored. Returns the
    /// number of controls that were set.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> EarResult<usize> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;

        let loaded = {
            let mut controls = self.acquire();
            parse_controls(&text, &mut controls, &path.display().to_string())
        };

        if loaded == 0 {
            return Err(EarError::EmptyControlFile(path.display().to_string()));
        }

        log::info!("Loaded {} controls from {}", loaded, path.display());
        Ok(loaded)
    }
}

fn format_controls(controls: &[f64]) -> String {
    controls
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(CONTROL_FILE_SEPARATOR)
}

fn parse_controls(text: &str, controls: &mut [f64], source: &str) -> usize {
    let tokens: Vec<&str> = text.trim().split(';').map(str::trim).collect();

    // A trailing separator leaves one empty token that carries no value
    let tokens = match tokens.split_last() {
        Some((last, rest)) if last.is_empty() => rest,
        _ => &tokens[..],
    };

    if tokens.len() > controls.len() {
        log::warn!(
            "{}: {} values for {} controls, ignoring the rest",
            source,
            tokens.len(),
            controls.len()
        );
    }

    let mut loaded = 0;
    for (index, token) in tokens.iter().take(controls.len()).enumerate() {
        match token.parse::<f64>() {
            Ok(value) if value.is_finite() => {
                controls[index] = value;
                loaded += 1;
            }
            _ => log::warn!("{}: skipping malformed value {:?} at {}", source, token, index),
        }
    }
    loaded
}

// ============ Delay Line ============

/// Sample history, newest first.
///
/// Stored twice back to back so the whole history is always one contiguous
/// slice starting at the head.
#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<Sample>,
    head: usize,
    len: usize,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len * 2],
            head: 0,
            len,
        }
    }

    /// Push one sample and return the history, `[0]` being that sample
    #[inline]
    fn push(&mut self, sample: Sample) -> &[Sample] {
        self.head = if self.head == 0 { self.len - 1 } else { self.head - 1 };
        self.buffer[self.head] = sample;
        self.buffer[self.head + self.len] = sample;
        &self.buffer[self.head..self.head + self.len]
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.head = 0;
    }
}

// ============ Equalizer ============

/// Per-channel FIR equalizer driven by per-bin gain controls
pub struct Equalizer {
    controls: ControlsHandle,
    /// Requested kernel half-width, re-bounded on every resize
    requested_spread: usize,
    spread: usize,
    transform: SpectralTransform,
    /// Design buffer, `2 * controls` bins
    spectrum: Vec<Complex<f64>>,
    coefficients: Vec<f64>,
    delay_line: DelayLine,
}

impl Equalizer {
    /// Create an equalizer with all controls at unity
    pub fn new(number_of_controls: usize, filter_spread: usize) -> Self {
        let n = bound_number_of_controls(number_of_controls);
        let spread = bound_filter_spread(filter_spread, n);

        let mut eq = Self {
            controls: ControlsHandle::new(n),
            requested_spread: filter_spread,
            spread,
            transform: SpectralTransform::new(2 * n),
            spectrum: vec![Complex::new(0.0, 0.0); 2 * n],
            coefficients: vec![0.0; 2 * spread + 1],
            delay_line: DelayLine::new(n.max(2 * spread + 1)),
        };
        eq.generate_filter();
        eq
    }

    /// Resize the control vector and rebuild everything derived from it.
    ///
    /// Not realtime-safe. New controls start at unity; the delay line is
    /// cleared.
    pub fn set_number_of_controls(&mut self, number_of_controls: usize) {
        let n = bound_number_of_controls(number_of_controls);
        self.controls.acquire().values.resize(n, 1.0);

        self.spread = bound_filter_spread(self.requested_spread, n);
        self.transform = SpectralTransform::new(2 * n);
        self.spectrum = vec![Complex::new(0.0, 0.0); 2 * n];
        self.coefficients = vec![0.0; 2 * self.spread + 1];
        self.delay_line = DelayLine::new(n.max(2 * self.spread + 1));

        log::debug!("Equalizer resized to {} controls, spread {}", n, self.spread);
        self.generate_filter();
    }

    #[inline]
    pub fn number_of_controls(&self) -> usize {
        self.spectrum.len() / 2
    }

    /// FIR half-width; the kernel has `2 * spread + 1` taps
    #[inline]
    pub fn filter_spread(&self) -> usize {
        self.spread
    }

    /// Current kernel
    #[inline]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Lock the controls (blocking)
    pub fn acquire_controls(&self) -> ControlsGuard<'_> {
        self.controls.acquire()
    }

    /// Lock the controls if they are free
    pub fn try_acquire_controls(&self) -> Option<ControlsGuard<'_>> {
        self.controls.try_acquire()
    }

    /// Handle for other threads
    pub fn controls_handle(&self) -> ControlsHandle {
        self.controls.clone()
    }

    /// True when the controls changed since the kernel was built
    #[inline]
    pub fn controls_changed(&self) -> bool {
        self.controls.is_dirty()
    }

    /// Rebuild the kernel from the controls, waiting for the lock
    pub fn generate_filter(&mut self) {
        {
            let controls = self.controls.acquire();
            self.controls.clear_dirty();
            fill_design_spectrum(&controls, &mut self.spectrum);
        }
        self.design_kernel();
    }

    /// Rebuild the kernel unless the control thread holds the lock.
    ///
    /// Returns false when the rebuild was deferred.
    pub fn try_generate_filter(&mut self) -> bool {
        {
            let Some(controls) = self.controls.try_acquire() else {
                return false;
            };
            self.controls.clear_dirty();
            fill_design_spectrum(&controls, &mut self.spectrum);
        }
        self.design_kernel();
        true
    }

    /// Inverse transform, centre on tap `spread`, Hamming window
    fn design_kernel(&mut self) {
        self.transform.inverse(&mut self.spectrum);

        let spread = self.spread;
        let size = self.spectrum.len();

        // Last `spread` samples (negative time) then the first `spread + 1`
        for (k, coeff) in self.coefficients[..spread].iter_mut().enumerate() {
            *coeff = self.spectrum[size - spread + k].re;
        }
        for (k, coeff) in self.coefficients[spread..].iter_mut().enumerate() {
            *coeff = self.spectrum[k].re;
        }

        for (i, coeff) in self.coefficients.iter_mut().enumerate() {
            let k = i as f64 - spread as f64;
            *coeff *= 0.54 + 0.46 * (PI * k / spread as f64).cos();
        }
    }

    /// Filter a block. Successive calls must carry one gapless stream.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len(), output.len());
        let taps = self.coefficients.len();

        for (&x, y) in input.iter().zip(output.iter_mut()) {
            let history = self.delay_line.push(x);
            *y = self
                .coefficients
                .iter()
                .zip(&history[..taps])
                .map(|(c, h)| c * h)
                .sum();
        }
    }

    /// Zero the delay line
    pub fn reset(&mut self) {
        self.delay_line.clear();
    }

    /// Save controls as a `;`-separated list
    pub fn save_controls_to_file(&self, path: impl AsRef<Path>) -> EarResult<()> {
        self.controls.save_to_file(path)
    }

    /// Load controls and rebuild the kernel
    pub fn load_controls_from_file(&mut self, path: impl AsRef<Path>) -> EarResult<usize> {
        let loaded = self.controls.load_from_file(path)?;
        self.generate_filter();
        Ok(loaded)
    }
}

/// Real spectrum of length `2n`: bins `i` and `2n-1-i` both carry control `i`
fn fill_design_spectrum(controls: &[f64], spectrum: &mut [Complex<f64>]) {
    let size = spectrum.len();
    for (i, &gain) in controls.iter().enumerate() {
        spectrum[i] = Complex::new(gain, 0.0);
        spectrum[size - 1 - i] = Complex::new(gain, 0.0);
    }
}

// ============ Tests ============
