//! Sample types and per-callback buffer views

/// Type alias for audio samples (always f64 for maximum precision)
pub type Sample = f64;

/// Borrowed view over one callback's worth of audio.
///
/// All slices have the same length. The view borrows the transport's
/// buffers, so it cannot outlive the callback that produced it.
#[derive(Debug)]
pub struct ProcessBuffers<'a> {
    pub microphone_left: &'a [Sample],
    pub microphone_right: &'a [Sample],
    pub reference_left: &'a [Sample],
    pub reference_right: &'a [Sample],
    pub output_left: &'a mut [Sample],
    pub output_right: &'a mut [Sample],
}

impl<'a> ProcessBuffers<'a> {
    /// Number of frames in this callback
    #[inline]
    pub fn len(&self) -> usize {
        self.output_left.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sub-view over `start..end`, used to split oversized callbacks
    pub fn slice(&mut self, start: usize, end: usize) -> ProcessBuffers<'_> {
        ProcessBuffers {
            microphone_left: &self.microphone_left[start..end],
            microphone_right: &self.microphone_right[start..end],
            reference_left: &self.reference_left[start..end],
            reference_right: &self.reference_right[start..end],
            output_left: &mut self.output_left[start..end],
            output_right: &mut self.output_right[start..end],
        }
    }
}

/// Peak absolute value of a block
#[inline]
pub fn peak_level(samples: &[Sample]) -> Sample {
    samples.iter().fold(0.0, |peak, &s| peak.max(s.abs()))
}
