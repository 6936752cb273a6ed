//! Reference history
//!
//! Bounded FIFO of recent reference samples, used to line up the reference
//! with the microphone once the acoustic latency is known.

use std::collections::VecDeque;

use ear_core::{MAX_BLOCK_SIZE, Sample};

/// Most recent `capacity` reference samples of one channel
#[derive(Debug, Clone)]
pub struct ReferenceHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl ReferenceHistory {
    /// `capacity` is the number of samples kept (e.g. one second)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            // Room for one extra block so appending never reallocates
            samples: VecDeque::with_capacity(capacity + MAX_BLOCK_SIZE),
            capacity,
        }
    }

    /// Append a block, dropping the oldest samples beyond the cap
    pub fn push(&mut self, block: &[Sample]) {
        let block = &block[block.len().saturating_sub(self.capacity)..];
        let overflow = (self.samples.len() + block.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(block.iter().copied());
    }

    /// Copy the `out.len()` samples that are exactly `latency` samples older
    /// than the newest block of the same length.
    ///
    /// Returns false, leaving `out` untouched, while the history is shorter
    /// than `latency + out.len()`.
    pub fn copy_delayed(&self, latency: usize, out: &mut [Sample]) -> bool {
        let needed = latency + out.len();
        if self.samples.len() < needed {
            return false;
        }

        let len = out.len();
        let start = self.samples.len() - needed;
        for (dst, &src) in out.iter_mut().zip(self.samples.range(start..start + len)) {
            *dst = src;
        }
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
