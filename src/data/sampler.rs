// --- File: src/data/sampler.rs ---

//! Index order for one pass over a dataset, and its grouping into batches.
//!
//! A sampler is restartable: [`Sampler::reset`] begins the next pass. The
//! [`DataLoader`](super::DataLoader) keeps one sampler for its whole life
//! and resets it between epochs.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::ops::Range;

/// Restartable source of dataset positions.
pub trait Sampler: Iterator<Item = usize> {
    /// Positions yielded per pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewinds to the start of the next pass.
    fn reset(&mut self);
}

/// `0, 1, ..., len - 1` on every pass.
pub struct SequentialSampler {
    len: usize,
    remaining: Range<usize>,
}

impl SequentialSampler {
    pub fn new(len: usize) -> Self {
        Self { len, remaining: 0..len }
    }
}

impl Iterator for SequentialSampler {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.remaining.next()
    }
}

impl Sampler for SequentialSampler {
    fn len(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.remaining = 0..self.len;
    }
}

/// A new permutation of `0..len` on every pass.
pub struct RandomSampler {
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl RandomSampler {
    /// Seeds itself from the thread RNG.
    pub fn new(len: usize) -> Self {
        Self::from_rng(len, StdRng::from_rng(&mut rand::rng()))
    }

    /// Fixes the whole sequence of permutations, not a single one:
    /// consecutive passes still differ.
    pub fn with_seed(len: usize, seed: u64) -> Self {
        Self::from_rng(len, StdRng::seed_from_u64(seed))
    }

    fn from_rng(len: usize, mut rng: StdRng) -> Self {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        Self { order, cursor: 0, rng }
    }
}

impl Iterator for RandomSampler {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = *self.order.get(self.cursor)?;
        self.cursor += 1;
        Some(idx)
    }
}

impl Sampler for RandomSampler {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn reset(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }
}

/// Cuts the positions of a [`Sampler`] into consecutive batches.
///
/// The last batch of a pass is short when `len` is not a multiple of the
/// batch size, unless `drop_last` discards it.
pub struct BatchSampler<S: Sampler> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    /// # Panics
    ///
    /// Panics if `batch_size` is 0.
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Self {
        assert!(batch_size > 0, "batch_size must be at least 1");
        Self {
            sampler,
            batch_size,
            drop_last,
        }
    }

    /// Batches per pass.
    pub fn num_batches(&self) -> usize {
        let n = self.sampler.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Rewinds the inner sampler.
    pub fn reset(&mut self) {
        self.sampler.reset();
    }
}

impl<S: Sampler> Iterator for BatchSampler<S> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let batch: Vec<usize> = self.sampler.by_ref().take(self.batch_size).collect();
        match batch.len() {
            0 => None,
            n if n < self.batch_size && self.drop_last => None,
            _ => Some(batch),
        }
    }
}
