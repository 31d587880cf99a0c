// --- File: src/data/dataloader.rs ---

//! DataLoader - iterator over batches of samples.

use super::dataset::Dataset;
use super::sampler::{BatchSampler, RandomSampler, SequentialSampler};
use super::DataError;
use ndarray::{ArrayD, Axis, IxDyn};
use rayon::prelude::*;
use rayon::ThreadPool;

/// A batch: stacked inputs plus their class indices.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Inputs of shape `[B, ...sample shape]`
    pub inputs: ArrayD<f32>,
    /// Class index per sample
    pub labels: Vec<usize>,
    /// Dataset positions of the samples in this batch
    pub indices: Vec<usize>,
}

impl Batch {
    /// Returns the batch size.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Checks whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Batched iteration over a dataset.
///
/// Every call to [`DataLoader::iter`] is one pass (epoch). The loader keeps
/// one batch sampler and resets it between passes, so with shuffling each
/// pass is a new permutation, and with a seed the sequence of permutations
/// is reproducible.
///
/// # Example
///
/// ```rust,ignore
/// let mut loader = DataLoader::new(dataset, 32)?
///     .shuffle(true)
///     .seed(7);
///
/// for batch in loader.iter() {
///     let batch = batch?;
///     println!("Batch size: {}", batch.len());
/// }
/// ```
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
    pool: Option<ThreadPool>,
    batches: IndexBatches,
    passes: u64,
}

impl<D: Dataset> DataLoader<D> {
    /// Creates a sequential loader.
    ///
    /// # Errors
    ///
    /// `batch_size` must be at least 1.
    pub fn new(dataset: D, batch_size: usize) -> Result<Self, DataError> {
        if batch_size == 0 {
            return Err(DataError::InvalidConfig("batch_size must be at least 1".into()));
        }
        let batches = IndexBatches::build(dataset.len(), batch_size, false, false, None);
        Ok(Self {
            dataset,
            batch_size,
            shuffle: false,
            drop_last: false,
            seed: None,
            pool: None,
            batches,
            passes: 0,
        })
    }

    /// Enables or disables shuffling.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self.rebuild_sampler();
        self
    }

    /// Drops the final short batch.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self.rebuild_sampler();
        self
    }

    /// Sets the shuffle seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rebuild_sampler();
        self
    }

    fn rebuild_sampler(&mut self) {
        self.batches = IndexBatches::build(
            self.dataset.len(),
            self.batch_size,
            self.drop_last,
            self.shuffle,
            self.seed,
        );
    }

    /// Decodes the samples of a batch on `num_workers` threads.
    ///
    /// Batches are still assembled in sampler order, so results are the
    /// same for every worker count.
    pub fn num_workers(mut self, num_workers: usize) -> Result<Self, DataError> {
        self.pool = if num_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("loader-{i}"))
                .build()
                .map_err(|e| DataError::InvalidConfig(e.to_string()))?;
            Some(pool)
        } else {
            None
        };
        Ok(self)
    }

    /// Number of batches per pass.
    pub fn num_batches(&self) -> usize {
        self.batches.num_batches()
    }

    /// Number of samples in the dataset.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Starts a new pass over the dataset.
    pub fn iter(&mut self) -> DataLoaderIterator<'_, D> {
        let pass = self.passes;
        self.passes += 1;
        self.dataset.set_epoch(pass);
        // a fresh sampler already holds the first permutation
        if pass > 0 {
            self.batches.reset();
        }

        DataLoaderIterator {
            dataset: &self.dataset,
            pool: self.pool.as_ref(),
            batches: &mut self.batches,
        }
    }
}

/// Holds either kind of batch sampler without boxing.
enum IndexBatches {
    Sequential(BatchSampler<SequentialSampler>),
    Random(BatchSampler<RandomSampler>),
}

impl IndexBatches {
    fn build(len: usize, batch_size: usize, drop_last: bool, shuffle: bool, seed: Option<u64>) -> Self {
        if shuffle {
            let sampler = match seed {
                Some(seed) => RandomSampler::with_seed(len, seed),
                None => RandomSampler::new(len),
            };
            IndexBatches::Random(BatchSampler::new(sampler, batch_size, drop_last))
        } else {
            IndexBatches::Sequential(BatchSampler::new(SequentialSampler::new(len), batch_size, drop_last))
        }
    }

    fn num_batches(&self) -> usize {
        match self {
            IndexBatches::Sequential(s) => s.num_batches(),
            IndexBatches::Random(s) => s.num_batches(),
        }
    }

    fn reset(&mut self) {
        match self {
            IndexBatches::Sequential(s) => s.reset(),
            IndexBatches::Random(s) => s.reset(),
        }
    }
}

impl Iterator for IndexBatches {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            IndexBatches::Sequential(s) => s.next(),
            IndexBatches::Random(s) => s.next(),
        }
    }
}

/// Iterator over the batches of one pass.
pub struct DataLoaderIterator<'a, D: Dataset> {
    dataset: &'a D,
    pool: Option<&'a ThreadPool>,
    batches: &'a mut IndexBatches,
}

impl<D: Dataset> DataLoaderIterator<'_, D> {
    fn load(&self, indices: Vec<usize>) -> Result<Batch, DataError> {
        let dataset = self.dataset;
        let samples: Vec<(ArrayD<f32>, usize)> = match self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| dataset.get(i))
                    .collect::<Result<Vec<_>, _>>()
            })?,
            None => indices
                .iter()
                .map(|&i| dataset.get(i))
                .collect::<Result<Vec<_>, _>>()?,
        };
        collate(indices, samples)
    }
}

impl<D: Dataset> Iterator for DataLoaderIterator<'_, D> {
    type Item = Result<Batch, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.batches.next()?;
        Some(self.load(indices))
    }
}

/// Stacks samples along a new leading axis.
fn collate(indices: Vec<usize>, samples: Vec<(ArrayD<f32>, usize)>) -> Result<Batch, DataError> {
    let expected = match samples.first() {
        Some((tensor, _)) => tensor.shape().to_vec(),
        None => return Err(DataError::EmptyDataset),
    };

    let mut shape = vec![samples.len()];
    shape.extend(&expected);
    let mut inputs = ArrayD::zeros(IxDyn(&shape));
    let mut labels = Vec::with_capacity(samples.len());

    for (slot, ((tensor, label), &index)) in samples.into_iter().zip(&indices).enumerate() {
        if tensor.shape() != expected.as_slice() {
            return Err(DataError::ShapeMismatch {
                index,
                expected,
                actual: tensor.shape().to_vec(),
            });
        }
        inputs.index_axis_mut(Axis(0), slot).assign(&tensor);
        labels.push(label);
    }

    Ok(Batch {
        inputs,
        labels,
        indices,
    })
}
