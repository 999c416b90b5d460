mod sampler;
mod synthetic;

use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;

pub use sampler::DistributedSampler;
pub use synthetic::{JitterPairs, SyntheticClusters};

use crate::{MlErr, Result};

/// A dataset yielding two independently augmented views of each sample.
pub trait PairDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn input_dim(&self) -> usize;

    /// Builds both views of the samples at `indices`, one sample per row.
    fn pairs<R: Rng>(&self, indices: &[usize], rng: &mut R) -> (Array2<f32>, Array2<f32>);
}

/// An in-memory labeled dataset, used as the KNN memory and test sets.
#[derive(Debug, Clone)]
pub struct LabeledSet {
    samples: Array2<f32>,
    labels: Vec<usize>,
    classes: usize,
}

impl LabeledSet {
    /// Creates a new `LabeledSet`.
    ///
    /// # Arguments
    /// * `samples` - One sample per row.
    /// * `labels` - The class of every row.
    /// * `classes` - The amount of classes.
    ///
    /// # Returns
    /// An error if there isn't exactly one label per row or a label is out of range.
    pub fn new(samples: Array2<f32>, labels: Vec<usize>, classes: usize) -> Result<Self> {
        if labels.len() != samples.nrows() {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: labels.len(),
                expected: samples.nrows(),
            });
        }

        if let Some(&label) = labels.iter().find(|&&label| label >= classes) {
            return Err(MlErr::LabelOutOfRange { label, classes });
        }

        Ok(Self {
            samples,
            labels,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn input_dim(&self) -> usize {
        self.samples.ncols()
    }

    pub fn samples(&self) -> ArrayView2<'_, f32> {
        self.samples.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Iterates the set in order, `batch_size` rows at a time, keeping the last partial batch.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> impl Iterator<Item = (ArrayView2<'_, f32>, &[usize])> {
        let batch_size = batch_size.max(1);

        self.samples
            .axis_chunks_iter(Axis(0), batch_size)
            .zip(self.labels.chunks(batch_size))
    }
}
