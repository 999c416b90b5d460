use comms::specs::training::DatasetSpec;
use log::info;
use ndarray::{Array2, Axis};
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::Normal;

use super::{LabeledSet, PairDataset};
use crate::{MlErr, Result};

/// Labeled gaussian clusters around random centers, split in a training and a test set.
#[derive(Debug, Clone)]
pub struct SyntheticClusters {
    train: LabeledSet,
    test: LabeledSet,
    jitter: f32,
}

impl SyntheticClusters {
    /// Generates the dataset described by `spec`, deterministic given its seed.
    pub fn generate(spec: &DatasetSpec) -> Result<Self> {
        let &DatasetSpec::SyntheticClusters {
            classes,
            input_dim,
            train_per_class,
            test_per_class,
            spread,
            jitter,
            seed,
        } = spec;

        if classes == 0 || input_dim == 0 {
            return Err(MlErr::InvalidConfig(
                "synthetic clusters need at least one class and one input".into(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let centers = Array2::random_using((classes, input_dim), normal(1.)?, &mut rng);
        let noise = normal(spread)?;

        let mut split = |per_class: usize| {
            let labels: Vec<usize> = (0..classes)
                .flat_map(|c| std::iter::repeat_n(c, per_class))
                .collect();

            let mut samples = centers.select(Axis(0), &labels);
            let offsets = Array2::random_using(samples.dim(), noise, &mut rng);
            samples += &offsets;
            LabeledSet::new(samples, labels, classes)
        };

        let train = split(train_per_class)?;
        let test = split(test_per_class)?;
        info!(classes = classes, train = train.len(), test = test.len(); "generated synthetic clusters");

        Ok(Self {
            train,
            test,
            jitter,
        })
    }

    /// The training set with its two-view augmentation.
    pub fn train(&self) -> Result<JitterPairs> {
        JitterPairs::new(self.train.clone(), self.jitter)
    }

    /// The training samples without augmentation, used as the KNN feature bank.
    pub fn memory(&self) -> &LabeledSet {
        &self.train
    }

    pub fn test(&self) -> &LabeledSet {
        &self.test
    }
}

fn normal(std_dev: f32) -> Result<Normal<f32>> {
    if !(std_dev >= 0.) {
        return Err(MlErr::InvalidConfig(format!(
            "a standard deviation must be non-negative, got {std_dev}"
        )));
    }

    Normal::new(0., std_dev).map_err(|e| MlErr::InvalidConfig(format!("normal distribution: {e}")))
}

/// Views built by adding independent gaussian noise to each sample.
#[derive(Debug, Clone)]
pub struct JitterPairs {
    set: LabeledSet,
    noise: Normal<f32>,
}

impl JitterPairs {
    pub fn new(set: LabeledSet, jitter: f32) -> Result<Self> {
        Ok(Self {
            set,
            noise: normal(jitter)?,
        })
    }
}

impl PairDataset for JitterPairs {
    fn len(&self) -> usize {
        self.set.len()
    }

    fn input_dim(&self) -> usize {
        self.set.input_dim()
    }

    fn pairs<R: Rng>(&self, indices: &[usize], rng: &mut R) -> (Array2<f32>, Array2<f32>) {
        let samples = self.set.samples().select(Axis(0), indices);
        let view_1 = &samples + &Array2::random_using(samples.dim(), self.noise, rng);
        let view_2 = &samples + &Array2::random_using(samples.dim(), self.noise, rng);
        (view_1, view_2)
    }
}
