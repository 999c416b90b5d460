use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Splits a dataset between the workers, reshuffling it every epoch.
///
/// Every worker draws the same epoch order from the shared seed, pads it by wrapping
/// around so it divides evenly, and keeps every `world_size`-th index starting at its
/// rank. Incomplete trailing batches are dropped.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    rank: usize,
    world_size: usize,
    batch_size: usize,
    seed: u64,
}

impl DistributedSampler {
    /// Creates a new `DistributedSampler`.
    ///
    /// # Arguments
    /// * `len` - The size of the dataset.
    /// * `rank` - This worker's rank.
    /// * `world_size` - The amount of workers.
    /// * `batch_size` - The per worker batch size.
    /// * `seed` - The seed shared by every worker.
    pub fn new(len: usize, rank: usize, world_size: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            len,
            rank,
            world_size: world_size.max(1),
            batch_size: batch_size.max(1),
            seed,
        }
    }

    /// Returns the amount of samples this worker sees per epoch before batching.
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.world_size)
    }

    /// Returns the amount of full batches per epoch.
    pub fn num_batches(&self) -> usize {
        self.num_samples() / self.batch_size
    }

    /// Returns this worker's batches of dataset indices for `epoch`.
    pub fn epoch_batches(&self, epoch: usize) -> Vec<Vec<usize>> {
        if self.len == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..self.len).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);

        let total = self.num_samples() * self.world_size;
        let padding: Vec<usize> = order.iter().copied().cycle().take(total - self.len).collect();
        order.extend(padding);

        let mine: Vec<usize> = order
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect();

        mine.chunks_exact(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn workers_cover_the_dataset_without_overlap() {
        let samplers: Vec<_> = (0..3)
            .map(|rank| DistributedSampler::new(12, rank, 3, 2, 7))
            .collect();

        let mut seen = HashSet::new();
        for sampler in &samplers {
            let batches = sampler.epoch_batches(0);
            assert_eq!(batches.len(), 2);

            for i in batches.into_iter().flatten() {
                assert!(seen.insert(i));
            }
        }

        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn uneven_datasets_are_padded_and_tails_dropped() {
        let sampler = DistributedSampler::new(5, 1, 2, 2, 0);
        assert_eq!(sampler.num_samples(), 3);
        assert_eq!(sampler.num_batches(), 1);

        let batches = sampler.epoch_batches(3);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn order_changes_between_epochs_but_not_between_calls() {
        let sampler = DistributedSampler::new(64, 0, 1, 64, 1);
        assert_eq!(sampler.epoch_batches(0), sampler.epoch_batches(0));
        assert_ne!(sampler.epoch_batches(0), sampler.epoch_batches(1));
    }
}
