use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{
    MlErr, Result,
    arch::{Encoder, Sequential},
};

/// A weight generator that follows a certain probabilistic distribution.
pub struct RandWeightGen<D: Distribution<f32>> {
    distribution: D,
    remaining: usize,
}

impl<D: Distribution<f32>> RandWeightGen<D> {
    /// Creates a new `RandWeightGen` weight generator.
    ///
    /// # Arguments
    /// * `distribution` - The distribution to sample the random numbers from.
    /// * `limit` - The maximum amount of numbers to generate.
    pub fn new(distribution: D, limit: usize) -> Self {
        Self {
            distribution,
            remaining: limit,
        }
    }

    /// Samples at most `n` weights.
    ///
    /// # Returns
    /// `None` once the generator is exhausted.
    pub fn sample<R: Rng>(&mut self, rng: &mut R, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;
        Some((0..n).map(|_| self.distribution.sample(rng)).collect())
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl RandWeightGen<Uniform<f32>> {
    /// Creates a new `RandWeightGen` drawing from `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`, the
    /// default initialization of a dense layer.
    ///
    /// # Arguments
    /// * `limit` - The maximum amount of numbers to generate.
    /// * `fan_in` - The number of input units in the weight tensor.
    ///
    /// # Returns
    /// An error if the calculated range is invalid.
    pub fn fan_in_uniform(limit: usize, fan_in: usize) -> Result<Self> {
        let range = 1. / (fan_in.max(1) as f32).sqrt();
        let distribution = Uniform::new(-range, range)
            .map_err(|e| MlErr::InvalidConfig(format!("weight range: {e}")))?;

        Ok(Self::new(distribution, limit))
    }
}

/// Draws a fresh flat parameter buffer for `encoder`, layer by layer.
///
/// # Arguments
/// * `encoder` - The network whose parameters are drawn.
/// * `rng` - A random number generator.
///
/// # Returns
/// A buffer of `encoder.size()` parameters.
pub fn init_params<R: Rng>(encoder: &Sequential, rng: &mut R) -> Result<Vec<f32>> {
    let mut params = Vec::with_capacity(encoder.size());

    for layer in encoder.layers() {
        let size = layer.size();
        let mut weight_gen = RandWeightGen::fan_in_uniform(size, layer.fan_in())?;

        while let Some(sample) = weight_gen.sample(rng, size) {
            params.extend(sample);
        }
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::arch::{activations::ActFn, layers::Layer};

    #[test]
    fn generator_stops_at_its_limit() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut weight_gen = RandWeightGen::fan_in_uniform(5, 4).unwrap();

        assert_eq!(weight_gen.sample(&mut rng, 3).unwrap().len(), 3);
        assert_eq!(weight_gen.sample(&mut rng, 3).unwrap().len(), 2);
        assert!(weight_gen.sample(&mut rng, 3).is_none());
    }

    #[test]
    fn params_fill_the_encoder_within_bounds() {
        let net = Sequential::new([
            Layer::dense((16, 4), Some(ActFn::relu())),
            Layer::dense((4, 2), None),
        ]);

        let params = init_params(&net, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(params.len(), net.size());

        let (first, second) = params.split_at(net.layers()[0].size());
        assert!(first.iter().all(|w| w.abs() <= 0.25));
        assert!(second.iter().all(|w| w.abs() <= 0.5));
    }

    #[test]
    fn same_seed_same_params() {
        let net = Sequential::new([Layer::dense((3, 3), None)]);
        let a = init_params(&net, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = init_params(&net, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
