use log::trace;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::{MlErr, Result, arch::Encoder, optimization::Optimizer};

/// Moves every key parameter towards its aligned query parameter,
/// `k = m * k + (1 - m) * q`.
///
/// # Arguments
/// * `key` - The key parameters, updated in place.
/// * `query` - The query parameters.
/// * `m` - The momentum, the fraction of the old key value that is kept.
pub fn momentum_update(key: &mut [f32], query: &[f32], m: f32) {
    key.par_iter_mut()
        .zip(query.par_iter())
        .for_each(|(k, q)| *k = m * *k + (1. - m) * q);
}

/// Two structurally identical encoders: a query encoder trained by gradient descent and a
/// key encoder that only follows it through the momentum update.
///
/// The key path only ever runs through `Encoder::infer`, so it never caches activations
/// and nothing can backpropagate into the key parameters.
pub struct DualEncoder<E: Encoder> {
    query: E,
    key: E,
    query_params: Vec<f32>,
    key_params: Vec<f32>,
    grad: Vec<f32>,
}

impl<E: Encoder> DualEncoder<E> {
    /// Creates a new `DualEncoder`, the key parameters start as a copy of the query's.
    ///
    /// # Arguments
    /// * `encoder` - The architecture shared by both encoders.
    /// * `params` - The initial query parameters.
    ///
    /// # Returns
    /// A new `DualEncoder` or an error if `params` doesn't fit the architecture.
    pub fn new(encoder: E, params: Vec<f32>) -> Result<Self> {
        let size = encoder.size();
        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "query parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(Self {
            key: encoder.clone(),
            query: encoder,
            key_params: params.clone(),
            query_params: params,
            grad: vec![0.; size],
        })
    }

    /// Encodes `x` with the query encoder, keeping what `backward_query` needs.
    pub fn encode_query(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.query.forward(&self.query_params, x)
    }

    /// Accumulates the query gradient for the last `encode_query` call.
    pub fn backward_query(&mut self, d: Array2<f32>) -> Result<()> {
        self.query.backward(&self.query_params, &mut self.grad, d)
    }

    /// Encodes `x` with the key encoder, detached from any gradient.
    pub fn encode_key(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.key.infer(&self.key_params, x)
    }

    /// Embeds `x` with the query encoder without tracking a gradient, used for evaluation.
    pub fn embed(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.query.infer(&self.query_params, x)
    }

    /// Advances the key parameters, see [`momentum_update`].
    pub fn momentum_update(&mut self, m: f32) {
        momentum_update(&mut self.key_params, &self.query_params, m);
        trace!(momentum = m; "key encoder updated");
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    /// Applies the accumulated gradient onto the query parameters.
    pub fn step<O: Optimizer>(&mut self, optimizer: &mut O) {
        optimizer.update_params(&mut self.query_params, &self.grad);
    }

    pub fn query_params(&self) -> &[f32] {
        &self.query_params
    }

    pub fn key_params(&self) -> &[f32] {
        &self.key_params
    }

    pub fn encoder(&self) -> &E {
        &self.query
    }

    /// Replaces both parameter sets, used when resuming or replicating a run.
    ///
    /// # Arguments
    /// * `query_params` - The new query parameters.
    /// * `key_params` - The new key parameters.
    ///
    /// # Returns
    /// An error if either set doesn't fit the architecture, leaving the encoder untouched.
    pub fn restore(&mut self, query_params: Vec<f32>, key_params: Vec<f32>) -> Result<()> {
        let expected = self.grad.len();

        for (what, got) in [
            ("query parameters", query_params.len()),
            ("key parameters", key_params.len()),
        ] {
            if got != expected {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected,
                });
            }
        }

        self.query_params = query_params;
        self.key_params = key_params;
        Ok(())
    }
}
