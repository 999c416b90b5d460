use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A network mapping a batch of inputs to embeddings using an external flat parameter buffer.
///
/// The parameters are not owned by the encoder so that the same architecture can be driven
/// with both the query and the key parameter sets.
pub trait Encoder: Clone + Send {
    /// Returns the amount of parameters the encoder needs.
    fn size(&self) -> usize;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Computes the output for `x` and keeps the activations needed by `backward`.
    ///
    /// # Arguments
    /// * `params` - The flat parameter buffer.
    /// * `x` - A batch of inputs, one per row.
    ///
    /// # Returns
    /// The batch of outputs or an error if occurred.
    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Computes the output for `x` without keeping anything, so no gradient can flow through it.
    fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Backpropagates `d` through the last `forward` call, adding into `grad`.
    ///
    /// # Arguments
    /// * `params` - The parameters used in the last `forward` call.
    /// * `grad` - The gradient buffer, same length as `params`.
    /// * `d` - The derivative of the loss with respect to the encoder's output.
    fn backward(&mut self, params: &[f32], grad: &mut [f32], d: Array2<f32>) -> Result<()>;
}
