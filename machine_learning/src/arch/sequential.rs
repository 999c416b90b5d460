use ndarray::{Array2, ArrayView2};

use super::{Encoder, layers::Layer};
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlErr::SizeMismatch { what, got, expected });
        }

        Ok(())
    }
}

impl Encoder for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, Layer::fan_in)
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, Layer::output_dim)
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len("encoder parameters", params.len())?;

        let mut rest = params;
        let mut a = x.to_owned();

        for layer in self.layers.iter_mut() {
            let (front, back) = rest.split_at(layer.size());
            a = layer.forward(front, a.view())?;
            rest = back;
        }

        Ok(a)
    }

    fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len("encoder parameters", params.len())?;

        let mut rest = params;
        let mut a = x.to_owned();

        for layer in &self.layers {
            let (front, back) = rest.split_at(layer.size());
            a = layer.infer(front, a.view())?;
            rest = back;
        }

        Ok(a)
    }

    fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Result<()> {
        self.check_len("encoder parameters", params.len())?;
        self.check_len("encoder gradient", grad.len())?;

        let mut params = params;
        let mut grad = grad;

        for layer in self.layers.iter_mut().rev() {
            let cut = params.len() - layer.size();
            let (params_front, params_back) = params.split_at(cut);
            let (grad_front, grad_back) = std::mem::take(&mut grad).split_at_mut(cut);

            d = layer.backward(params_back, grad_back, d)?;

            params = params_front;
            grad = grad_front;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::activations::ActFn;

    fn net() -> Sequential {
        Sequential::new([
            Layer::dense((2, 2), Some(ActFn::relu())),
            Layer::dense((2, 1), None),
        ])
    }

    #[test]
    fn sizes_and_dims() {
        let net = net();
        assert_eq!(net.size(), 6 + 3);
        assert_eq!(net.input_dim(), 2);
        assert_eq!(net.output_dim(), 1);
    }

    #[test]
    fn forward_matches_infer() {
        let params: Vec<f32> = (0..9).map(|i| i as f32 * 0.1 - 0.3).collect();
        let x = array![[1., -2.], [0.5, 0.25]];
        let mut net = net();

        let a = net.forward(&params, x.view()).unwrap();
        let b = net.infer(&params, x.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let params: Vec<f32> = vec![0.3, -0.2, 0.5, 0.4, 0.1, 0.05, 0.7, -0.6, 0.2];
        let x = array![[1., 0.5], [-0.3, 0.8]];
        let mut net = net();

        // loss = sum of outputs
        net.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.; params.len()];
        net.backward(&params, &mut grad, Array2::ones((2, 1))).unwrap();

        let eps = 1e-3;
        for i in 0..params.len() {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[i] += eps;
            minus[i] -= eps;

            let lp = net.infer(&plus, x.view()).unwrap().sum();
            let lm = net.infer(&minus, x.view()).unwrap().sum();
            let numeric = (lp - lm) / (2. * eps);

            assert!((numeric - grad[i]).abs() < 1e-2, "param {i}: {numeric} vs {}", grad[i]);
        }
    }

    #[test]
    fn wrong_buffer_length_is_an_error() {
        let net = net();
        assert!(net.infer(&[0.; 8], array![[1., 1.]].view()).is_err());
    }
}
