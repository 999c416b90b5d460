use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer over a flat parameter slice laid out as the
/// `dim.0 x dim.1` weight matrix followed by the `dim.1` biases.
#[derive(Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output widths.
    /// * `act_fn` - An optional activation applied to the output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the input and output widths.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Computes the layer's output, keeping what `backward` needs.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.linear(params, x)?;
        let a = self.activate(&z);

        self.x = x.to_owned();
        self.z = z;
        Ok(a)
    }

    /// Computes the layer's output without keeping anything for a backward pass.
    pub fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.linear(params, x)?;
        Ok(self.activate(&z))
    }

    /// Accumulates this layer's gradient into `grad` and propagates `d` to its input.
    ///
    /// # Arguments
    /// * `params` - The same parameters given to the last `forward` call.
    /// * `grad` - The layer's gradient slice, added to rather than overwritten.
    /// * `d` - The derivative of the loss with respect to the layer's output.
    ///
    /// # Returns
    /// The derivative of the loss with respect to the layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != self.z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense backward rows",
                got: d.nrows(),
                expected: self.z.nrows(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    fn linear(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input width",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        Ok(x.dot(&w) + &b)
    }

    fn activate(&self, z: &Array2<f32>) -> Array2<f32> {
        match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        }
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense gradient", grad.len())?;

        let (dw_raw, db_raw) = grad.split_at_mut(self.size - self.dim.1);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense parameters", params.len())?;

        let (w_raw, b_raw) = params.split_at(self.size - self.dim.1);
        let w = ArrayView2::from_shape(self.dim, w_raw)?;
        let b = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((w, b))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    // w = [[1, 2], [3, 4]], b = [0.5, -1]
    const PARAMS: [f32; 6] = [1., 2., 3., 4., 0.5, -1.];

    #[test]
    fn forward_is_affine() {
        let mut dense = Dense::new((2, 2), None);
        let y = dense.forward(&PARAMS, array![[1., 1.]].view()).unwrap();
        assert_eq!(y, array![[4.5, 5.]]);
    }

    #[test]
    fn relu_clips_negative_outputs() {
        let dense = Dense::new((2, 2), Some(ActFn::relu()));
        let y = dense.infer(&PARAMS, array![[-1., 0.]].view()).unwrap();
        assert_eq!(y, array![[0., 0.]]);
    }

    #[test]
    fn backward_accumulates_and_propagates() {
        let mut dense = Dense::new((2, 2), None);
        dense.forward(&PARAMS, array![[1., 2.]].view()).unwrap();

        let mut grad = [1.; 6];
        let dx = dense
            .backward(&PARAMS, &mut grad, array![[1., 0.]])
            .unwrap();

        // dw = x^T d, db = d, both added to the ones already in the buffer.
        assert_eq!(grad, [2., 1., 3., 1., 2., 1.]);
        assert_eq!(dx, array![[1., 3.]]);
    }

    #[test]
    fn wrong_parameter_count_is_an_error() {
        let dense = Dense::new((2, 2), None);
        assert!(dense.infer(&PARAMS[..5], array![[1., 1.]].view()).is_err());
    }
}
