use super::Optimizer;

/// Stochastic gradient descent with heavy-ball momentum and L2 weight decay.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
    velocity: Vec<f32>,
}

impl Sgd {
    /// Returns a new `Sgd`.
    ///
    /// # Arguments
    /// * `size` - The amount of parameters it optimizes.
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    /// * `momentum` - The fraction of the previous step carried over.
    /// * `weight_decay` - The L2 penalty added to the gradient.
    pub fn new(size: usize, learning_rate: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            weight_decay,
            velocity: vec![0.; size],
        }
    }

    pub fn velocity(&self) -> &[f32] {
        &self.velocity
    }

    /// Replaces the momentum buffer, used when resuming a run.
    ///
    /// # Returns
    /// `false` if the buffer's length doesn't match the optimized parameters.
    pub fn restore_velocity(&mut self, velocity: Vec<f32>) -> bool {
        if velocity.len() != self.velocity.len() {
            return false;
        }

        self.velocity = velocity;
        true
    }
}

impl Optimizer for Sgd {
    /// Updates the parameters following `v = momentum * v + (g + weight_decay * w)` and
    /// `w = w - learning_rate * v`.
    ///
    /// # Arguments
    /// * `params` - The parameters that are going to be modified.
    /// * `grad` - The gradient used for taking the step.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) {
        let Self {
            learning_rate: lr,
            momentum,
            weight_decay,
            ..
        } = *self;

        for ((w, g), v) in params.iter_mut().zip(grad).zip(&mut self.velocity) {
            let g = g + weight_decay * *w;
            *v = momentum * *v + g;
            *w -= lr * *v;
        }
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_gradient_step_without_momentum() {
        let mut sgd = Sgd::new(2, 0.5, 0., 0.);
        let mut params = [1., -1.];
        sgd.update_params(&mut params, &[2., 2.]);
        assert_eq!(params, [0., -2.]);
    }

    #[test]
    fn momentum_accumulates_across_steps() {
        let mut sgd = Sgd::new(1, 1., 0.5, 0.);
        let mut params = [0.];

        sgd.update_params(&mut params, &[1.]);
        assert_eq!(params, [-1.]);

        sgd.update_params(&mut params, &[1.]);
        assert_eq!(sgd.velocity(), &[1.5]);
        assert_eq!(params, [-2.5]);
    }

    #[test]
    fn weight_decay_pulls_towards_zero() {
        let mut sgd = Sgd::new(1, 0.1, 0., 1.);
        let mut params = [2.];
        sgd.update_params(&mut params, &[0.]);
        assert!((params[0] - 1.8).abs() < 1e-6);
    }

    #[test]
    fn restore_checks_length() {
        let mut sgd = Sgd::new(2, 0.1, 0.9, 0.);
        assert!(!sgd.restore_velocity(vec![1.]));
        assert!(sgd.restore_velocity(vec![1., 2.]));
        assert_eq!(sgd.velocity(), &[1., 2.]);
    }
}
