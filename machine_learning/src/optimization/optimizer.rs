pub trait Optimizer {
    /// Applies a step computed from `grad` onto `params`.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]);

    fn set_learning_rate(&mut self, learning_rate: f32);

    fn learning_rate(&self) -> f32;
}
