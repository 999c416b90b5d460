use std::f32::consts::PI;

use comms::specs::training::ScheduleSpec;

/// Maps an epoch to the learning rate used during it.
#[derive(Debug, Clone)]
pub struct LrSchedule {
    base: f32,
    epochs: usize,
    spec: ScheduleSpec,
}

impl LrSchedule {
    pub fn new(base: f32, epochs: usize, spec: ScheduleSpec) -> Self {
        Self { base, epochs, spec }
    }

    /// Returns the learning rate for the zero based `epoch`.
    pub fn learning_rate(&self, epoch: usize) -> f32 {
        match &self.spec {
            ScheduleSpec::Cosine => {
                let progress = epoch as f32 / self.epochs.max(1) as f32;
                self.base * 0.5 * (1. + (PI * progress).cos())
            }
            ScheduleSpec::Steps { milestones } => {
                let passed = milestones.iter().filter(|&&m| epoch >= m).count();
                self.base * 0.1f32.powi(passed as i32)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_starts_at_base_and_halves_midway() {
        let schedule = LrSchedule::new(0.4, 10, ScheduleSpec::Cosine);
        assert!((schedule.learning_rate(0) - 0.4).abs() < 1e-6);
        assert!((schedule.learning_rate(5) - 0.2).abs() < 1e-6);
        assert!(schedule.learning_rate(9) < schedule.learning_rate(8));
    }

    #[test]
    fn steps_divide_by_ten_per_milestone() {
        let spec = ScheduleSpec::Steps {
            milestones: vec![2, 4],
        };
        let schedule = LrSchedule::new(1., 6, spec);

        assert_eq!(schedule.learning_rate(1), 1.);
        assert!((schedule.learning_rate(2) - 0.1).abs() < 1e-6);
        assert!((schedule.learning_rate(5) - 0.01).abs() < 1e-6);
    }
}
