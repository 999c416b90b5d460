use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::moco::{KnnSpec, MocoSpec};

/// The learning rate schedule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Half a cosine period from the base rate down to zero over the whole run.
    #[default]
    Cosine,
    /// The base rate is divided by ten at every milestone epoch.
    Steps { milestones: Vec<usize> },
}

/// Stochastic gradient descent hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSpec {
    pub learning_rate: f32,
    #[serde(default = "default_sgd_momentum")]
    pub momentum: f32,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
}

/// The dataset every worker trains and evaluates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSpec {
    /// Labeled gaussian clusters, views are made by jittering a sample.
    SyntheticClusters {
        classes: usize,
        input_dim: usize,
        train_per_class: usize,
        test_per_class: usize,
        spread: f32,
        jitter: f32,
        seed: u64,
    },
}

/// The full run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    pub epochs: usize,
    /// The global batch size, split evenly between the workers.
    pub batch_size: usize,
    pub seed: u64,
    pub moco: MocoSpec,
    #[serde(default)]
    pub knn: KnnSpec,
    pub optimizer: OptimizerSpec,
    #[serde(default)]
    pub schedule: ScheduleSpec,
    pub dataset: DatasetSpec,
    /// Where the run's config, results log and checkpoint are written.
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
    /// A checkpoint to resume from.
    #[serde(default)]
    pub resume: Option<PathBuf>,
}

fn default_sgd_momentum() -> f32 {
    0.9
}

fn default_weight_decay() -> f32 {
    5e-4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_spec_from_json() {
        let json = r#"{
            "epochs": 2,
            "batch_size": 8,
            "seed": 7,
            "moco": { "dim": 4, "queue_size": 16, "encoder": { "hidden": [8] } },
            "optimizer": { "learning_rate": 0.06 },
            "schedule": { "steps": { "milestones": [120, 160] } },
            "dataset": { "synthetic_clusters": {
                "classes": 2, "input_dim": 3, "train_per_class": 8,
                "test_per_class": 2, "spread": 0.1, "jitter": 0.05, "seed": 1
            } }
        }"#;

        let spec: TrainingSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.moco.queue_size, 16);
        assert_eq!(spec.optimizer.momentum, 0.9);
        assert_eq!(spec.optimizer.weight_decay, 5e-4);
        assert_eq!(spec.knn, KnnSpec::default());
        assert_eq!(
            spec.schedule,
            ScheduleSpec::Steps {
                milestones: vec![120, 160]
            }
        );
        assert!(spec.resume.is_none());
    }
}
