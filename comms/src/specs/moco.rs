use serde::{Deserialize, Serialize};

/// The projection head appended to the encoder trunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionHeadSpec {
    /// A single dense layer from the trunk's width to the feature dimension.
    Linear,
    /// A hidden dense layer with a ReLU before the final dense layer.
    #[default]
    Mlp,
}

/// The specification of the encoder network shared by the query and key encoders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSpec {
    /// The width of the trunk's hidden layers, each followed by a ReLU.
    pub hidden: Vec<usize>,
    #[serde(default)]
    pub head: ProjectionHeadSpec,
}

/// Hyperparameters of the contrastive core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MocoSpec {
    /// The feature dimension.
    #[serde(default = "default_dim")]
    pub dim: usize,
    /// The amount of negative keys kept in the queue.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// The momentum of the key encoder update.
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    /// The softmax temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Whether the loss is computed in both directions.
    #[serde(default)]
    pub symmetric: bool,
    pub encoder: EncoderSpec,
}

/// Hyperparameters of the k-nearest-neighbour monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnnSpec {
    #[serde(default = "default_knn_k")]
    pub k: usize,
    #[serde(default = "default_knn_t")]
    pub t: f32,
}

impl Default for KnnSpec {
    fn default() -> Self {
        Self {
            k: default_knn_k(),
            t: default_knn_t(),
        }
    }
}

fn default_dim() -> usize {
    128
}

fn default_queue_size() -> usize {
    4096
}

fn default_momentum() -> f32 {
    0.99
}

fn default_temperature() -> f32 {
    0.1
}

fn default_knn_k() -> usize {
    200
}

fn default_knn_t() -> f32 {
    0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_fields_take_the_usual_values() {
        let spec: MocoSpec = serde_json::from_str(r#"{ "encoder": { "hidden": [64] } }"#).unwrap();

        assert_eq!(spec.dim, 128);
        assert_eq!(spec.queue_size, 4096);
        assert_eq!(spec.momentum, 0.99);
        assert_eq!(spec.temperature, 0.1);
        assert!(!spec.symmetric);
        assert_eq!(spec.encoder.head, ProjectionHeadSpec::Mlp);
    }

    #[test]
    fn head_is_snake_case() {
        let spec: EncoderSpec =
            serde_json::from_str(r#"{ "hidden": [], "head": "linear" }"#).unwrap();
        assert_eq!(spec.head, ProjectionHeadSpec::Linear);
    }
}
