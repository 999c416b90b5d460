use comms::specs::moco::{EncoderSpec, ProjectionHeadSpec};

use super::{
    Sequential,
    activations::ActFn,
    layers::Layer,
};

/// Builds the encoder network described by `spec`.
///
/// Every hidden layer is a dense layer followed by a relu, then the projection head maps
/// the last hidden width to the embedding dimension.
///
/// # Arguments
/// * `input_dim` - The width of an input sample.
/// * `spec` - The hidden widths and the kind of projection head.
/// * `dim` - The embedding dimension.
///
/// # Returns
/// A new `Sequential` encoder.
pub fn build_encoder(input_dim: usize, spec: &EncoderSpec, dim: usize) -> Sequential {
    let mut layers = Vec::with_capacity(spec.hidden.len() + 2);
    let mut prev = input_dim;

    for &width in &spec.hidden {
        layers.push(Layer::dense((prev, width), Some(ActFn::relu())));
        prev = width;
    }

    match spec.head {
        ProjectionHeadSpec::Linear => {
            layers.push(Layer::dense((prev, dim), None));
        }
        ProjectionHeadSpec::Mlp => {
            layers.push(Layer::dense((prev, prev), Some(ActFn::relu())));
            layers.push(Layer::dense((prev, dim), None));
        }
    }

    Sequential::new(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Encoder;

    #[test]
    fn mlp_head_adds_a_hidden_layer() {
        let spec = EncoderSpec {
            hidden: vec![8],
            head: ProjectionHeadSpec::Mlp,
        };

        let net = build_encoder(4, &spec, 3);
        assert_eq!(net.layers().len(), 3);
        assert_eq!(net.size(), (4 + 1) * 8 + (8 + 1) * 8 + (8 + 1) * 3);
        assert_eq!(net.output_dim(), 3);
    }

    #[test]
    fn linear_head_without_hidden_layers() {
        let spec = EncoderSpec {
            hidden: vec![],
            head: ProjectionHeadSpec::Linear,
        };

        let net = build_encoder(4, &spec, 2);
        assert_eq!(net.layers().len(), 1);
        assert_eq!(net.input_dim(), 4);
        assert_eq!(net.size(), 10);
    }
}
