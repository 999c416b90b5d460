pub mod activations;
mod builder;
mod encoder;
pub mod layers;
mod sequential;

pub use builder::build_encoder;
pub use encoder::Encoder;
pub use sequential::Sequential;
