//! The momentum-contrastive core: a query/key encoder pair, the cross-worker
//! shuffle around the key path, a queue of negatives and the InfoNCE loss.

mod dual_encoder;
mod engine;
mod loss;
mod normalize;
mod queue;
mod shuffle;

pub use dual_encoder::{DualEncoder, momentum_update};
pub use engine::{Moco, MocoState};
pub use loss::{cross_entropy, logits};
pub use normalize::{normalize, normalize_backward};
pub use queue::NegativeQueue;
pub use shuffle::{Permutation, concat_all_gather, select_shard, shuffle, unshuffle};
