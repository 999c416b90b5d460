pub mod checkpoint;
pub mod config;
pub mod error;
pub mod results;
pub mod trainer;

pub use checkpoint::Checkpoint;
pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use results::{EpochRecord, ResultsLog};
pub use trainer::Trainer;
