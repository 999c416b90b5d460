mod optimizer;
mod schedule;
mod sgd;

pub use optimizer::Optimizer;
pub use schedule::LrSchedule;
pub use sgd::Sgd;
