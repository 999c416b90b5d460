use std::{
    error::Error,
    fmt::{self, Display},
};

use comms::CommErr;
use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    QueueNotDivisible {
        capacity: usize,
        batch: usize,
    },
    BatchNotDivisible {
        global: usize,
        world_size: usize,
    },
    InvalidPermutation {
        len: usize,
    },
    LabelOutOfRange {
        label: usize,
        classes: usize,
    },
    InvalidConfig(String),
    Comm(CommErr),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::Shape(e) => write!(f, "Invalid array shape: {e}"),
            MlErr::QueueNotDivisible { capacity, batch } => write!(
                f,
                "The queue capacity {capacity} is not a multiple of the enqueued batch size {batch}"
            ),
            MlErr::BatchNotDivisible { global, world_size } => write!(
                f,
                "The global batch of {global} samples can't be split evenly between {world_size} workers"
            ),
            MlErr::InvalidPermutation { len } => {
                write!(f, "The given indices are not a permutation of 0..{len}")
            }
            MlErr::LabelOutOfRange { label, classes } => {
                write!(f, "Label {label} is out of range for {classes} classes")
            }
            MlErr::InvalidConfig(detail) => write!(f, "Invalid configuration: {detail}"),
            MlErr::Comm(e) => write!(f, "Collective failed: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<CommErr> for MlErr {
    fn from(value: CommErr) -> Self {
        Self::Comm(value)
    }
}
