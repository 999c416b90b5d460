use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used for collective operations.
pub type Result<T> = std::result::Result<T, CommErr>;

/// Failures while coordinating a group of workers.
#[derive(Debug)]
pub enum CommErr {
    Io(io::Error),
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    ShardSizeMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
    UnexpectedMessage {
        got: &'static str,
    },
    Remote(String),
}

impl Display for CommErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommErr::Io(e) => write!(f, "io error: {e}"),
            CommErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of bounds for a group of {world_size}")
            }
            CommErr::ShardSizeMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "rank {rank} contributed {got} values to a collective, expected {expected}"
            ),
            CommErr::UnexpectedMessage { got } => {
                write!(f, "unexpected message during a collective: got {got}")
            }
            CommErr::Remote(detail) => write!(f, "a peer aborted the collective: {detail}"),
        }
    }
}

impl Error for CommErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CommErr> for io::Error {
    fn from(value: CommErr) -> Self {
        match value {
            CommErr::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}
