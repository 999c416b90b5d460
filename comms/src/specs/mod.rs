//! Serializable run configuration, shared by every worker of a group.

pub mod moco;
pub mod training;
