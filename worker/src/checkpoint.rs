use std::{fs, path::Path};

use machine_learning::moco::MocoState;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{Result, WorkerErr};

/// The name of the checkpoint written at the end of every epoch.
pub const CHECKPOINT_FILE: &str = "model_last.json";

/// Everything needed to resume a run: both encoders, the queue and the optimizer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The last completed epoch.
    pub epoch: usize,
    pub query_params: Vec<f32>,
    pub key_params: Vec<f32>,
    /// The queue flattened in row-major order, `dim` rows.
    pub queue: Vec<f32>,
    pub dim: usize,
    pub ptr: usize,
    pub velocity: Vec<f32>,
}

impl Checkpoint {
    pub fn new(epoch: usize, state: MocoState, velocity: Vec<f32>) -> Self {
        let dim = state.queue.nrows();
        let queue = state.queue.iter().copied().collect();

        Self {
            epoch,
            query_params: state.query_params,
            key_params: state.key_params,
            queue,
            dim,
            ptr: state.ptr,
            velocity,
        }
    }

    /// Splits the checkpoint back into the engine state and the optimizer velocity.
    pub fn into_parts(self) -> Result<(MocoState, Vec<f32>)> {
        if self.dim == 0 || self.queue.len() % self.dim != 0 {
            return Err(WorkerErr::Config(format!(
                "a queue of {} values can't have {} rows",
                self.queue.len(),
                self.dim
            )));
        }

        let capacity = self.queue.len() / self.dim;
        let queue = Array2::from_shape_vec((self.dim, capacity), self.queue)
            .map_err(machine_learning::MlErr::from)?;

        let state = MocoState {
            query_params: self.query_params,
            key_params: self.key_params,
            queue,
            ptr: self.ptr,
        };

        Ok((state, self.velocity))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
