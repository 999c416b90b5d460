use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Barrier;

use crate::{Collective, CommErr, Result};

struct Shared {
    slots: Mutex<Vec<Vec<f32>>>,
    barrier: Barrier,
}

/// An in-process worker group, every worker being a task of the same runtime.
///
/// Contributions are written into a shared slot per rank and read back once every
/// worker has reached the barrier.
#[derive(Clone)]
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Creates the handles of a new group.
    ///
    /// # Arguments
    /// * `world_size` - The amount of workers in the group.
    ///
    /// # Returns
    /// One handle per rank, the i-th one having rank i.
    pub fn new(world_size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            slots: Mutex::new(vec![Vec::new(); world_size]),
            barrier: Barrier::new(world_size),
        });

        (0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                shared: shared.clone(),
            })
            .collect()
    }
}

impl Collective for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn gather_all(&mut self, tensor: &[f32]) -> Result<Vec<Vec<f32>>> {
        self.shared.slots.lock()[self.rank] = tensor.to_vec();
        self.shared.barrier.wait().await;

        let gathered = self.shared.slots.lock().clone();

        // Nobody may write the slots again until everyone has read them.
        self.shared.barrier.wait().await;
        Ok(gathered)
    }

    async fn broadcast(&mut self, tensor: Vec<f32>, src: usize) -> Result<Vec<f32>> {
        if src >= self.world_size {
            return Err(CommErr::InvalidRank {
                rank: src,
                world_size: self.world_size,
            });
        }

        if self.rank == src {
            self.shared.slots.lock()[src] = tensor;
        }
        self.shared.barrier.wait().await;

        let value = self.shared.slots.lock()[src].clone();
        self.shared.barrier.wait().await;
        Ok(value)
    }
}
