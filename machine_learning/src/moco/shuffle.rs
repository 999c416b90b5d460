use std::ops::Deref;

use comms::Collective;
use log::debug;
use ndarray::{Array2, ArrayView2, Axis};
use rand::{Rng, seq::SliceRandom};

use crate::{MlErr, Result};

/// The rank that draws every step's permutation.
const SOURCE_RANK: usize = 0;

/// A bijection over the rows of the globally gathered batch.
///
/// Position `i` of the shuffled batch holds row `self[i]` of the original one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation(Vec<usize>);

impl Permutation {
    /// Draws a uniformly random permutation of `0..n`.
    pub fn random<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Self {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(rng);
        Self(indices)
    }

    /// Creates a `Permutation` from explicit indices.
    ///
    /// # Returns
    /// An error if `indices` is not a bijection over `0..indices.len()`.
    pub fn from_indices(indices: Vec<usize>) -> Result<Self> {
        let len = indices.len();
        let mut seen = vec![false; len];

        for &i in &indices {
            if i >= len || seen[i] {
                return Err(MlErr::InvalidPermutation { len });
            }

            seen[i] = true;
        }

        Ok(Self(indices))
    }

    /// Returns the permutation that takes the shuffled order back to the original one,
    /// computed as the argsort of this permutation.
    pub fn inverse(&self) -> Self {
        let mut inverse: Vec<usize> = (0..self.0.len()).collect();
        inverse.sort_unstable_by_key(|&i| self.0[i]);
        Self(inverse)
    }

    /// Returns the contiguous slice of the permuted order owned by `rank`.
    ///
    /// # Returns
    /// An error if the permutation can't be split evenly or the rank is out of range.
    pub fn shard(&self, rank: usize, world_size: usize) -> Result<&[usize]> {
        let global = self.0.len();
        if world_size == 0 || global % world_size != 0 {
            return Err(MlErr::BatchNotDivisible { global, world_size });
        }

        if rank >= world_size {
            return Err(MlErr::SizeMismatch {
                what: "shard rank",
                got: rank,
                expected: world_size,
            });
        }

        let local = global / world_size;
        Ok(&self.0[rank * local..(rank + 1) * local])
    }

    /// Encodes the indices so they can travel through a float collective, every index
    /// being carried bit for bit as a `u32`.
    pub fn to_wire(&self) -> Vec<f32> {
        let bits: Vec<u32> = self.0.iter().map(|&i| i as u32).collect();
        bytemuck::cast_slice(&bits).to_vec()
    }

    /// Decodes a permutation encoded with `to_wire`.
    pub fn from_wire(wire: &[f32]) -> Result<Self> {
        let bits: &[u32] = bytemuck::cast_slice(wire);
        Self::from_indices(bits.iter().map(|&i| i as usize).collect())
    }
}

impl Deref for Permutation {
    type Target = [usize];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Selects the rows of the permuted global batch that belong to `rank`.
///
/// # Arguments
/// * `global` - Every worker's batch concatenated in rank order.
/// * `permutation` - The order in which the global rows are dealt.
/// * `rank` - The rank whose shard is returned.
/// * `world_size` - The amount of workers.
///
/// # Returns
/// The rows `global[permutation[rank * local..(rank + 1) * local]]`.
pub fn select_shard(
    global: ArrayView2<f32>,
    permutation: &Permutation,
    rank: usize,
    world_size: usize,
) -> Result<Array2<f32>> {
    if permutation.len() != global.nrows() {
        return Err(MlErr::SizeMismatch {
            what: "permutation length",
            got: permutation.len(),
            expected: global.nrows(),
        });
    }

    let indices = permutation.shard(rank, world_size)?;
    Ok(global.select(Axis(0), indices))
}

/// Gathers every worker's rows into one batch ordered by rank.
///
/// # Returns
/// The global batch or a configuration error if the workers hold different amounts of rows.
pub async fn concat_all_gather<C: Collective>(
    comm: &mut C,
    x: ArrayView2<'_, f32>,
) -> Result<Array2<f32>> {
    let (rows, cols) = x.dim();
    let local: Vec<f32> = x.iter().copied().collect();
    let world_size = comm.world_size();

    let parts = comm.gather_all(&local).await?;
    let total: usize = parts.iter().map(Vec::len).sum();

    if parts.iter().any(|part| part.len() != local.len()) {
        return Err(MlErr::BatchNotDivisible {
            global: total / cols.max(1),
            world_size,
        });
    }

    let flat: Vec<f32> = parts.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((rows * world_size, cols), flat)?)
}

/// Scatters the rows of `x` across the workers following a permutation drawn on one
/// worker and shared with the rest.
///
/// Every worker of the group must call this with the same amount of rows.
///
/// # Arguments
/// * `comm` - The worker group.
/// * `rng` - Used to draw the permutation, only on the source rank.
/// * `x` - This worker's rows.
///
/// # Returns
/// This worker's shard of the shuffled global batch and the inverse permutation
/// `unshuffle` needs.
pub async fn shuffle<C, R>(
    comm: &mut C,
    rng: &mut R,
    x: ArrayView2<'_, f32>,
) -> Result<(Array2<f32>, Permutation)>
where
    C: Collective,
    R: Rng + Send,
{
    let global = concat_all_gather(comm, x).await?;
    let rank = comm.rank();
    let world_size = comm.world_size();

    let wire = if rank == SOURCE_RANK {
        Permutation::random(global.nrows(), rng).to_wire()
    } else {
        Vec::new()
    };

    let wire = comm.broadcast(wire, SOURCE_RANK).await?;
    let permutation = Permutation::from_wire(&wire)?;
    if permutation.len() != global.nrows() {
        return Err(MlErr::SizeMismatch {
            what: "broadcast permutation",
            got: permutation.len(),
            expected: global.nrows(),
        });
    }

    debug!(rank = rank, global = global.nrows(); "shuffled key batch");

    let shard = select_shard(global.view(), &permutation, rank, world_size)?;
    Ok((shard, permutation.inverse()))
}

/// Undoes a `shuffle`, giving back the rows of this worker's original batch in their
/// original order.
///
/// # Arguments
/// * `comm` - The worker group.
/// * `x` - Rows computed from this worker's shuffled shard.
/// * `inverse` - The inverse permutation returned by `shuffle`.
pub async fn unshuffle<C: Collective>(
    comm: &mut C,
    x: ArrayView2<'_, f32>,
    inverse: &Permutation,
) -> Result<Array2<f32>> {
    let global = concat_all_gather(comm, x).await?;
    select_shard(global.view(), inverse, comm.rank(), comm.world_size())
}
