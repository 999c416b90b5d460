use crate::{CommErr, Result};

/// The minimal set of cross-worker primitives the training core relies on.
///
/// Every call is a rendezvous: it completes only once every worker of the group has
/// issued the matching call, so all workers must perform the same sequence of
/// collectives. A missing worker stalls the group; detecting that is left to the caller.
#[allow(unused)]
#[trait_variant::make(Collective: Send)]
pub trait CollectiveTemplate {
    /// This worker's ordinal inside the group, static for its whole lifetime.
    fn rank(&self) -> usize;

    /// The amount of workers in the group.
    fn world_size(&self) -> usize;

    /// Collects every worker's `tensor`.
    ///
    /// # Arguments
    /// * `tensor` - This worker's contribution.
    ///
    /// # Returns
    /// One tensor per worker ordered by rank, identical on every worker.
    async fn gather_all(&mut self, tensor: &[f32]) -> Result<Vec<Vec<f32>>>;

    /// Distributes the `src` worker's tensor to the whole group.
    ///
    /// # Arguments
    /// * `tensor` - The value to share, only read on the `src` worker.
    /// * `src` - The rank of the worker that owns the value.
    ///
    /// # Returns
    /// The `src` worker's tensor.
    async fn broadcast(&mut self, tensor: Vec<f32>, src: usize) -> Result<Vec<f32>>;
}

/// Replaces `buf` by the element-wise mean of every worker's `buf`.
///
/// The sum is accumulated in rank order on every worker, so all of them end up with
/// bit-identical values.
///
/// # Arguments
/// * `comm` - The worker group.
/// * `buf` - This worker's values, overwritten with the group mean.
///
/// # Returns
/// A `ShardSizeMismatch` error if some worker contributed a buffer of a different length.
pub async fn all_reduce_mean<C: Collective>(comm: &mut C, buf: &mut [f32]) -> Result<()> {
    let world_size = comm.world_size();
    if world_size == 1 {
        return Ok(());
    }

    let gathered = comm.gather_all(buf).await?;

    if let Some((rank, part)) = gathered
        .iter()
        .enumerate()
        .find(|(_, part)| part.len() != buf.len())
    {
        return Err(CommErr::ShardSizeMismatch {
            rank,
            got: part.len(),
            expected: buf.len(),
        });
    }

    buf.fill(0.0);
    for part in &gathered {
        for (acc, x) in buf.iter_mut().zip(part) {
            *acc += x;
        }
    }

    let scale = 1.0 / world_size as f32;
    buf.iter_mut().for_each(|x| *x *= scale);
    Ok(())
}
