use log::trace;
use ndarray::{Array2, ArrayView2, Axis};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::Rng;

use super::normalize;
use crate::{MlErr, Result};

/// A fixed capacity circular buffer of past key features, one unit vector per column.
#[derive(Debug, Clone)]
pub struct NegativeQueue {
    queue: Array2<f32>,
    ptr: usize,
}

impl NegativeQueue {
    /// Creates a new `NegativeQueue` filled with random unit vectors.
    ///
    /// # Arguments
    /// * `dim` - The feature dimension.
    /// * `capacity` - The amount of features kept.
    /// * `rng` - A random number generator.
    pub fn new_random<R: Rng + ?Sized>(dim: usize, capacity: usize, rng: &mut R) -> Self {
        let raw = Array2::<f32>::random_using((capacity, dim), StandardNormal, rng);
        let queue = normalize(raw.view()).reversed_axes();

        Self { queue, ptr: 0 }
    }

    /// Creates a `NegativeQueue` from its raw parts.
    ///
    /// # Arguments
    /// * `queue` - A `dim x capacity` matrix of unit columns.
    /// * `ptr` - The column the next enqueue starts writing at.
    ///
    /// # Returns
    /// An error if the queue has no columns or `ptr` is out of range.
    pub fn from_parts(queue: Array2<f32>, ptr: usize) -> Result<Self> {
        let capacity = queue.ncols();
        if capacity == 0 {
            return Err(MlErr::InvalidConfig("the negative queue can't be empty".into()));
        }

        if ptr >= capacity {
            return Err(MlErr::SizeMismatch {
                what: "queue pointer",
                got: ptr,
                expected: capacity,
            });
        }

        Ok(Self { queue, ptr })
    }

    /// Overwrites the oldest columns with `keys` and advances the pointer.
    ///
    /// # Arguments
    /// * `keys` - A `batch x dim` matrix of unit key features, one per row.
    ///
    /// # Returns
    /// A configuration error if the batch doesn't evenly divide the capacity or the
    /// features have the wrong dimension.
    pub fn enqueue(&mut self, keys: ArrayView2<f32>) -> Result<()> {
        let (batch, dim) = keys.dim();
        let capacity = self.capacity();

        if dim != self.dim() {
            return Err(MlErr::SizeMismatch {
                what: "enqueued feature dimension",
                got: dim,
                expected: self.dim(),
            });
        }

        if batch == 0 || capacity == 0 || capacity % batch != 0 {
            return Err(MlErr::QueueNotDivisible { capacity, batch });
        }

        for (i, key) in keys.axis_iter(Axis(0)).enumerate() {
            let col = (self.ptr + i) % capacity;
            self.queue.column_mut(col).assign(&key);
        }

        self.ptr = (self.ptr + batch) % capacity;
        trace!(ptr = self.ptr; "enqueued {batch} keys");
        Ok(())
    }

    /// Returns a read-only view of the queue, `dim x capacity`.
    pub fn snapshot(&self) -> ArrayView2<'_, f32> {
        self.queue.view()
    }

    pub fn ptr(&self) -> usize {
        self.ptr
    }

    pub fn capacity(&self) -> usize {
        self.queue.ncols()
    }

    pub fn dim(&self) -> usize {
        self.queue.nrows()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn fixed() -> NegativeQueue {
        // Columns: e0, e1, -e0, -e1.
        let queue = array![[1., 0., -1., 0.], [0., 1., 0., -1.]];
        NegativeQueue::from_parts(queue, 0).unwrap()
    }

    #[test]
    fn random_queue_has_unit_columns() {
        let queue = NegativeQueue::new_random(8, 16, &mut StdRng::seed_from_u64(0));
        assert_eq!(queue.snapshot().dim(), (8, 16));

        for col in queue.snapshot().columns() {
            assert!((col.dot(&col) - 1.).abs() < 1e-5);
        }
    }

    #[test]
    fn enqueue_overwrites_the_oldest_columns() {
        let mut queue = fixed();
        let s = 0.5f32.sqrt();
        let keys = array![[s, s], [s, -s]];

        queue.enqueue(keys.view()).unwrap();

        assert_eq!(queue.ptr(), 2);
        assert_eq!(queue.snapshot().column(0), keys.row(0));
        assert_eq!(queue.snapshot().column(1), keys.row(1));
        assert_eq!(queue.snapshot().column(2), array![-1., 0.]);
        assert_eq!(queue.snapshot().column(3), array![0., -1.]);
    }

    #[test]
    fn pointer_wraps_after_a_full_cycle() {
        let mut queue = fixed();
        let keys = array![[1., 0.], [0., 1.]];

        queue.enqueue(keys.view()).unwrap();
        queue.enqueue(keys.view()).unwrap();
        assert_eq!(queue.ptr(), 0);

        // The third batch evicts the first one.
        let newer = array![[0., 1.], [1., 0.]];
        queue.enqueue(newer.view()).unwrap();
        assert_eq!(queue.snapshot().column(0), newer.row(0));
        assert_eq!(queue.snapshot().column(2), keys.row(0));
    }

    #[test]
    fn batch_must_divide_capacity() {
        let mut queue = fixed();
        let keys = array![[1., 0.], [0., 1.], [1., 0.]];

        assert!(matches!(
            queue.enqueue(keys.view()),
            Err(MlErr::QueueNotDivisible {
                capacity: 4,
                batch: 3
            })
        ));
        assert_eq!(queue.ptr(), 0);
    }

    #[test]
    fn out_of_range_pointer_is_rejected() {
        assert!(NegativeQueue::from_parts(Array2::zeros((2, 4)), 4).is_err());
    }

    #[test]
    fn empty_queue_is_rejected() {
        assert!(NegativeQueue::from_parts(Array2::zeros((2, 0)), 0).is_err());

        let mut queue = NegativeQueue::new_random(2, 0, &mut StdRng::seed_from_u64(0));
        let keys = array![[1., 0.], [0., 1.]];
        assert!(matches!(
            queue.enqueue(keys.view()),
            Err(MlErr::QueueNotDivisible {
                capacity: 0,
                batch: 2
            })
        ));
    }
}
