use comms::{Collective, specs::moco::MocoSpec};
use log::debug;
use ndarray::{Array2, ArrayView2, Axis, concatenate, s};
use rand::Rng;

use super::{
    DualEncoder, NegativeQueue, cross_entropy, logits, normalize, normalize_backward, shuffle,
    unshuffle,
};
use crate::{
    MlErr, Result,
    arch::{Encoder, Sequential, build_encoder},
    initialization::init_params,
};

/// Everything needed to resume a `Moco` exactly where it was left.
#[derive(Debug, Clone, PartialEq)]
pub struct MocoState {
    pub query_params: Vec<f32>,
    pub key_params: Vec<f32>,
    /// The `dim x capacity` queue.
    pub queue: Array2<f32>,
    pub ptr: usize,
}

/// The contrastive learning engine of a single worker.
pub struct Moco<E: Encoder> {
    encoders: DualEncoder<E>,
    queue: NegativeQueue,
    momentum: f32,
    temperature: f32,
    symmetric: bool,
}

impl Moco<Sequential> {
    /// Builds the encoders and queue described by `spec` with freshly drawn parameters.
    ///
    /// # Arguments
    /// * `spec` - The contrastive hyperparameters.
    /// * `input_dim` - The width of an input sample.
    /// * `batch_size` - The per worker batch size.
    /// * `rng` - Used to draw the query parameters and the initial queue.
    pub fn from_spec<R: Rng>(
        spec: &MocoSpec,
        input_dim: usize,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let encoder = build_encoder(input_dim, &spec.encoder, spec.dim);
        let params = init_params(&encoder, rng)?;
        let encoders = DualEncoder::new(encoder, params)?;
        let queue = NegativeQueue::new_random(spec.dim, spec.queue_size, rng);

        Self::new(
            encoders,
            queue,
            spec.momentum,
            spec.temperature,
            spec.symmetric,
            batch_size,
        )
    }
}

impl<E: Encoder> Moco<E> {
    /// Creates a new `Moco`.
    ///
    /// # Arguments
    /// * `encoders` - The query and key encoders.
    /// * `queue` - The negatives, its dimension must match the encoders' output.
    /// * `momentum` - The key encoder momentum, in `[0, 1]`.
    /// * `temperature` - The softmax temperature, positive.
    /// * `symmetric` - Whether the loss is computed in both directions.
    /// * `batch_size` - The per worker batch size.
    ///
    /// # Returns
    /// A configuration error if the hyperparameters are out of range or the queue capacity
    /// is not a multiple of the keys enqueued per step.
    pub fn new(
        encoders: DualEncoder<E>,
        queue: NegativeQueue,
        momentum: f32,
        temperature: f32,
        symmetric: bool,
        batch_size: usize,
    ) -> Result<Self> {
        if !(0. ..=1.).contains(&momentum) {
            return Err(MlErr::InvalidConfig(format!(
                "momentum must be in [0, 1], got {momentum}"
            )));
        }

        if temperature <= 0. {
            return Err(MlErr::InvalidConfig(format!(
                "temperature must be positive, got {temperature}"
            )));
        }

        let output_dim = encoders.encoder().output_dim();
        if queue.dim() != output_dim {
            return Err(MlErr::SizeMismatch {
                what: "queue feature dimension",
                got: queue.dim(),
                expected: output_dim,
            });
        }

        let batch = if symmetric { 2 * batch_size } else { batch_size };
        let capacity = queue.capacity();
        if batch == 0 || capacity == 0 || capacity % batch != 0 {
            return Err(MlErr::QueueNotDivisible { capacity, batch });
        }

        Ok(Self {
            encoders,
            queue,
            momentum,
            temperature,
            symmetric,
        })
    }

    /// Computes the InfoNCE loss of `view_q` against `view_k` and the queue.
    ///
    /// The key path is shuffled across the group around the key encoder and never tracks a
    /// gradient. The loss is backpropagated into the query gradient before returning, adding
    /// to whatever the buffer already holds.
    ///
    /// # Arguments
    /// * `comm` - The worker group, every worker must call this in the same step.
    /// * `rng` - Used to draw the shuffle permutation.
    /// * `view_q` - The batch seen by the query encoder.
    /// * `view_k` - The batch seen by the key encoder.
    ///
    /// # Returns
    /// The mean loss, the unit query features and the unit key features.
    pub async fn contrastive_loss<C, R>(
        &mut self,
        comm: &mut C,
        rng: &mut R,
        view_q: ArrayView2<'_, f32>,
        view_k: ArrayView2<'_, f32>,
    ) -> Result<(f32, Array2<f32>, Array2<f32>)>
    where
        C: Collective,
        R: Rng + Send,
    {
        let raw_q = self.encoders.encode_query(view_q)?;
        let q = normalize(raw_q.view());

        let (shuffled, inverse) = shuffle(comm, rng, view_k).await?;
        let k = normalize(self.encoders.encode_key(shuffled.view())?.view());
        let k = unshuffle(comm, k.view(), &inverse).await?;

        let queue = self.queue.snapshot();
        let logits = logits(q.view(), k.view(), queue, self.temperature)?;
        let (loss, dlogits) = cross_entropy(logits.view());

        // Back through the similarities, the keys and the queue are constants.
        let dsim = dlogits / self.temperature;
        let dpos = dsim.slice(s![.., 0..1]);
        let dq = &k * &dpos + dsim.slice(s![.., 1..]).dot(&queue.t());

        let draw_q = normalize_backward(raw_q.view(), dq.view());
        self.encoders.backward_query(draw_q)?;

        Ok((loss, q, k))
    }

    /// Runs a full training step's forward: momentum update, loss and enqueue.
    ///
    /// The query gradient is cleared first and holds the gradient of the returned loss
    /// afterwards, ready to be averaged and applied.
    ///
    /// # Arguments
    /// * `comm` - The worker group.
    /// * `rng` - Used to draw the shuffle permutations.
    /// * `view_1` - The first augmented view of the batch.
    /// * `view_2` - The second augmented view of the same batch.
    ///
    /// # Returns
    /// The loss, summed over both directions in symmetric mode.
    pub async fn forward<C, R>(
        &mut self,
        comm: &mut C,
        rng: &mut R,
        view_1: ArrayView2<'_, f32>,
        view_2: ArrayView2<'_, f32>,
    ) -> Result<f32>
    where
        C: Collective,
        R: Rng + Send,
    {
        self.encoders.zero_grad();
        self.encoders.momentum_update(self.momentum);

        let (loss, keys) = if self.symmetric {
            let (loss_12, _, k_2) = self.contrastive_loss(comm, rng, view_1, view_2).await?;
            let (loss_21, _, k_1) = self.contrastive_loss(comm, rng, view_2, view_1).await?;
            let keys = concatenate(Axis(0), &[k_2.view(), k_1.view()])?;
            (loss_12 + loss_21, keys)
        } else {
            let (loss, _, k) = self.contrastive_loss(comm, rng, view_1, view_2).await?;
            (loss, k)
        };

        self.queue.enqueue(keys.view())?;
        debug!(loss = loss, ptr = self.queue.ptr(); "moco step");

        Ok(loss)
    }

    /// Embeds `x` with the query encoder into unit features, without a gradient.
    pub fn embed(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(normalize(self.encoders.embed(x)?.view()))
    }

    pub fn encoders(&self) -> &DualEncoder<E> {
        &self.encoders
    }

    pub fn encoders_mut(&mut self) -> &mut DualEncoder<E> {
        &mut self.encoders
    }

    pub fn queue(&self) -> &NegativeQueue {
        &self.queue
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn symmetric(&self) -> bool {
        self.symmetric
    }

    /// Snapshots the encoders and the queue.
    pub fn state(&self) -> MocoState {
        MocoState {
            query_params: self.encoders.query_params().to_vec(),
            key_params: self.encoders.key_params().to_vec(),
            queue: self.queue.snapshot().to_owned(),
            ptr: self.queue.ptr(),
        }
    }

    /// Restores a snapshot taken with `state`.
    ///
    /// # Returns
    /// An error if the snapshot doesn't match this engine's shapes, in which case nothing
    /// is modified.
    pub fn restore(&mut self, state: MocoState) -> Result<()> {
        let expected = self.queue.snapshot().dim();
        if state.queue.dim() != expected {
            return Err(MlErr::SizeMismatch {
                what: "restored queue capacity",
                got: state.queue.ncols(),
                expected: expected.1,
            });
        }

        let queue = NegativeQueue::from_parts(state.queue, state.ptr)?;
        self.encoders.restore(state.query_params, state.key_params)?;
        self.queue = queue;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use comms::LocalGroup;
    use ndarray::{ArrayView1, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::{activations::ActFn, layers::Layer},
        optimization::Sgd,
    };

    const INPUT: usize = 3;
    const DIM: usize = 2;

    fn engine(symmetric: bool, capacity: usize) -> Moco<Sequential> {
        let mut rng = StdRng::seed_from_u64(1);
        // Smooth hidden activation, finite differences never straddle a kink.
        let net = Sequential::new([
            Layer::dense((INPUT, 4), Some(ActFn::sigmoid(1.))),
            Layer::dense((4, DIM), None),
        ]);

        let params = init_params(&net, &mut rng).unwrap();
        let encoders = DualEncoder::new(net, params).unwrap();
        let queue = NegativeQueue::new_random(DIM, capacity, &mut rng);
        Moco::new(encoders, queue, 0.9, 0.2, symmetric, 2).unwrap()
    }

    fn close(a: ArrayView1<f32>, b: ArrayView1<f32>) -> bool {
        a.iter().zip(b).all(|(a, b)| (a - b).abs() < 1e-6)
    }

    fn views() -> (Array2<f32>, Array2<f32>) {
        (
            array![[0.5, -0.2, 1.0], [0.1, 0.9, -0.4]],
            array![[0.45, -0.1, 1.1], [0.2, 0.8, -0.5]],
        )
    }

    #[test]
    fn configuration_errors() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = Sequential::new([Layer::dense((INPUT, DIM), None)]);
        let dual = || DualEncoder::new(net.clone(), vec![0.; net.size()]).unwrap();
        let queue = |k| NegativeQueue::new_random(DIM, k, &mut StdRng::seed_from_u64(0));

        assert!(matches!(
            Moco::new(dual(), queue(6), 0.9, 0.1, false, 4),
            Err(MlErr::QueueNotDivisible { .. })
        ));
        // Symmetric steps enqueue twice the batch.
        assert!(Moco::new(dual(), queue(6), 0.9, 0.1, false, 2).is_ok());
        assert!(Moco::new(dual(), queue(6), 0.9, 0.1, true, 2).is_err());
        assert!(matches!(
            Moco::new(dual(), queue(0), 0.9, 0.1, false, 2),
            Err(MlErr::QueueNotDivisible { capacity: 0, .. })
        ));
        assert!(Moco::new(dual(), queue(8), 1.5, 0.1, false, 2).is_err());
        assert!(Moco::new(dual(), queue(8), 0.9, 0., false, 2).is_err());

        let wrong_dim = NegativeQueue::new_random(DIM + 1, 8, &mut rng);
        assert!(Moco::new(dual(), wrong_dim, 0.9, 0.1, false, 2).is_err());
    }

    #[tokio::test]
    async fn loss_uses_the_queue_before_the_step() {
        let mut moco = engine(false, 4);
        let mut comm = LocalGroup::new(1).remove(0);
        let mut rng = StdRng::seed_from_u64(2);
        let (v1, v2) = views();

        let before = moco.queue().snapshot().to_owned();
        let q = moco.embed(v1.view()).unwrap();
        let k = normalize(moco.encoders().encode_key(v2.view()).unwrap().view());
        let logits = logits(q.view(), k.view(), before.view(), 0.2).unwrap();
        let expected = cross_entropy(logits.view()).0;

        let loss = moco
            .forward(&mut comm, &mut rng, v1.view(), v2.view())
            .await
            .unwrap();

        assert!((loss - expected).abs() < 1e-5);
        assert_eq!(moco.queue().ptr(), 2);
        let queue = moco.queue().snapshot();
        assert!(close(queue.column(0), k.row(0)));
        assert!(close(queue.column(1), k.row(1)));
    }

    #[tokio::test]
    async fn features_have_unit_norm() {
        let mut moco = engine(false, 4);
        let mut comm = LocalGroup::new(1).remove(0);
        let mut rng = StdRng::seed_from_u64(3);
        let (v1, v2) = views();

        let (_, q, k) = moco
            .contrastive_loss(&mut comm, &mut rng, v1.view(), v2.view())
            .await
            .unwrap();

        for row in q.rows().into_iter().chain(k.rows()) {
            assert!((row.dot(&row) - 1.).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn query_gradient_matches_finite_differences() {
        let mut moco = engine(false, 4);
        let mut comm = LocalGroup::new(1).remove(0);
        let mut rng = StdRng::seed_from_u64(4);
        let (v1, v2) = views();

        moco.encoders_mut().zero_grad();
        moco.contrastive_loss(&mut comm, &mut rng, v1.view(), v2.view())
            .await
            .unwrap();

        let grad = moco.encoders().grad().to_vec();
        let net = moco.encoders().encoder().clone();
        let params = moco.encoders().query_params().to_vec();
        let k = normalize(moco.encoders().encode_key(v2.view()).unwrap().view());
        let queue = moco.queue().snapshot().to_owned();

        let loss_at = |params: &[f32]| {
            let q = normalize(net.infer(params, v1.view()).unwrap().view());
            let logits = logits(q.view(), k.view(), queue.view(), 0.2).unwrap();
            cross_entropy(logits.view()).0
        };

        let eps = 3e-3;
        for i in 0..params.len() {
            let mut plus = params.clone();
            let mut minus = params.clone();
            plus[i] += eps;
            minus[i] -= eps;

            let numeric = (loss_at(&plus) - loss_at(&minus)) / (2. * eps);
            assert!(
                (numeric - grad[i]).abs() < 5e-3 * numeric.abs().max(1.),
                "param {i}: {numeric} vs {}",
                grad[i]
            );
        }
    }

    #[tokio::test]
    async fn symmetric_steps_enqueue_both_directions() {
        let mut moco = engine(true, 8);
        let mut comm = LocalGroup::new(1).remove(0);
        let mut rng = StdRng::seed_from_u64(5);
        let (v1, v2) = views();

        let k_2 = normalize(moco.encoders().encode_key(v2.view()).unwrap().view());
        let k_1 = normalize(moco.encoders().encode_key(v1.view()).unwrap().view());

        moco.forward(&mut comm, &mut rng, v1.view(), v2.view())
            .await
            .unwrap();

        let queue = moco.queue().snapshot();
        assert_eq!(moco.queue().ptr(), 4);
        assert!(close(queue.column(0), k_2.row(0)));
        assert!(close(queue.column(1), k_2.row(1)));
        assert!(close(queue.column(2), k_1.row(0)));
        assert!(close(queue.column(3), k_1.row(1)));
    }

    #[tokio::test]
    async fn key_follows_query_after_steps() {
        let mut moco = engine(false, 4);
        let mut comm = LocalGroup::new(1).remove(0);
        let mut rng = StdRng::seed_from_u64(6);
        let mut sgd = Sgd::new(moco.encoders().query_params().len(), 0.5, 0., 0.);
        let (v1, v2) = views();

        moco.forward(&mut comm, &mut rng, v1.view(), v2.view())
            .await
            .unwrap();
        moco.encoders_mut().step(&mut sgd);
        let old_key = moco.encoders().key_params().to_vec();
        let query = moco.encoders().query_params().to_vec();
        assert_ne!(old_key, query);

        moco.forward(&mut comm, &mut rng, v1.view(), v2.view())
            .await
            .unwrap();

        for ((k, o), q) in moco.encoders().key_params().iter().zip(&old_key).zip(&query) {
            assert!((k - (0.9 * o + 0.1 * q)).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn state_round_trip() {
        let mut moco = engine(false, 4);
        let mut comm = LocalGroup::new(1).remove(0);
        let mut rng = StdRng::seed_from_u64(7);
        let (v1, v2) = views();

        moco.forward(&mut comm, &mut rng, v1.view(), v2.view())
            .await
            .unwrap();
        let state = moco.state();

        let mut fresh = engine(false, 4);
        fresh.restore(state.clone()).unwrap();
        assert_eq!(fresh.state(), state);

        let mut bad = state;
        bad.queue = Array2::zeros((DIM, 8));
        assert!(fresh.restore(bad).is_err());
    }
}
