use std::path::Path;

use comms::{Collective, all_reduce_mean, specs::training::TrainingSpec};
use log::{debug, info};
use machine_learning::{
    arch::{Encoder, Sequential},
    dataset::{DistributedSampler, JitterPairs, LabeledSet, PairDataset, SyntheticClusters},
    knn::{KnnAccuracy, KnnMonitor},
    moco::Moco,
    optimization::{LrSchedule, Optimizer, Sgd},
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Checkpoint, EpochRecord, ResultsLog, Result, WorkerErr,
    checkpoint::CHECKPOINT_FILE,
    config::local_batch_size,
};

/// A single worker's training loop, one replica of the data parallel group.
pub struct Trainer<C: Collective> {
    comm: C,
    moco: Moco<Sequential>,
    optimizer: Sgd,
    schedule: LrSchedule,
    monitor: KnnMonitor,

    pairs: JitterPairs,
    memory: LabeledSet,
    test: LabeledSet,
    sampler: DistributedSampler,
    rng: StdRng,

    batch_size: usize,
    epochs: usize,
    start_epoch: usize,
    results: Option<ResultsLog>,
}

impl<C: Collective> Trainer<C> {
    /// Builds this worker's replica of the run described by `spec`.
    ///
    /// Every worker derives the model, queue and dataset from the same seeds, then the
    /// query parameters are broadcast from rank 0 so the replicas are identical anyway.
    ///
    /// # Arguments
    /// * `comm` - This worker's handle into the group.
    /// * `spec` - The run configuration.
    ///
    /// # Returns
    /// A trainer ready to `run`, resumed from `spec.resume` if given.
    pub async fn new(mut comm: C, spec: &TrainingSpec) -> Result<Self> {
        let rank = comm.rank();
        let world_size = comm.world_size();
        let batch_size = local_batch_size(spec, world_size)?;

        let data = SyntheticClusters::generate(&spec.dataset)?;
        let pairs = data.train()?;
        let sampler = DistributedSampler::new(pairs.len(), rank, world_size, batch_size, spec.seed);
        if sampler.num_batches() == 0 {
            return Err(WorkerErr::Config(format!(
                "{} training samples can't fill a batch of {batch_size} per worker",
                pairs.len()
            )));
        }

        let mut init_rng = StdRng::seed_from_u64(spec.seed);
        let mut moco = Moco::from_spec(&spec.moco, pairs.input_dim(), batch_size, &mut init_rng)?;
        sync_replicas(&mut comm, &mut moco).await?;

        let size = moco.encoders().encoder().size();
        let opt = spec.optimizer;
        let optimizer = Sgd::new(size, opt.learning_rate, opt.momentum, opt.weight_decay);
        let schedule = LrSchedule::new(opt.learning_rate, spec.epochs, spec.schedule.clone());

        let results = match (&spec.results_dir, rank) {
            (Some(dir), 0) => Some(ResultsLog::create(dir, spec)?),
            _ => None,
        };

        info!(rank = rank, batch_size = batch_size, params = size; "worker ready");

        let mut trainer = Self {
            comm,
            moco,
            optimizer,
            schedule,
            monitor: KnnMonitor::new(spec.knn),
            pairs,
            memory: data.memory().clone(),
            test: data.test().clone(),
            sampler,
            rng: StdRng::seed_from_u64(spec.seed.wrapping_add(rank as u64 + 1)),
            batch_size,
            epochs: spec.epochs,
            start_epoch: 0,
            results,
        };

        if let Some(path) = &spec.resume {
            trainer.resume(path)?;
        }

        Ok(trainer)
    }

    /// Restores a checkpoint, training continues at the epoch after the saved one.
    pub fn resume<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let checkpoint = Checkpoint::load(&path)?;
        let epoch = checkpoint.epoch;
        let (state, velocity) = checkpoint.into_parts()?;

        self.moco.restore(state)?;
        if !self.optimizer.restore_velocity(velocity) {
            return Err(WorkerErr::Config(
                "the checkpoint's optimizer state doesn't fit the model".into(),
            ));
        }

        self.start_epoch = epoch + 1;
        info!(epoch = epoch; "resumed from {}", path.as_ref().display());
        Ok(())
    }

    /// Trains one epoch over this worker's shard.
    ///
    /// # Returns
    /// The mean loss of the epoch's steps.
    pub async fn train_epoch(&mut self, epoch: usize) -> Result<f32> {
        let rank = self.comm.rank();
        let lr = self.schedule.learning_rate(epoch);
        self.optimizer.set_learning_rate(lr);

        let batches = self.sampler.epoch_batches(epoch);
        let steps = batches.len();
        let mut total_loss = 0.;

        for (step, indices) in batches.iter().enumerate() {
            let (view_1, view_2) = self.pairs.pairs(indices, &mut self.rng);

            let loss = self
                .moco
                .forward(&mut self.comm, &mut self.rng, view_1.view(), view_2.view())
                .await?;

            let encoders = self.moco.encoders_mut();
            all_reduce_mean(&mut self.comm, encoders.grad_mut()).await?;
            encoders.step(&mut self.optimizer);

            total_loss += loss;
            debug!(rank = rank, epoch = epoch, step = step, loss = loss; "train step");
        }

        let mean = total_loss / steps.max(1) as f32;
        info!(rank = rank, epoch = epoch, lr = lr, loss = mean; "epoch trained");
        Ok(mean)
    }

    /// Evaluates the query encoder with the KNN monitor.
    pub fn test(&self) -> Result<KnnAccuracy> {
        let accuracy = self
            .monitor
            .evaluate(&self.moco, &self.memory, &self.test, self.batch_size)?;

        info!(top1 = accuracy.top1, top5 = accuracy.top5; "knn accuracy");
        Ok(accuracy)
    }

    /// Runs every remaining epoch, logging and checkpointing on rank 0.
    ///
    /// # Returns
    /// The record of every epoch run.
    pub async fn run(&mut self) -> Result<Vec<EpochRecord>> {
        let mut records = Vec::with_capacity(self.epochs.saturating_sub(self.start_epoch));

        for epoch in self.start_epoch..self.epochs {
            let train_loss = self.train_epoch(epoch).await?;
            let accuracy = self.test()?;

            let record = EpochRecord {
                epoch,
                train_loss,
                test_acc1: accuracy.top1,
            };

            if let Some(results) = &self.results {
                results.append(&record)?;

                let state = self.moco.state();
                let velocity = self.optimizer.velocity().to_vec();
                Checkpoint::new(epoch, state, velocity).save(results.dir().join(CHECKPOINT_FILE))?;
            }

            records.push(record);
        }

        Ok(records)
    }

    pub fn moco(&self) -> &Moco<Sequential> {
        &self.moco
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    /// Gives back the group handle once training is over.
    pub fn into_comm(self) -> C {
        self.comm
    }
}

/// Makes every replica start from rank 0's query parameters, with the key encoder a copy
/// of them.
async fn sync_replicas<C: Collective>(comm: &mut C, moco: &mut Moco<Sequential>) -> Result<()> {
    let query = moco.encoders().query_params().to_vec();
    let query = comm.broadcast(query, 0).await?;
    moco.encoders_mut().restore(query.clone(), query)?;
    Ok(())
}
