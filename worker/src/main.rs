use std::io;

use comms::{Collective, LocalGroup, specs::training::TrainingSpec, star};
use log::{info, warn};
use tokio::{signal, task::JoinSet};

use worker::{Trainer, WorkerConfig, WorkerErr};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = WorkerConfig::from_env()?;

    tokio::select! {
        ret = run(config) => {
            ret?;
            info!("wrapping up, disconnecting...");
        }
        _ = signal::ctrl_c() => {
            info!("received ctrl-c, stopping");
        }
    }

    Ok(())
}

async fn run(config: WorkerConfig) -> worker::Result<()> {
    let WorkerConfig {
        rank,
        world_size,
        hub,
        spec,
    } = config;

    match rank {
        Some(rank) => {
            let comm = star::connect(rank, world_size, &hub).await?;
            let trainer = train(comm, spec).await?;
            trainer.into_comm().disconnect().await?;
        }
        None => {
            info!(world_size = world_size; "running every worker in process");

            let mut join_set = JoinSet::new();
            for comm in LocalGroup::new(world_size) {
                let spec = spec.clone();
                join_set.spawn(async move { train(comm, spec).await.map(|_| ()) });
            }

            while let Some(ret) = join_set.join_next().await {
                ret.map_err(|e| WorkerErr::Io(io::Error::other(e)))??;
            }
        }
    }

    Ok(())
}

async fn train<C: Collective>(comm: C, spec: TrainingSpec) -> worker::Result<Trainer<C>> {
    let rank = comm.rank();
    let mut trainer = Trainer::new(comm, &spec).await?;

    let records = trainer.run().await?;
    match records.last() {
        Some(last) => info!(
            rank = rank,
            epoch = last.epoch,
            loss = last.train_loss,
            acc1 = last.test_acc1;
            "training finished"
        ),
        None => warn!(rank = rank; "nothing to train, the run was already complete"),
    }

    Ok(trainer)
}
