use std::{env, fs, path::Path};

use comms::specs::training::TrainingSpec;

use crate::{Result, WorkerErr};

const DEFAULT_HUB: &str = "127.0.0.1:7777";

/// Where this process sits in the group and what it trains.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// The rank of this process, or `None` to run the whole group in process.
    pub rank: Option<usize>,
    pub world_size: usize,
    /// The address rank 0 listens at.
    pub hub: String,
    pub spec: TrainingSpec,
}

impl WorkerConfig {
    /// Reads the configuration from the environment.
    ///
    /// `CONFIG` points to the JSON training spec, `WORLD_SIZE` defaults to one, `RANK` is
    /// optional and `HUB` defaults to a local address.
    pub fn from_env() -> Result<Self> {
        let path = env::var("CONFIG").map_err(|_| WorkerErr::Config("CONFIG is not set".into()))?;

        let world_size = match env::var("WORLD_SIZE") {
            Ok(v) => parse_var("WORLD_SIZE", &v)?,
            Err(_) => 1,
        };

        let rank = env::var("RANK")
            .ok()
            .map(|v| parse_var("RANK", &v))
            .transpose()?;

        let hub = env::var("HUB").unwrap_or_else(|_| DEFAULT_HUB.to_string());

        Self::new(rank, world_size, hub, load_spec(path)?)
    }

    /// Creates a new `WorkerConfig`, validating it.
    ///
    /// # Returns
    /// An error if the rank is out of range or the global batch can't be split evenly.
    pub fn new(
        rank: Option<usize>,
        world_size: usize,
        hub: String,
        spec: TrainingSpec,
    ) -> Result<Self> {
        if world_size == 0 {
            return Err(WorkerErr::Config("WORLD_SIZE must be positive".into()));
        }

        if let Some(rank) = rank.filter(|&rank| rank >= world_size) {
            return Err(WorkerErr::Config(format!(
                "RANK {rank} is out of range for {world_size} workers"
            )));
        }

        local_batch_size(&spec, world_size)?;

        Ok(Self {
            rank,
            world_size,
            hub,
            spec,
        })
    }
}

/// Splits the global batch between the workers.
///
/// # Returns
/// The per worker batch size or a configuration error if it doesn't divide evenly.
pub fn local_batch_size(spec: &TrainingSpec, world_size: usize) -> Result<usize> {
    let global = spec.batch_size;
    if world_size == 0 || global == 0 || global % world_size != 0 {
        return Err(WorkerErr::Config(format!(
            "the global batch of {global} can't be split between {world_size} workers"
        )));
    }

    Ok(global / world_size)
}

/// Loads a JSON training spec.
pub fn load_spec<P: AsRef<Path>>(path: P) -> Result<TrainingSpec> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn parse_var(name: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|e| WorkerErr::Config(format!("{name}={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(batch_size: usize) -> TrainingSpec {
        serde_json::from_str(&format!(
            r#"{{
                "epochs": 1,
                "batch_size": {batch_size},
                "seed": 0,
                "moco": {{ "dim": 4, "queue_size": 8, "encoder": {{ "hidden": [4] }} }},
                "optimizer": {{ "learning_rate": 0.1 }},
                "dataset": {{ "synthetic_clusters": {{
                    "classes": 2, "input_dim": 2, "train_per_class": 4,
                    "test_per_class": 1, "spread": 0.1, "jitter": 0.01, "seed": 0
                }} }}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn batch_is_split_between_workers() {
        assert_eq!(local_batch_size(&spec(8), 4).unwrap(), 2);
        assert!(local_batch_size(&spec(6), 4).is_err());
    }

    #[test]
    fn invalid_groups_are_rejected() {
        assert!(WorkerConfig::new(Some(2), 2, DEFAULT_HUB.into(), spec(4)).is_err());
        assert!(WorkerConfig::new(None, 0, DEFAULT_HUB.into(), spec(4)).is_err());
        assert!(WorkerConfig::new(Some(1), 2, DEFAULT_HUB.into(), spec(4)).is_ok());
    }
}
