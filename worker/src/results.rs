use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use comms::specs::training::TrainingSpec;

use crate::Result;

const ARGS_FILE: &str = "args.json";
const LOG_FILE: &str = "log.csv";
const LOG_HEADER: &str = "epoch,train_loss,test_acc@1";

/// The outcome of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub test_acc1: f32,
}

/// A run's results directory: its configuration, a per epoch log and the checkpoint.
#[derive(Debug, Clone)]
pub struct ResultsLog {
    dir: PathBuf,
}

impl ResultsLog {
    /// Creates the directory and dumps the run's configuration into it.
    ///
    /// An existing log is kept so a resumed run appends to it.
    pub fn create<P: Into<PathBuf>>(dir: P, spec: &TrainingSpec) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(ARGS_FILE), serde_json::to_vec_pretty(spec)?)?;

        let log = dir.join(LOG_FILE);
        if !log.exists() {
            let mut file = File::create(log)?;
            writeln!(file, "{LOG_HEADER}")?;
        }

        Ok(Self { dir })
    }

    /// Appends one epoch to the log.
    pub fn append(&self, record: &EpochRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.dir.join(LOG_FILE))?;

        writeln!(
            file,
            "{},{},{}",
            record.epoch, record.train_loss, record.test_acc1
        )?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
