use std::{collections::BTreeMap, path::Path};

use anyhow::Result;
use swarm_core::RoundStage;
use swarm_dht::StoreError;
use thiserror::Error;

use crate::{context::StageContext, DatasetGenerationError};

pub type TrainMetrics = BTreeMap<String, f64>;

/// How the stage runner reacts to a failed training step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried locally after freeing accelerator memory.
    Transient,
    /// Recoverable only by a follower that can restart the round from stage 0.
    DatasetGeneration,
    Fatal,
}

#[derive(Error, Debug)]
pub enum TrainStepError {
    #[error("store client error during training: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    DatasetGeneration(#[from] DatasetGenerationError),

    #[error("training step failed: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl TrainStepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrainStepError::Store(err) if err.is_transient() => ErrorKind::Transient,
            TrainStepError::Store(_) => ErrorKind::Fatal,
            TrainStepError::DatasetGeneration(_) => ErrorKind::DatasetGeneration,
            TrainStepError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// The external training step plus the model/tokenizer it trains.
///
/// One instance lives for the whole run; [`Trainer::train`] is called once per stage attempt.
#[async_trait::async_trait]
pub trait Trainer: Send {
    /// Trains on `ctx.datasets`. Implementations report every optimizer step through
    /// `ctx.reporter` so results reach the store on the swarm's cadence.
    async fn train(&mut self, ctx: &mut StageContext<'_>) -> Result<TrainMetrics, TrainStepError>;

    /// Persists model and tokenizer into `dir`. Re-saving overwrites.
    async fn save(&mut self, dir: &Path) -> Result<(), PersistError>;

    async fn push_to_hub(&mut self, token: &str, tags: &[String]) -> Result<()>;

    /// Drops accelerator caches. Called between retries and on cleanup.
    fn free_accelerator_memory(&mut self) {}
}

#[async_trait::async_trait]
pub trait ExperimentTracker: Send + Sync {
    async fn init(&self, project: &str, run_name: &str) -> Result<Box<dyn TrackerSession>>;
}

#[async_trait::async_trait]
pub trait TrackerSession: Send {
    async fn log_metrics(&mut self, round_stage: RoundStage, metrics: &TrainMetrics) -> Result<()>;
    async fn finish(self: Box<Self>) -> Result<()>;
}

#[derive(Error, Debug)]
pub enum RendezvousError {
    #[error("process group was torn down while waiting")]
    Cancelled,

    #[error("rendezvous thread crashed")]
    Crashed,
}

/// The local processes cooperating on one stage (e.g. one per accelerator).
#[async_trait::async_trait]
pub trait ProcessGroup: Send + Sync {
    /// Returns once every member of the group has reached this point.
    async fn wait_for_everyone(&self) -> Result<(), RendezvousError>;

    /// Releases the group. Pending and future waits fail with [`RendezvousError::Cancelled`].
    fn destroy(&self);
}
