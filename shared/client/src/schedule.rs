use std::{fmt, sync::Arc, time::Duration};

use swarm_dht::StageOutputs;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("dataset generation failed: {message}")]
pub struct DatasetGenerationError {
    pub message: String,
}

impl DatasetGenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageDatasets {
    pub train: Vec<Sample>,
    pub eval: Vec<Sample>,
}

/// Scores a worker's outputs. Consumed by the training step; the coordination code never
/// calls it.
pub trait RewardFn: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, outputs: &StageOutputs) -> f64;
}

pub type DatasetsFn =
    dyn Fn(u32, u32) -> Result<StageDatasets, DatasetGenerationError> + Send + Sync;

#[derive(Clone)]
pub struct StageDescriptor {
    pub name: String,
    datasets_fn: Arc<DatasetsFn>,
    pub reward_fns: Vec<Arc<dyn RewardFn>>,
}

impl StageDescriptor {
    pub fn new<F>(name: impl Into<String>, datasets_fn: F) -> Self
    where
        F: Fn(u32, u32) -> Result<StageDatasets, DatasetGenerationError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            datasets_fn: Arc::new(datasets_fn),
            reward_fns: Vec::new(),
        }
    }

    pub fn with_reward_fn(mut self, reward_fn: Arc<dyn RewardFn>) -> Self {
        self.reward_fns.push(reward_fn);
        self
    }

    /// Builds this stage's datasets. Invoked lazily, right before the stage trains.
    pub fn datasets(&self, round: u32, stage: u32) -> Result<StageDatasets, DatasetGenerationError> {
        (self.datasets_fn)(round, stage)
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field(
                "reward_fns",
                &self.reward_fns.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// The ordered stages of a round plus the swarm-wide limits. Fixed for the run.
#[derive(Debug, Clone)]
pub struct StageSchedule {
    stages: Vec<StageDescriptor>,
    pub max_rounds: u32,
    pub train_timeout: Duration,
}

impl StageSchedule {
    pub fn new(stages: Vec<StageDescriptor>, max_rounds: u32, train_timeout: Duration) -> Self {
        Self {
            stages,
            max_rounds,
            train_timeout,
        }
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn num_stages(&self) -> u32 {
        self.stages.len() as u32
    }
}
