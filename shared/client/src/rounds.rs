use std::time::Duration;

use swarm_dht::StoreError;
use thiserror::Error;

use crate::{StageError, StageSchedule};

mod coordinator;
mod follower;

pub use coordinator::RoundCoordinator;
pub use follower::{FollowerConfig, PollOutcome, RoundFollower};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    /// The last round of the schedule has been trained.
    Completed,
    /// `train_timeout` elapsed first.
    TimedOut,
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("store unreachable: {0}")]
    StoreUnreachable(#[source] StoreError),

    #[error(transparent)]
    Stage(#[from] StageError),
}

/// How far the round loops run, from the run schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundLimits {
    pub max_rounds: u32,
    pub train_timeout: Duration,
}

impl From<&StageSchedule> for RoundLimits {
    fn from(schedule: &StageSchedule) -> Self {
        Self {
            max_rounds: schedule.max_rounds,
            train_timeout: schedule.train_timeout,
        }
    }
}
