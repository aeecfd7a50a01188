//! The logical key space every worker agrees on.
//!
//! | key | writer | value |
//! |---|---|---|
//! | [`ROUND_STAGE_NUMBER_KEY`] | coordinator | `RoundStage` |
//! | [`outputs_key`], subkey = question hash | each worker | `StageOutputRecord` |
//! | [`rewards_key`], subkey = worker key | each worker | cumulative reward (`f64`) |
//! | [`leaderboard_key`] | coordinator | `Leaderboard` |

use swarm_core::{RoundStage, WorkerKey};

pub const ROUND_STAGE_NUMBER_KEY: &str = "rl_swarm_rs";

pub fn leaderboard_key(round_stage: RoundStage) -> String {
    format!("{}_{}_leaderboard", round_stage.round, round_stage.stage)
}

pub fn rewards_key(round_stage: RoundStage) -> String {
    format!("{}_{}_rewards", round_stage.round, round_stage.stage)
}

pub fn outputs_key(worker: &WorkerKey, round_stage: RoundStage) -> String {
    format!(
        "{}_{}_{}_outputs",
        worker, round_stage.round, round_stage.stage
    )
}
