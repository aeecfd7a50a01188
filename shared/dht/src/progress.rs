use std::{collections::BTreeMap, sync::Arc, time::Duration};

use swarm_core::RoundStage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    get_dictionary, get_value,
    keys::{leaderboard_key, rewards_key, ROUND_STAGE_NUMBER_KEY},
    store_value, DistributedStore, Leaderboard, StoreError,
};

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("no round/stage pointer in the store (not published yet, or its lease ran out)")]
    Missing,

    #[error("failed to read round/stage pointer: {0}")]
    Store(#[from] StoreError),
}

/// Coordinator-owned writes: the global (round, stage) pointer and the per-stage leaderboard.
/// Reads are open to everyone.
#[derive(Clone)]
pub struct ProgressPublisher {
    store: Arc<dyn DistributedStore>,
    lease: Duration,
}

impl ProgressPublisher {
    pub fn new(store: Arc<dyn DistributedStore>, lease: Duration) -> Self {
        Self { store, lease }
    }

    pub async fn publish_round_stage(&self, round_stage: RoundStage) -> Result<(), StoreError> {
        store_value(
            self.store.as_ref(),
            ROUND_STAGE_NUMBER_KEY,
            None,
            &round_stage,
            self.lease,
        )
        .await?;
        debug!(
            round = round_stage.round,
            stage = round_stage.stage,
            "Published round/stage pointer"
        );
        Ok(())
    }

    pub async fn current_round_stage(&self) -> Result<RoundStage, ProgressError> {
        get_value(self.store.as_ref(), ROUND_STAGE_NUMBER_KEY, true)
            .await?
            .ok_or(ProgressError::Missing)
    }

    /// Rebuilds the leaderboard from the latest rewards snapshot and stores it.
    ///
    /// Returns `Ok(None)` without writing anything when no rewards are visible yet.
    pub async fn publish_leaderboard(
        &self,
        round_stage: RoundStage,
    ) -> Result<Option<Leaderboard>, StoreError> {
        let rewards: Option<BTreeMap<String, f64>> =
            get_dictionary(self.store.as_ref(), &rewards_key(round_stage), true).await?;
        let Some(rewards) = rewards.filter(|r| !r.is_empty()) else {
            info!(
                round = round_stage.round,
                stage = round_stage.stage,
                "Can't retrieve rewards, skipping leaderboard publish"
            );
            return Ok(None);
        };

        let leaderboard = Leaderboard::from(&rewards);
        store_value(
            self.store.as_ref(),
            &leaderboard_key(round_stage),
            None,
            &leaderboard,
            self.lease,
        )
        .await?;
        debug!(
            round = round_stage.round,
            stage = round_stage.stage,
            entries = leaderboard.len(),
            "Published leaderboard"
        );
        Ok(Some(leaderboard))
    }

    pub async fn leaderboard(
        &self,
        round_stage: RoundStage,
        latest: bool,
    ) -> Result<Option<Leaderboard>, StoreError> {
        get_value(self.store.as_ref(), &leaderboard_key(round_stage), latest).await
    }
}
