use std::sync::Arc;

use swarm_dht::DistributedStore;
use tokio::time::Instant;
use tracing::info;

use super::{RoundLimits, TrainingError, TrainingOutcome};
use crate::{IntegrationTestLogMarker, RoundRunner};

/// Drives rounds `0..max_rounds` in order, publishing the pointer as it goes.
pub struct RoundCoordinator<R> {
    runner: R,
    store: Arc<dyn DistributedStore>,
    limits: RoundLimits,
}

impl<R: RoundRunner> RoundCoordinator<R> {
    pub fn new(runner: R, store: Arc<dyn DistributedStore>, limits: RoundLimits) -> Self {
        Self {
            runner,
            store,
            limits,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    pub async fn run(&mut self) -> Result<TrainingOutcome, TrainingError> {
        let start = Instant::now();
        let mut round = 0;
        while round < self.limits.max_rounds {
            if start.elapsed() >= self.limits.train_timeout {
                info!("Training timed out!");
                return Ok(TrainingOutcome::TimedOut);
            }

            info!(
                integration_test_log_marker = %IntegrationTestLogMarker::RoundStart,
                round,
                "Starting new round: {round}"
            );
            // the coordinator cannot publish anything without a reachable store
            self.store
                .visible_peers(true)
                .await
                .map_err(TrainingError::StoreUnreachable)?;

            self.runner.run_all_stages(round, 0, true).await?;
            round += 1;
        }
        Ok(TrainingOutcome::Completed)
    }
}
