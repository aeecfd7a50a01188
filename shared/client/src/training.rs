use tracing::{debug, error, info};

use crate::{
    FollowerConfig, IntegrationTestLogMarker, RoundCoordinator, RoundFollower, RoundLimits,
    StageRunner, TrainingError, TrainingOutcome,
};

/// Entry point for one worker: runs the coordinator or follower loop depending on the node's
/// role, then tears down the process group whatever happened.
pub struct TrainingCoordinator {
    runner: StageRunner,
    follower_config: FollowerConfig,
}

impl TrainingCoordinator {
    pub fn new(runner: StageRunner, follower_config: FollowerConfig) -> Self {
        Self {
            runner,
            follower_config,
        }
    }

    pub async fn train(self) -> Result<TrainingOutcome, TrainingError> {
        let process_group = self.runner.process_group().clone();
        let worker = self.runner.node().key().clone();

        let result = self.dispatch().await;
        match &result {
            Ok(outcome) => info!(worker = %worker, ?outcome, "Training finished"),
            Err(err) => {
                debug!(system = %system_info(), "System info");
                error!(
                    integration_test_log_marker = %IntegrationTestLogMarker::Error,
                    worker = %worker,
                    error = %err,
                    "Exception during training"
                );
            }
        }
        process_group.destroy();
        result
    }

    async fn dispatch(self) -> Result<TrainingOutcome, TrainingError> {
        let limits = RoundLimits::from(self.runner.schedule().as_ref());
        let store = self.runner.store().clone();
        if self.runner.node().is_coordinator() {
            let mut coordinator = RoundCoordinator::new(self.runner, store, limits);
            coordinator.run().await
        } else {
            let progress = self.runner.progress().clone();
            let mut follower =
                RoundFollower::new(self.runner, store, progress, limits, self.follower_config);
            follower.run().await
        }
    }
}

fn system_info() -> String {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    format!(
        "os={} arch={} cpus={cpus}",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
