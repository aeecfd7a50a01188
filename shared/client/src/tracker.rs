use anyhow::Result;
use swarm_core::RoundStage;
use tracing::info;

use crate::{ExperimentTracker, TrackerSession, TrainMetrics};

/// Experiment tracking that goes to the log instead of a hosted service.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracker;

struct LogSession {
    project: String,
    run_name: String,
    logged: usize,
}

#[async_trait::async_trait]
impl ExperimentTracker for LogTracker {
    async fn init(&self, project: &str, run_name: &str) -> Result<Box<dyn TrackerSession>> {
        info!(project, run_name, "Experiment tracking session started");
        Ok(Box::new(LogSession {
            project: project.to_string(),
            run_name: run_name.to_string(),
            logged: 0,
        }))
    }
}

#[async_trait::async_trait]
impl TrackerSession for LogSession {
    async fn log_metrics(&mut self, round_stage: RoundStage, metrics: &TrainMetrics) -> Result<()> {
        self.logged += 1;
        info!(
            project = %self.project,
            run_name = %self.run_name,
            round = round_stage.round,
            stage = round_stage.stage,
            ?metrics,
            "tracked metrics"
        );
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        info!(
            project = %self.project,
            run_name = %self.run_name,
            logged = self.logged,
            "Experiment tracking session finished"
        );
        Ok(())
    }
}
