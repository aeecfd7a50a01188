use swarm_core::RoundStage;
use swarm_dht::{ProgressPublisher, ResultPublisher, StageOutputRecord, StageOutputs, StoreError};
use tracing::{debug, trace};

use crate::{IntegrationTestLogMarker, StageDatasets, StageDescriptor, WorkerNode};

/// Results go to the store every this many optimizer steps. Publishing on every step would
/// flood the store.
pub const CADENCE_OF_UPDATE_STEPS: u64 = 4;

/// Everything the training step may touch while one stage runs.
pub struct StageContext<'a> {
    pub round_stage: RoundStage,
    pub descriptor: &'a StageDescriptor,
    pub datasets: &'a StageDatasets,
    pub reporter: StepReporter<'a>,
}

/// Per-step hook called by the training step after each optimizer step.
pub struct StepReporter<'a> {
    node: &'a mut WorkerNode,
    results: &'a ResultPublisher,
    progress: &'a ProgressPublisher,
    round_stage: RoundStage,
    stage_rewards: f64,
}

impl<'a> StepReporter<'a> {
    pub fn new(
        node: &'a mut WorkerNode,
        results: &'a ResultPublisher,
        progress: &'a ProgressPublisher,
    ) -> Self {
        let round_stage = node.position();
        Self {
            node,
            results,
            progress,
            round_stage,
            stage_rewards: 0.0,
        }
    }

    pub fn node(&self) -> &WorkerNode {
        &*self.node
    }

    pub(crate) fn node_mut(&mut self) -> &mut WorkerNode {
        &mut *self.node
    }

    /// Cumulative reward this worker has reported for the current stage.
    pub fn stage_rewards(&self) -> f64 {
        self.stage_rewards
    }

    /// On cadence steps: stores the latest outputs in the question's slot, adds `rewards` to
    /// the stage total and stores it, and on the coordinator rebuilds the leaderboard.
    ///
    /// Returns whether anything was published.
    pub async fn on_step(
        &mut self,
        global_step: u64,
        outputs: StageOutputs,
        rewards: &[f64],
    ) -> Result<bool, StoreError> {
        if global_step % CADENCE_OF_UPDATE_STEPS != 0 {
            trace!(global_step, "Off-cadence step, not publishing");
            return Ok(false);
        }

        let record = StageOutputRecord::now(outputs);
        let q_hash = self.results.publish_outputs(self.round_stage, &record).await?;
        self.node.put_stage_outputs(self.round_stage, q_hash, record);

        self.stage_rewards += rewards.iter().sum::<f64>();
        self.results
            .publish_reward(self.round_stage, self.stage_rewards)
            .await?;

        if self.node.is_coordinator() {
            if let Some(leaderboard) = self.progress.publish_leaderboard(self.round_stage).await? {
                debug!(
                    integration_test_log_marker = %IntegrationTestLogMarker::LeaderboardPublished,
                    round = self.round_stage.round,
                    stage = self.round_stage.stage,
                    leader = leaderboard.leader().map(|e| e.worker.as_str()),
                    "Leaderboard updated"
                );
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use swarm_core::WorkerKey;
    use swarm_dht::{keys, DistributedStore, MemoryStore};

    const LEASE: Duration = Duration::from_secs(60);

    fn outputs(question: &str) -> StageOutputs {
        StageOutputs {
            question: question.to_string(),
            answer: "1".to_string(),
            completions: vec!["1".to_string()],
        }
    }

    struct Harness {
        store: MemoryStore,
        node: WorkerNode,
        results: ResultPublisher,
        progress: ProgressPublisher,
    }

    fn harness(node: WorkerNode) -> Harness {
        let store = MemoryStore::new();
        let shared: Arc<dyn DistributedStore> = Arc::new(store.clone());
        Harness {
            results: ResultPublisher::new(shared.clone(), node.key().clone(), LEASE),
            progress: ProgressPublisher::new(shared, LEASE),
            store,
            node,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_only_on_cadence() {
        let mut h = harness(WorkerNode::follower(WorkerKey::new("f").unwrap(), LEASE));
        h.node.set_position(RoundStage::new(0, 1));
        let mut reporter = StepReporter::new(&mut h.node, &h.results, &h.progress);

        let mut published = vec![];
        for step in 0..9 {
            published.push(reporter.on_step(step, outputs("q"), &[1.0, 0.5]).await.unwrap());
        }
        assert_eq!(
            published,
            vec![true, false, false, false, true, false, false, false, true]
        );
        assert_eq!(reporter.stage_rewards(), 4.5);

        let rewards = h.results.rewards(RoundStage::new(0, 1)).await.unwrap().unwrap();
        assert_eq!(rewards["f"], 4.5);
        assert_eq!(h.node.cached_outputs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn followers_never_write_the_leaderboard() {
        let mut h = harness(WorkerNode::follower(WorkerKey::new("f").unwrap(), LEASE));
        let mut reporter = StepReporter::new(&mut h.node, &h.results, &h.progress);
        reporter.on_step(0, outputs("q"), &[1.0]).await.unwrap();

        let rs = RoundStage::new(0, 0);
        assert!(h.store.writes_to(&keys::leaderboard_key(rs)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn coordinator_republishes_leaderboard_on_cadence() {
        let mut h = harness(WorkerNode::coordinator(WorkerKey::new("c").unwrap(), LEASE));
        let rs = RoundStage::new(0, 0);
        let other = ResultPublisher::new(
            Arc::new(h.store.clone()),
            WorkerKey::new("other").unwrap(),
            LEASE,
        );
        other.publish_reward(rs, 10.0).await.unwrap();

        let mut reporter = StepReporter::new(&mut h.node, &h.results, &h.progress);
        reporter.on_step(0, outputs("q1"), &[2.0]).await.unwrap();
        reporter.on_step(4, outputs("q2"), &[2.0]).await.unwrap();

        assert_eq!(h.store.writes_to(&keys::leaderboard_key(rs)).await.len(), 2);
        let board = h.progress.leaderboard(rs, true).await.unwrap().unwrap();
        let order: Vec<_> = board.entries().iter().map(|e| (e.worker.as_str(), e.reward)).collect();
        assert_eq!(order, vec![("other", 10.0), ("c", 4.0)]);
    }
}
