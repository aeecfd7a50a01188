use std::{collections::HashSet, sync::Arc, time::Duration};

use swarm_core::RoundStage;
use swarm_dht::{DistributedStore, ProgressError, ProgressPublisher};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::{RoundLimits, TrainingError, TrainingOutcome};
use crate::{IntegrationTestLogMarker, RoundRunner, StageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerConfig {
    /// Wait after a failed pointer read, and the starting backoff.
    pub check_interval: Duration,
    /// Minimum gap between two "could not fetch" log lines.
    pub log_timeout: Duration,
    /// The backoff never grows past this.
    pub max_check_interval: Duration,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            log_timeout: Duration::from_secs(10),
            max_check_interval: Duration::from_secs(300),
        }
    }
}

/// What one pass of the follower loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The pointer could not be read.
    Unavailable,
    /// Replayed the observed round from the observed stage.
    Joined(RoundStage),
    /// The observed round was already trained; backed off.
    AlreadyDone(RoundStage),
}

/// Polls the coordinator's pointer and replays each round once, starting at the stage it
/// observes.
pub struct RoundFollower<R> {
    runner: R,
    store: Arc<dyn DistributedStore>,
    progress: ProgressPublisher,
    limits: RoundLimits,
    config: FollowerConfig,
    done_rounds: HashSet<u32>,
    check_backoff: Duration,
    fetch_log_time: Instant,
}

impl<R: RoundRunner> RoundFollower<R> {
    pub fn new(
        runner: R,
        store: Arc<dyn DistributedStore>,
        progress: ProgressPublisher,
        limits: RoundLimits,
        config: FollowerConfig,
    ) -> Self {
        Self {
            runner,
            store,
            progress,
            limits,
            check_backoff: config.check_interval,
            config,
            done_rounds: HashSet::new(),
            fetch_log_time: Instant::now(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    pub fn done_rounds(&self) -> &HashSet<u32> {
        &self.done_rounds
    }

    pub fn check_backoff(&self) -> Duration {
        self.check_backoff
    }

    pub async fn run(&mut self) -> Result<TrainingOutcome, TrainingError> {
        let start = Instant::now();
        self.fetch_log_time = start;
        while start.elapsed() < self.limits.train_timeout {
            let observed = match self.poll_once().await? {
                PollOutcome::Joined(rs) | PollOutcome::AlreadyDone(rs) => rs,
                PollOutcome::Unavailable => continue,
            };
            if observed.round.saturating_add(1) >= self.limits.max_rounds {
                return Ok(TrainingOutcome::Completed);
            }
        }
        info!("Training timed out!");
        Ok(TrainingOutcome::TimedOut)
    }

    pub async fn poll_once(&mut self) -> Result<PollOutcome, TrainingError> {
        let observed = match Self::observe(self.store.as_ref(), &self.progress).await {
            Ok(observed) => observed,
            Err(err) => {
                let now = Instant::now();
                if now.duration_since(self.fetch_log_time) > self.config.log_timeout {
                    debug!(
                        error = %err,
                        "Could not fetch round and stage: {err}. Next check in {:?}.",
                        self.config.check_interval
                    );
                    self.fetch_log_time = now;
                }
                sleep(self.config.check_interval).await;
                return Ok(PollOutcome::Unavailable);
            }
        };

        if self.done_rounds.contains(&observed.round) {
            info!(
                round = observed.round,
                "Already finished round: {}. Next check in {:?}.",
                observed.round,
                self.check_backoff
            );
            sleep(self.check_backoff).await;
            self.check_backoff = self
                .check_backoff
                .saturating_mul(2)
                .min(self.config.max_check_interval);
            return Ok(PollOutcome::AlreadyDone(observed));
        }

        info!(
            integration_test_log_marker = %IntegrationTestLogMarker::RoundJoined,
            round = observed.round,
            stage = observed.stage,
            "Joining round: {} starting at stage: {}",
            observed.round,
            observed.stage
        );
        self.replay(observed).await?;
        self.done_rounds.insert(observed.round);
        self.check_backoff = self.config.check_interval;
        Ok(PollOutcome::Joined(observed))
    }

    async fn observe(
        store: &dyn DistributedStore,
        progress: &ProgressPublisher,
    ) -> Result<RoundStage, ProgressError> {
        store.visible_peers(true).await?;
        progress.current_round_stage().await
    }

    async fn replay(&mut self, observed: RoundStage) -> Result<(), StageError> {
        match self
            .runner
            .run_all_stages(observed.round, observed.stage, false)
            .await
        {
            // the observed stage may depend on outputs from stages this worker never ran
            Err(err) if err.is_dataset_generation() && observed.stage > 0 => {
                info!(error = %err, "Re-attempting training starting at stage 0!");
                self.runner.run_all_stages(observed.round, 0, false).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatasetGenerationError;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use swarm_dht::MemoryStore;

    const LEASE: Duration = Duration::from_secs(3600);

    #[derive(Default)]
    struct ScriptedRunner {
        calls: Vec<(u32, u32, bool)>,
        failures: VecDeque<bool>,
    }

    #[async_trait::async_trait]
    impl RoundRunner for ScriptedRunner {
        async fn run_all_stages(
            &mut self,
            round: u32,
            start_stage: u32,
            as_coordinator: bool,
        ) -> Result<(), StageError> {
            self.calls.push((round, start_stage, as_coordinator));
            if self.failures.pop_front().unwrap_or(false) {
                return Err(StageError::DatasetGeneration {
                    round_stage: RoundStage::new(round, start_stage),
                    source: DatasetGenerationError::new("needs earlier stage outputs"),
                });
            }
            Ok(())
        }
    }

    struct Harness {
        store: MemoryStore,
        progress: ProgressPublisher,
        follower: RoundFollower<ScriptedRunner>,
    }

    fn harness(runner: ScriptedRunner, max_rounds: u32) -> Harness {
        let store = MemoryStore::new();
        let shared: Arc<dyn DistributedStore> = Arc::new(store.clone());
        let progress = ProgressPublisher::new(shared.clone(), LEASE);
        let limits = RoundLimits {
            max_rounds,
            train_timeout: Duration::from_secs(3600),
        };
        Harness {
            follower: RoundFollower::new(
                runner,
                shared,
                progress.clone(),
                limits,
                FollowerConfig::default(),
            ),
            store,
            progress,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pointer_waits_check_interval() {
        let mut h = harness(ScriptedRunner::default(), 3);
        let before = Instant::now();
        assert_eq!(h.follower.poll_once().await.unwrap(), PollOutcome::Unavailable);
        assert_eq!(before.elapsed(), Duration::from_secs(5));
        assert!(h.follower.runner().calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn peer_listing_failure_is_not_fatal() {
        let mut h = harness(ScriptedRunner::default(), 3);
        h.progress.publish_round_stage(RoundStage::new(0, 0)).await.unwrap();
        h.store.fail_next_reads(1).await;
        assert_eq!(h.follower.poll_once().await.unwrap(), PollOutcome::Unavailable);
        assert_eq!(
            h.follower.poll_once().await.unwrap(),
            PollOutcome::Joined(RoundStage::new(0, 0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_read_failures_log_at_most_once_per_log_timeout() {
        let mut h = harness(ScriptedRunner::default(), 3);
        h.store.fail_next_reads(100).await;
        let start = Instant::now();

        let mut logged_at = vec![];
        for _ in 0..7 {
            assert_eq!(h.follower.poll_once().await.unwrap(), PollOutcome::Unavailable);
            logged_at.push(h.follower.fetch_log_time.duration_since(start).as_secs());
        }
        // polls land every 5s; a line is emitted only once more than 10s have passed
        assert_eq!(logged_at, vec![0, 0, 0, 15, 15, 15, 30]);
        assert_eq!(start.elapsed(), Duration::from_secs(35));
        assert!(h.follower.runner().calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn joins_at_observed_stage_and_trains_each_round_once() {
        let mut h = harness(ScriptedRunner::default(), 3);
        h.progress.publish_round_stage(RoundStage::new(1, 2)).await.unwrap();

        assert_eq!(
            h.follower.poll_once().await.unwrap(),
            PollOutcome::Joined(RoundStage::new(1, 2))
        );
        h.progress.publish_round_stage(RoundStage::new(1, 3)).await.unwrap();
        assert_eq!(
            h.follower.poll_once().await.unwrap(),
            PollOutcome::AlreadyDone(RoundStage::new(1, 3))
        );
        assert_eq!(h.follower.runner().calls, vec![(1, 2, false)]);
        assert!(h.follower.done_rounds().contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_up_to_the_cap_and_resets_on_a_new_round() {
        let mut h = harness(ScriptedRunner::default(), 10);
        h.progress.publish_round_stage(RoundStage::new(0, 0)).await.unwrap();
        h.follower.poll_once().await.unwrap();
        assert_eq!(h.follower.check_backoff(), Duration::from_secs(5));

        let mut seen = vec![];
        for _ in 0..8 {
            let before = Instant::now();
            h.follower.poll_once().await.unwrap();
            seen.push(before.elapsed().as_secs());
        }
        assert_eq!(seen, vec![5, 10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(h.follower.check_backoff(), Duration::from_secs(300));

        h.progress.publish_round_stage(RoundStage::new(1, 0)).await.unwrap();
        h.follower.poll_once().await.unwrap();
        assert_eq!(h.follower.check_backoff(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn dataset_failure_mid_round_retries_from_stage_zero() {
        let runner = ScriptedRunner {
            failures: [true, false].into(),
            ..Default::default()
        };
        let mut h = harness(runner, 3);
        h.progress.publish_round_stage(RoundStage::new(2, 3)).await.unwrap();

        assert_eq!(
            h.follower.poll_once().await.unwrap(),
            PollOutcome::Joined(RoundStage::new(2, 3))
        );
        assert_eq!(h.follower.runner().calls, vec![(2, 3, false), (2, 0, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn dataset_failure_at_stage_zero_is_fatal() {
        let runner = ScriptedRunner {
            failures: [true].into(),
            ..Default::default()
        };
        let mut h = harness(runner, 3);
        h.progress.publish_round_stage(RoundStage::new(1, 0)).await.unwrap();

        let err = h.follower.poll_once().await.unwrap_err();
        assert!(matches!(err, TrainingError::Stage(ref e) if e.is_dataset_generation()));
        assert_eq!(h.follower.runner().calls, vec![(1, 0, false)]);
        assert!(h.follower.done_rounds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_failure_after_fallback_propagates() {
        let runner = ScriptedRunner {
            failures: [true, true].into(),
            ..Default::default()
        };
        let mut h = harness(runner, 3);
        h.progress.publish_round_stage(RoundStage::new(0, 1)).await.unwrap();
        assert!(h.follower.poll_once().await.is_err());
        assert_eq!(h.follower.runner().calls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_the_last_round() {
        let mut h = harness(ScriptedRunner::default(), 2);
        h.progress.publish_round_stage(RoundStage::new(1, 0)).await.unwrap();
        assert_eq!(h.follower.run().await.unwrap(), TrainingOutcome::Completed);
        assert_eq!(h.follower.runner().calls, vec![(1, 0, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_a_pointer() {
        let mut h = harness(ScriptedRunner::default(), 2);
        assert_eq!(h.follower.run().await.unwrap(), TrainingOutcome::TimedOut);
    }
}
