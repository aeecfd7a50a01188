use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use backon::{ConstantBuilder, RetryableWithContext};
use serde::Serialize;
use swarm_core::RoundStage;
use swarm_dht::{DistributedStore, ProgressPublisher, ResultPublisher, StoreError};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::{
    context::{StageContext, StepReporter},
    DatasetGenerationError, ErrorKind, ExperimentTracker, IntegrationTestLogMarker, PersistError,
    ProcessGroup, RendezvousError, SingleProcess, StageDatasets, StageDescriptor, StageSchedule,
    TrackerSession, TrainMetrics, TrainStepError, Trainer, WorkerNode,
};

pub const MAX_TRAIN_FAILS: u32 = 5;
pub const TRAIN_RETRY_DELAY: Duration = Duration::from_secs(5);
const TRAIN_RESULTS_FILE: &str = "train_results.json";

#[derive(Error, Debug)]
pub enum StageError {
    #[error("failed to publish {round_stage} pointer: {source}")]
    PublishProgress {
        round_stage: RoundStage,
        #[source]
        source: StoreError,
    },

    #[error("{round_stage}: {source}")]
    DatasetGeneration {
        round_stage: RoundStage,
        #[source]
        source: DatasetGenerationError,
    },

    #[error("training {round_stage} still failing after {attempts} attempts: {source}")]
    RetriesExhausted {
        round_stage: RoundStage,
        attempts: u32,
        #[source]
        source: TrainStepError,
    },

    #[error("training {round_stage} failed: {source}")]
    Train {
        round_stage: RoundStage,
        #[source]
        source: TrainStepError,
    },

    #[error("saving {round_stage} failed: {source}")]
    Persist {
        round_stage: RoundStage,
        #[source]
        source: PersistError,
    },

    #[error("rendezvous after {round_stage} failed: {source}")]
    Rendezvous {
        round_stage: RoundStage,
        #[source]
        source: RendezvousError,
    },
}

impl StageError {
    fn from_train_step(round_stage: RoundStage, err: TrainStepError) -> Self {
        match err {
            TrainStepError::DatasetGeneration(source) => {
                StageError::DatasetGeneration { round_stage, source }
            }
            source => StageError::Train {
                round_stage,
                source,
            },
        }
    }

    pub fn is_dataset_generation(&self) -> bool {
        matches!(self, StageError::DatasetGeneration { .. })
    }
}

/// Runs the stages of one round. The seam the round loops drive.
#[async_trait::async_trait]
pub trait RoundRunner: Send {
    /// Trains stages `start_stage..` of `round`. With `as_coordinator`, publishes the global
    /// pointer for each stage before training it.
    async fn run_all_stages(
        &mut self,
        round: u32,
        start_stage: u32,
        as_coordinator: bool,
    ) -> Result<(), StageError>;
}

#[derive(Debug, Clone)]
pub struct StageRunnerConfig {
    /// Stage outputs are saved under `{output_dir}-{worker key}`.
    pub output_dir: PathBuf,
    /// Push the final model of each round to the hub when set.
    pub hub_token: Option<String>,
    pub tracker_project: String,
    pub max_train_fails: u32,
    pub retry_delay: Duration,
}

impl StageRunnerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            hub_token: None,
            tracker_project: "rl-swarm".to_string(),
            max_train_fails: MAX_TRAIN_FAILS,
            retry_delay: TRAIN_RETRY_DELAY,
        }
    }
}

#[derive(Serialize)]
struct TrainResults<'a> {
    round: u32,
    stage: u32,
    metrics: &'a TrainMetrics,
}

pub struct StageRunner {
    node: WorkerNode,
    schedule: Arc<StageSchedule>,
    store: Arc<dyn DistributedStore>,
    results: ResultPublisher,
    progress: ProgressPublisher,
    trainer: Box<dyn Trainer>,
    tracker: Option<Arc<dyn ExperimentTracker>>,
    session: Option<Box<dyn TrackerSession>>,
    process_group: Arc<dyn ProcessGroup>,
    config: StageRunnerConfig,
}

impl StageRunner {
    pub fn new(
        node: WorkerNode,
        store: Arc<dyn DistributedStore>,
        schedule: Arc<StageSchedule>,
        trainer: Box<dyn Trainer>,
        config: StageRunnerConfig,
    ) -> Self {
        let lease = node.out_lease();
        Self {
            results: ResultPublisher::new(store.clone(), node.key().clone(), lease),
            progress: ProgressPublisher::new(store.clone(), lease),
            node,
            schedule,
            store,
            trainer,
            tracker: None,
            session: None,
            process_group: Arc::new(SingleProcess),
            config,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_process_group(mut self, process_group: Arc<dyn ProcessGroup>) -> Self {
        self.process_group = process_group;
        self
    }

    pub fn node(&self) -> &WorkerNode {
        &self.node
    }

    pub fn schedule(&self) -> &Arc<StageSchedule> {
        &self.schedule
    }

    pub fn store(&self) -> &Arc<dyn DistributedStore> {
        &self.store
    }

    pub fn progress(&self) -> &ProgressPublisher {
        &self.progress
    }

    pub fn process_group(&self) -> &Arc<dyn ProcessGroup> {
        &self.process_group
    }

    pub fn output_dir(&self) -> PathBuf {
        let mut dir = self.config.output_dir.clone().into_os_string();
        dir.push(format!("-{}", self.node.key()));
        PathBuf::from(dir)
    }

    async fn train_stages(
        &mut self,
        round: u32,
        start_stage: u32,
        as_coordinator: bool,
    ) -> Result<(), StageError> {
        self.open_tracker_session().await;

        let schedule = self.schedule.clone();
        let mut trained_any = false;
        for (stage, descriptor) in schedule
            .stages()
            .iter()
            .enumerate()
            .skip(start_stage as usize)
        {
            let round_stage = RoundStage::new(round, stage as u32);
            self.node.set_position(round_stage);

            if as_coordinator {
                self.progress
                    .publish_round_stage(round_stage)
                    .await
                    .map_err(|source| StageError::PublishProgress {
                        round_stage,
                        source,
                    })?;
            }

            info!(
                round,
                stage,
                stage_name = %descriptor.name,
                "Training round: {round} stage: {stage}"
            );
            let datasets = descriptor
                .datasets(round, round_stage.stage)
                .map_err(|source| StageError::DatasetGeneration {
                    round_stage,
                    source,
                })?;

            self.train_stage_and_save(round_stage, descriptor, &datasets)
                .instrument(info_span!("stage", round, stage))
                .await?;
            trained_any = true;

            info!(
                integration_test_log_marker = %IntegrationTestLogMarker::StageFinished,
                round,
                stage,
                "Finished training round: {round} stage: {stage}"
            );
        }

        if trained_any {
            self.push_to_hub().await;
        }
        Ok(())
    }

    async fn train_stage_and_save(
        &mut self,
        round_stage: RoundStage,
        descriptor: &StageDescriptor,
        datasets: &StageDatasets,
    ) -> Result<(), StageError> {
        let max_attempts = self.config.max_train_fails.max(1);
        let mut metrics = {
            let Self {
                node,
                trainer,
                results,
                progress,
                config,
                ..
            } = self;
            let ctx = StageContext {
                round_stage,
                descriptor,
                datasets,
                reporter: StepReporter::new(node, results, progress),
            };

            let backoff = ConstantBuilder::default()
                .with_delay(config.retry_delay)
                .with_max_times(max_attempts as usize - 1);
            let (attempt, result) = TrainAttempt::run
                .retry(backoff)
                .sleep(tokio::time::sleep)
                .context(TrainAttempt {
                    trainer: trainer.as_mut(),
                    ctx,
                    attempts: 0,
                })
                .when(|err: &TrainStepError| err.kind() == ErrorKind::Transient)
                .notify(|err: &TrainStepError, delay: Duration| {
                    warn!(
                        max_attempts,
                        error = %err,
                        "Store I/O error while training, restarting stage in {delay:?}"
                    );
                })
                .await;

            match result {
                Ok(metrics) => metrics,
                Err(err) if err.kind() == ErrorKind::Transient => {
                    return Err(StageError::RetriesExhausted {
                        round_stage,
                        attempts: attempt.attempts,
                        source: err,
                    })
                }
                Err(err) => return Err(StageError::from_train_step(round_stage, err)),
            }
        };

        metrics.insert("train_samples".to_string(), datasets.train.len() as f64);
        info!(?metrics, "Training metrics");
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.log_metrics(round_stage, &metrics).await {
                warn!(error = %err, "Failed to log metrics to experiment tracker");
            }
        }

        let output_dir = self.output_dir();
        save_train_results(&output_dir, round_stage, &metrics)
            .await
            .map_err(|source| StageError::Persist {
                round_stage,
                source,
            })?;

        info!("Saving model");
        self.trainer
            .save(&output_dir)
            .await
            .map_err(|source| StageError::Persist {
                round_stage,
                source,
            })?;
        info!(path = %output_dir.display(), "Model saved");

        // no member of a multi-process group may start the next stage while another is still writing
        self.process_group
            .wait_for_everyone()
            .await
            .map_err(|source| StageError::Rendezvous {
                round_stage,
                source,
            })?;
        Ok(())
    }

    async fn open_tracker_session(&mut self) {
        if self.session.is_some() {
            return;
        }
        let Some(tracker) = self.tracker.clone() else {
            return;
        };
        match tracker
            .init(&self.config.tracker_project, self.node.key().as_str())
            .await
        {
            Ok(session) => self.session = Some(session),
            Err(err) => warn!(error = %err, "Failed to start experiment tracking session"),
        }
    }

    async fn push_to_hub(&mut self) {
        let Some(token) = self.config.hub_token.clone() else {
            return;
        };
        info!("Pushing model to Hugging Face Hub...");
        let tags = vec![
            "rl-swarm".to_string(),
            "grpo".to_string(),
            format!("I am {}", self.node.key()),
        ];
        if let Err(err) = self.trainer.push_to_hub(&token, &tags).await {
            warn!(
                error = %err,
                "Failed to push model to the Hugging Face Hub. Once training concludes, push it manually"
            );
        }
    }

    /// Frees accelerator memory, drops this round's cached outputs and closes the tracking
    /// session.
    async fn cleanup(&mut self) {
        self.trainer.free_accelerator_memory();
        self.node.clear_stage_cache();
        if let Some(session) = self.session.take() {
            if let Err(err) = session.finish().await {
                warn!(error = %err, "Failed to finish experiment tracking session");
            }
        }
    }
}

#[async_trait::async_trait]
impl RoundRunner for StageRunner {
    async fn run_all_stages(
        &mut self,
        round: u32,
        start_stage: u32,
        as_coordinator: bool,
    ) -> Result<(), StageError> {
        let result = self.train_stages(round, start_stage, as_coordinator).await;
        self.cleanup().await;
        result
    }
}

/// One pass of the trainer over a stage. Every pass after the first starts from a clean slate.
struct TrainAttempt<'a> {
    trainer: &'a mut dyn Trainer,
    ctx: StageContext<'a>,
    attempts: u32,
}

impl<'a> TrainAttempt<'a> {
    async fn run(mut self) -> (Self, Result<TrainMetrics, TrainStepError>) {
        if self.attempts > 0 {
            self.trainer.free_accelerator_memory();
            self.ctx.reporter.node_mut().clear_stage_cache();
        }
        self.attempts += 1;
        let result = self.trainer.train(&mut self.ctx).await;
        (self, result)
    }
}

async fn save_train_results(
    dir: &Path,
    round_stage: RoundStage,
    metrics: &TrainMetrics,
) -> Result<(), PersistError> {
    let path = dir.join(TRAIN_RESULTS_FILE);
    let write_err = |source| PersistError::Write {
        path: path.display().to_string(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(write_err)?;
    let json = serde_json::to_vec_pretty(&TrainResults {
        round: round_stage.round,
        stage: round_stage.stage,
        metrics,
    })
    .map_err(|source| PersistError::Serialize {
        what: "train results",
        source,
    })?;
    tokio::fs::write(&path, json).await.map_err(write_err)
}
