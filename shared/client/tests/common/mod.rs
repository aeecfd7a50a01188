#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use swarm_client::{
    CorrectnessReward, DatasetGenerationError, ExperimentTracker, PersistError, ProcessGroup,
    RendezvousError, RoundRunner, Sample, StageContext, StageDatasets, StageDescriptor,
    StageError, StageSchedule, TrackerSession, TrainMetrics, TrainStepError, Trainer,
};
use swarm_core::RoundStage;
use swarm_dht::{get_value, keys::ROUND_STAGE_NUMBER_KEY, DistributedStore, StageOutputs, StoreError};

pub const LEASE: Duration = Duration::from_secs(4 * 60 * 60);

/// What a scripted training attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Succeed,
    Transient,
    DatasetGeneration,
    Fatal,
}

#[derive(Debug, Default)]
pub struct TrainerLog {
    pub attempts: Vec<RoundStage>,
    pub trained: Vec<RoundStage>,
    pub pointer_at_start: Vec<Option<RoundStage>>,
    pub freed: usize,
    pub saves: Vec<PathBuf>,
    pub pushes: Vec<Vec<String>>,
}

/// Trainer double that plays back a script of attempt outcomes, then succeeds forever.
pub struct ScriptedTrainer {
    store: Arc<dyn DistributedStore>,
    script: VecDeque<Attempt>,
    fail_push: bool,
    log: Arc<Mutex<TrainerLog>>,
}

impl ScriptedTrainer {
    pub fn new(store: Arc<dyn DistributedStore>) -> Self {
        Self {
            store,
            script: VecDeque::new(),
            fail_push: false,
            log: Default::default(),
        }
    }

    pub fn with_script(mut self, script: impl IntoIterator<Item = Attempt>) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<TrainerLog>> {
        self.log.clone()
    }
}

#[async_trait::async_trait]
impl Trainer for ScriptedTrainer {
    async fn train(&mut self, ctx: &mut StageContext<'_>) -> Result<TrainMetrics, TrainStepError> {
        let pointer: Option<RoundStage> =
            get_value(self.store.as_ref(), ROUND_STAGE_NUMBER_KEY, true).await?;
        {
            let mut log = self.log.lock().unwrap();
            log.attempts.push(ctx.round_stage);
            log.pointer_at_start.push(pointer);
        }

        match self.script.pop_front().unwrap_or(Attempt::Succeed) {
            Attempt::Succeed => {}
            Attempt::Transient => return Err(StoreError::UnexpectedEof.into()),
            Attempt::DatasetGeneration => {
                return Err(DatasetGenerationError::new("scripted dataset failure").into())
            }
            Attempt::Fatal => return Err(anyhow!("scripted fatal failure").into()),
        }

        let sample = &ctx.datasets.train[0];
        let outputs = StageOutputs {
            question: sample.question.clone(),
            answer: sample.answer.clone(),
            completions: vec![sample.answer.clone()],
        };
        ctx.reporter.on_step(0, outputs, &[1.0]).await?;
        self.log.lock().unwrap().trained.push(ctx.round_stage);
        Ok([("train_loss".to_string(), 0.25)].into())
    }

    async fn save(&mut self, dir: &Path) -> Result<(), PersistError> {
        self.log.lock().unwrap().saves.push(dir.to_path_buf());
        Ok(())
    }

    async fn push_to_hub(&mut self, _token: &str, tags: &[String]) -> Result<()> {
        self.log.lock().unwrap().pushes.push(tags.to_vec());
        if self.fail_push {
            return Err(anyhow!("hub unreachable"));
        }
        Ok(())
    }

    fn free_accelerator_memory(&mut self) {
        self.log.lock().unwrap().freed += 1;
    }
}

#[derive(Debug, Default)]
pub struct TrackerLog {
    pub sessions: usize,
    pub finished: usize,
    pub logged: Vec<RoundStage>,
}

#[derive(Default, Clone)]
pub struct RecordingTracker {
    pub log: Arc<Mutex<TrackerLog>>,
}

struct RecordingSession {
    log: Arc<Mutex<TrackerLog>>,
}

#[async_trait::async_trait]
impl ExperimentTracker for RecordingTracker {
    async fn init(&self, _project: &str, _run_name: &str) -> Result<Box<dyn TrackerSession>> {
        self.log.lock().unwrap().sessions += 1;
        Ok(Box::new(RecordingSession {
            log: self.log.clone(),
        }))
    }
}

#[async_trait::async_trait]
impl TrackerSession for RecordingSession {
    async fn log_metrics(&mut self, round_stage: RoundStage, _metrics: &TrainMetrics) -> Result<()> {
        self.log.lock().unwrap().logged.push(round_stage);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        self.log.lock().unwrap().finished += 1;
        Ok(())
    }
}

/// Wraps a runner and records every call made to it.
pub struct Recording<R> {
    pub inner: R,
    pub calls: Vec<(u32, u32, bool)>,
}

impl<R> Recording<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            calls: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl<R: RoundRunner> RoundRunner for Recording<R> {
    async fn run_all_stages(
        &mut self,
        round: u32,
        start_stage: u32,
        as_coordinator: bool,
    ) -> Result<(), StageError> {
        self.calls.push((round, start_stage, as_coordinator));
        self.inner
            .run_all_stages(round, start_stage, as_coordinator)
            .await
    }
}

/// Process group double counting rendezvous and teardown calls.
#[derive(Default)]
pub struct RecordingGroup {
    waits: AtomicUsize,
    destroyed: AtomicUsize,
}

impl RecordingGroup {
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProcessGroup for RecordingGroup {
    async fn wait_for_everyone(&self) -> Result<(), RendezvousError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn samples(round: u32, stage: u32, n: usize) -> StageDatasets {
    StageDatasets {
        train: (0..n)
            .map(|i| Sample {
                question: format!("r{round}s{stage} q{i}: what is {i} + {i}?"),
                answer: (i * 2).to_string(),
            })
            .collect(),
        eval: vec![],
    }
}

/// `num_stages` stages of `samples_per_stage` arithmetic questions each.
pub fn schedule(num_stages: u32, samples_per_stage: usize, max_rounds: u32) -> Arc<StageSchedule> {
    let stages = (0..num_stages)
        .map(|stage| {
            StageDescriptor::new(format!("stage{stage}"), move |round, stage| {
                Ok(samples(round, stage, samples_per_stage))
            })
            .with_reward_fn(Arc::new(CorrectnessReward))
        })
        .collect();
    Arc::new(StageSchedule::new(
        stages,
        max_rounds,
        Duration::from_secs(24 * 60 * 60),
    ))
}
