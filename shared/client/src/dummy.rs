use std::{path::Path, time::Duration};

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use swarm_dht::StageOutputs;
use tracing::{debug, info};

use crate::{
    context::StageContext, PersistError, RewardFn, TrainMetrics, TrainStepError, Trainer,
};

const DUMMY_MODEL_FILE: &str = "dummy_model.json";
const NUM_GENERATIONS: usize = 2;

/// 1.0 for every completion that matches the expected answer, averaged.
pub struct CorrectnessReward;

impl RewardFn for CorrectnessReward {
    fn name(&self) -> &str {
        "correctness"
    }

    fn score(&self, outputs: &StageOutputs) -> f64 {
        if outputs.completions.is_empty() {
            return 0.0;
        }
        let correct = outputs
            .completions
            .iter()
            .filter(|c| c.trim() == outputs.answer.trim())
            .count();
        correct as f64 / outputs.completions.len() as f64
    }
}

#[derive(Serialize)]
struct DummyCheckpoint {
    total_steps: u64,
    stages_trained: u64,
}

/// Stands in for a real model. Answers each training sample with a few guesses, some right,
/// and reports through the step hook like a real trainer would.
pub struct DummyTrainer {
    rng: StdRng,
    step_delay: Duration,
    total_steps: u64,
    stages_trained: u64,
}

impl DummyTrainer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            step_delay: Duration::ZERO,
            total_steps: 0,
            stages_trained: 0,
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    fn complete(&mut self, answer: &str) -> String {
        if self.rng.gen_bool(0.6) {
            answer.to_string()
        } else {
            self.rng.gen_range(0..100).to_string()
        }
    }
}

#[async_trait::async_trait]
impl Trainer for DummyTrainer {
    async fn train(&mut self, ctx: &mut StageContext<'_>) -> Result<TrainMetrics, TrainStepError> {
        let mut reward_sum = 0.0;
        let mut steps = 0u64;
        for (global_step, sample) in ctx.datasets.train.iter().enumerate() {
            let completions = (0..NUM_GENERATIONS)
                .map(|_| self.complete(&sample.answer))
                .collect();
            let outputs = StageOutputs {
                question: sample.question.clone(),
                answer: sample.answer.clone(),
                completions,
            };
            let rewards: Vec<f64> = ctx
                .descriptor
                .reward_fns
                .iter()
                .map(|reward_fn| reward_fn.score(&outputs))
                .collect();
            reward_sum += rewards.iter().sum::<f64>();

            ctx.reporter
                .on_step(global_step as u64, outputs, &rewards)
                .await?;
            steps += 1;
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
        }
        self.total_steps += steps;
        self.stages_trained += 1;
        debug!(steps, reward_sum, "Dummy training finished");

        let mut metrics = TrainMetrics::new();
        metrics.insert("train_steps".to_string(), steps as f64);
        metrics.insert(
            "reward".to_string(),
            if steps == 0 { 0.0 } else { reward_sum / steps as f64 },
        );
        metrics.insert("train_loss".to_string(), self.rng.gen_range(0.0..1.0));
        Ok(metrics)
    }

    async fn save(&mut self, dir: &Path) -> Result<(), PersistError> {
        let path = dir.join(DUMMY_MODEL_FILE);
        let json = serde_json::to_vec(&DummyCheckpoint {
            total_steps: self.total_steps,
            stages_trained: self.stages_trained,
        })
        .map_err(|source| PersistError::Serialize {
            what: "dummy checkpoint",
            source,
        })?;
        let write_err = |source| PersistError::Write {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(dir).await.map_err(write_err)?;
        tokio::fs::write(&path, json).await.map_err(write_err)
    }

    async fn push_to_hub(&mut self, _token: &str, tags: &[String]) -> Result<()> {
        info!(?tags, "Dummy model has nothing to push");
        Ok(())
    }
}
