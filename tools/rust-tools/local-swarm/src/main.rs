use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future::try_join_all;
use serde::Deserialize;
use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use swarm_client::{
    read_worker_key, CorrectnessReward, DatasetGenerationError, DummyTrainer, FollowerConfig,
    LogTracker, Sample, StageDatasets, StageDescriptor, StageRunner, StageRunnerConfig,
    StageSchedule, SwarmArgs, TrainingCoordinator, TrainingOutcome, WorkerNode,
};
use swarm_core::{RoundStage, WorkerKey};
use swarm_dht::{DistributedStore, MemoryStore, ProgressPublisher};
use swarm_logging::LogOutput;
use time::OffsetDateTime;
use tokio::runtime::Builder;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of followers training next to the coordinator
    #[clap(long, value_parser = validate_num_followers)]
    num_followers: usize,

    /// Run file with the round limits and the stages
    #[clap(long, value_parser = validate_config_path)]
    config_path: PathBuf,

    #[clap(long, value_enum, default_value_t = LogOutput::Console, env)]
    log_output: LogOutput,

    #[clap(long, env)]
    write_log: Option<PathBuf>,

    /// Simulated time each dummy training step takes
    #[clap(long, default_value_t = 250)]
    step_delay_ms: u64,

    /// How long a write takes to show up in non-latest reads
    #[clap(long, default_value_t = 0)]
    propagation_delay_ms: u64,

    #[clap(long, default_value_t = 42)]
    seed: u64,

    #[clap(flatten)]
    swarm: SwarmArgs,
}

fn validate_num_followers(s: &str) -> Result<usize> {
    s.parse().context("NUM_FOLLOWERS must be a non-negative integer")
}

fn validate_config_path(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("Config path {} does not exist", s))
    }
}

#[derive(Deserialize, Debug)]
struct RunConfig {
    max_rounds: u32,
    train_timeout_secs: u64,
    stages: Vec<StageConfig>,
}

#[derive(Deserialize, Debug, Clone)]
struct StageConfig {
    name: String,
    num_samples: usize,
    /// Built from this worker's outputs of the previous stage of the same round.
    #[serde(default)]
    needs_previous_stage: bool,
}

fn load_run_config(path: &PathBuf) -> Result<RunConfig> {
    let config: RunConfig = toml::from_str(
        &std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
    )
    .with_context(|| format!("failed to parse {}", path.display()))?;
    if config.stages.is_empty() {
        bail!("{} has no stages", path.display());
    }
    if let Some(stage) = config.stages.iter().find(|s| s.num_samples == 0) {
        bail!("stage {} has no samples", stage.name);
    }
    Ok(config)
}

fn arithmetic_samples(round: u32, stage: u32, n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| {
            let (a, b) = (round as usize + i, stage as usize * 3 + i);
            Sample {
                question: format!("round {round} stage {stage}: what is {a} + {b}?"),
                answer: (a + b).to_string(),
            }
        })
        .collect()
}

/// Each worker gets its own schedule: stages that need the previous stage's outputs only see
/// what this worker built itself.
fn build_schedule(config: &RunConfig) -> Arc<StageSchedule> {
    let last_built: Arc<Mutex<Option<RoundStage>>> = Arc::default();
    let stages = config
        .stages
        .iter()
        .cloned()
        .map(|stage| {
            let name = stage.name.clone();
            let last_built = last_built.clone();
            StageDescriptor::new(name, move |round, stage_num| {
                let mut last_built = last_built.lock().unwrap_or_else(PoisonError::into_inner);
                if stage.needs_previous_stage && stage_num > 0 {
                    let previous = RoundStage::new(round, stage_num - 1);
                    if *last_built != Some(previous) {
                        return Err(DatasetGenerationError::new(format!(
                            "stage {} of round {round} needs this worker's outputs of stage {}",
                            stage.name, previous.stage
                        )));
                    }
                }
                *last_built = Some(RoundStage::new(round, stage_num));
                Ok(StageDatasets {
                    train: arithmetic_samples(round, stage_num, stage.num_samples),
                    eval: vec![],
                })
            })
            .with_reward_fn(Arc::new(CorrectnessReward))
        })
        .collect();
    Arc::new(StageSchedule::new(
        stages,
        config.max_rounds,
        Duration::from_secs(config.train_timeout_secs),
    ))
}

async fn run_worker(key: WorkerKey, worker: TrainingCoordinator) -> Result<TrainingOutcome> {
    tokio::spawn(worker.train())
        .await
        .with_context(|| format!("worker {key} crashed"))?
        .with_context(|| format!("worker {key} failed"))
}

struct SwarmOptions {
    lease: Duration,
    step_delay: Duration,
    seed: u64,
    runner_config: StageRunnerConfig,
    follower_config: FollowerConfig,
    track_experiments: bool,
}

/// Trains the first key as coordinator and the rest as followers until every worker is done.
async fn run_swarm(
    run_config: &RunConfig,
    keys: &[WorkerKey],
    store: &MemoryStore,
    options: &SwarmOptions,
) -> Result<Vec<TrainingOutcome>> {
    for key in keys {
        store.add_peer(key.as_str()).await;
    }
    let shared: Arc<dyn DistributedStore> = Arc::new(store.clone());

    let workers = keys.iter().enumerate().map(|(i, key)| {
        let node = if i == 0 {
            WorkerNode::coordinator(key.clone(), options.lease)
        } else {
            WorkerNode::follower(key.clone(), options.lease)
        };
        let trainer =
            DummyTrainer::new(options.seed + i as u64).with_step_delay(options.step_delay);
        let mut runner = StageRunner::new(
            node,
            shared.clone(),
            build_schedule(run_config),
            Box::new(trainer),
            options.runner_config.clone(),
        );
        if options.track_experiments {
            runner = runner.with_tracker(Arc::new(LogTracker));
        }
        run_worker(
            key.clone(),
            TrainingCoordinator::new(runner, options.follower_config),
        )
    });
    try_join_all(workers).await
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    swarm_logging::init_logging(args.log_output, Level::INFO, args.write_log.clone())?;
    info!(
        "============ Local swarm startup at {} ============",
        OffsetDateTime::now_utc()
    );

    let run_config = load_run_config(&args.config_path)?;
    let options = SwarmOptions {
        lease: args.swarm.out_lease(),
        step_delay: Duration::from_millis(args.step_delay_ms),
        seed: args.seed,
        runner_config: args.swarm.stage_runner_config()?,
        follower_config: args.swarm.follower_config()?,
        track_experiments: args.swarm.track_experiments,
    };

    let coordinator_key = read_worker_key(args.swarm.worker_key.as_deref())?;
    let mut keys = vec![coordinator_key.clone()];
    for i in 0..args.num_followers {
        keys.push(WorkerKey::new(format!("follower-{i}"))?);
    }
    let num_stages = run_config.stages.len() as u32;

    info!(
        coordinator = %coordinator_key,
        followers = args.num_followers,
        max_rounds = run_config.max_rounds,
        stages = num_stages,
        "Starting swarm"
    );

    let store = MemoryStore::with_propagation_delay(Duration::from_millis(args.propagation_delay_ms));
    let outcomes = tokio::select! {
        outcomes = run_swarm(&run_config, &keys, &store, &options) => outcomes?,
        _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
    };
    for (key, outcome) in keys.iter().zip(outcomes) {
        info!(worker = %key, ?outcome, "Worker done");
    }

    let progress = ProgressPublisher::new(Arc::new(store), options.lease);
    for round in 0..run_config.max_rounds {
        for stage in 0..num_stages {
            let round_stage = RoundStage::new(round, stage);
            match progress.leaderboard(round_stage, true).await? {
                Some(leaderboard) => {
                    println!("{round_stage}:");
                    for (place, entry) in leaderboard.entries().iter().enumerate() {
                        println!("  {:>2}. {:<16} {:.2}", place + 1, entry.worker, entry.reward);
                    }
                }
                None => println!("{round_stage}: no leaderboard"),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    runtime.block_on(async_main())
}
