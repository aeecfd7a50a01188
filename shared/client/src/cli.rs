use crate::{FollowerConfig, StageRunnerConfig, MAX_TRAIN_FAILS};

use anyhow::{bail, Context, Result};
use clap::Args;
use rand::{distributions::Alphanumeric, Rng};
use std::{path::PathBuf, time::Duration};
use swarm_core::WorkerKey;

/// Uses `--worker-key` when given, otherwise makes up a random one.
pub fn read_worker_key(worker_key: Option<&str>) -> Result<WorkerKey> {
    match worker_key {
        Some(key) => WorkerKey::new(key).with_context(|| format!("invalid worker key {key:?}")),
        None => {
            let key: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect();
            Ok(WorkerKey::new(key)?)
        }
    }
}

fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("--{name} must be a non-negative number of seconds, got {value}"))
}

#[derive(Args, Debug, Clone)]
pub struct SwarmArgs {
    /// This worker's identity in the swarm. Must not contain whitespace or underscores. If not provided a random one will be generated.
    #[clap(long, env)]
    pub worker_key: Option<String>,

    /// How long every value this worker writes to the store stays alive, in seconds.
    #[clap(long, default_value_t = 4 * 60 * 60, env)]
    pub out_lease_secs: u64,

    /// Followers wait this long after failing to read the round pointer. Also the starting backoff once a round is done.
    #[clap(long, default_value_t = 5.0, env)]
    pub check_interval_secs: f64,

    #[clap(long, default_value_t = 10.0, env)]
    pub log_timeout_secs: f64,

    #[clap(long, default_value_t = 300.0, env)]
    pub max_check_interval_secs: f64,

    /// Training attempts per stage before giving up on store I/O errors.
    #[clap(long, default_value_t = MAX_TRAIN_FAILS, env)]
    pub max_train_fails: u32,

    /// Stage results and the model are saved to `{output_dir}-{worker_key}`.
    #[clap(long, default_value = "runs/swarm", env)]
    pub output_dir: PathBuf,

    /// Pushes the model to the Hugging Face Hub after every round when set.
    #[clap(long, env = "HF_TOKEN")]
    pub hub_token: Option<String>,

    #[clap(long, env)]
    pub tracker_project: Option<String>,

    #[clap(long, default_value_t = false, env)]
    pub track_experiments: bool,
}

impl SwarmArgs {
    pub fn out_lease(&self) -> Duration {
        Duration::from_secs(self.out_lease_secs)
    }

    pub fn follower_config(&self) -> Result<FollowerConfig> {
        let config = FollowerConfig {
            check_interval: secs("check-interval-secs", self.check_interval_secs)?,
            log_timeout: secs("log-timeout-secs", self.log_timeout_secs)?,
            max_check_interval: secs("max-check-interval-secs", self.max_check_interval_secs)?,
        };
        if config.check_interval.is_zero() {
            bail!("--check-interval-secs must be greater than zero");
        }
        if config.check_interval > config.max_check_interval {
            bail!(
                "--check-interval-secs ({}) is larger than --max-check-interval-secs ({})",
                self.check_interval_secs,
                self.max_check_interval_secs
            );
        }
        Ok(config)
    }

    pub fn stage_runner_config(&self) -> Result<StageRunnerConfig> {
        if self.max_train_fails == 0 {
            bail!("--max-train-fails must be at least 1");
        }
        if self.tracker_project.is_some() && !self.track_experiments {
            bail!("--tracker-project was set, but --track-experiments was not");
        }
        let mut config = StageRunnerConfig::new(self.output_dir.clone());
        config.hub_token = self.hub_token.clone();
        config.max_train_fails = self.max_train_fails;
        if let Some(project) = &self.tracker_project {
            config.tracker_project = project.clone();
        }
        Ok(config)
    }
}
