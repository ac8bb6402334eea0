use std::{env, fs, io, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    dispatch::Backpressure,
    error::{ActorErr, Result},
    reward::RewardRescale,
};

/// Env var holding the path of the JSON config file.
pub const CONFIG_ENV: &str = "ACTOR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "actor.json";

/// Everything the actor process is configured with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActorConfig {
    /// Number of environments stepped in lockstep, the `W` of a batch.
    pub num_envs: usize,
    /// OS threads the environments are spread over.
    pub num_threads: usize,
    /// Steps per batch, the `T` of a batch.
    pub horizon: usize,
    /// Total worker steps after which collection ends.
    pub max_global_steps: usize,
    pub num_actions: usize,
    pub obs_dim: usize,
    /// Episode step limit of the built-in environment.
    pub env_max_steps: usize,
    pub checkpoint_dir: PathBuf,
    pub learner_addr: String,
    pub upload_addr: String,
    pub upload_route: String,
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
    /// `None` waits for slow workers forever.
    pub barrier_timeout_ms: Option<u64>,
    /// Grace period for the sender to finish after collection stops.
    pub shutdown_grace_ms: u64,
    pub reward: RewardRescale,
    /// Horizons between progress reports.
    pub report_interval: usize,
    pub seed: Option<u64>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            num_envs: 32,
            num_threads: 8,
            horizon: 5,
            max_global_steps: 80_000_000,
            num_actions: 2,
            obs_dim: 4,
            env_max_steps: 500,
            checkpoint_dir: PathBuf::from("logs/upload"),
            learner_addr: "127.0.0.1:6666".into(),
            upload_addr: "127.0.0.1:6667".into(),
            upload_route: uploader::DEFAULT_ROUTE.into(),
            queue_capacity: 16,
            backpressure: Backpressure::Block,
            barrier_timeout_ms: Some(30_000),
            shutdown_grace_ms: 5_000,
            reward: RewardRescale::default(),
            report_interval: 64,
            seed: None,
        }
    }
}

impl ActorConfig {
    /// Reads a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| ActorErr::Config(format!("{}: {e}", path.display())))
    }

    /// Reads the file named by `ACTOR_CONFIG` (defaults to `actor.json`, a
    /// missing default file yields the defaults) and applies env overrides.
    pub fn from_env() -> Result<Self> {
        let explicit = env::var(CONFIG_ENV).ok();
        let path = PathBuf::from(explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

        let mut config = match Self::load(&path) {
            Err(ActorErr::Io(e)) if e.kind() == io::ErrorKind::NotFound && explicit.is_none() => {
                Self::default()
            }
            other => other?,
        };

        if let Ok(addr) = env::var("LEARNER_ADDR") {
            config.learner_addr = addr;
        }
        if let Ok(addr) = env::var("UPLOAD_ADDR") {
            config.upload_addr = addr;
        }
        if let Ok(dir) = env::var("CHECKPOINT_DIR") {
            config.checkpoint_dir = dir.into();
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the pipeline can't run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("num_envs", self.num_envs),
            ("num_threads", self.num_threads),
            ("horizon", self.horizon),
            ("num_actions", self.num_actions),
            ("obs_dim", self.obs_dim),
            ("queue_capacity", self.queue_capacity),
            ("report_interval", self.report_interval),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ActorErr::Config(format!("`{name}` must be greater than zero")));
        }

        if self.num_threads > self.num_envs {
            return Err(ActorErr::Config(format!(
                "`num_threads` ({}) can't exceed `num_envs` ({})",
                self.num_threads, self.num_envs
            )));
        }

        if !self.upload_route.starts_with('/') {
            return Err(ActorErr::Config(format!(
                "`upload_route` must start with `/`, got `{}`",
                self.upload_route
            )));
        }

        Ok(())
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
