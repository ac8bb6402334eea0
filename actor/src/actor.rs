use std::{future::Future, io, num::NonZeroUsize};

use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{net::TcpListener, signal, sync::watch, task::JoinHandle, time};
use uploader::UploadServer;

use crate::{
    checkpoint::CheckpointWatcher,
    collector::Collector,
    config::ActorConfig,
    dispatch::{BatchSender, SenderReport, dispatch_queue},
    env::{EnvPool, Environment},
    error::{ActorErr, Result},
    metrics::ActorMetrics,
    policy::Policy,
};

/// How a run of the actor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorReport {
    pub metrics: ActorMetrics,
    /// `None` if the sender didn't finish within the shutdown grace period.
    pub sender: Option<SenderReport>,
    /// Whether the run was cut short by the shutdown signal.
    pub interrupted: bool,
}

/// The actor process: collects experience and ships it to the learner.
///
/// Owns every component of the pipeline. On the way out, for whatever reason,
/// it stops the workers, lets the sender drain (or aborts it) and stops the
/// upload endpoint.
pub struct Actor<P> {
    config: ActorConfig,
    policy: P,
    envs: Vec<Box<dyn Environment>>,
}

impl<P: Policy> Actor<P> {
    /// Creates a new `Actor`.
    ///
    /// # Arguments
    /// * `config` - The actor's configuration.
    /// * `policy` - The initial policy, replaced as checkpoints are published.
    /// * `envs` - One environment per worker.
    pub fn new(config: ActorConfig, policy: P, envs: Vec<Box<dyn Environment>>) -> Self {
        Self {
            config,
            policy,
            envs,
        }
    }

    /// Runs until the step budget is spent, the learner stops, a fatal error
    /// occurs or the process receives ctrl-c.
    pub async fn run(self) -> Result<ActorReport> {
        self.run_until(signal::ctrl_c()).await
    }

    /// Same as `run` but stops when `shutdown` resolves.
    pub async fn run_until<F: Future>(self, shutdown: F) -> Result<ActorReport> {
        let Self {
            config,
            policy,
            envs,
        } = self;

        tokio::fs::create_dir_all(&config.checkpoint_dir).await?;

        let threads = NonZeroUsize::new(config.num_threads)
            .ok_or_else(|| ActorErr::Config("`num_threads` must be greater than zero".into()))?;
        let capacity = NonZeroUsize::new(config.queue_capacity)
            .ok_or_else(|| ActorErr::Config("`queue_capacity` must be greater than zero".into()))?;

        let pool = EnvPool::new(envs, threads, config.barrier_timeout())?;
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let mut collector = Collector::new(policy, pool, rng, &config)?;
        let mut watcher = CheckpointWatcher::new(&config.checkpoint_dir);

        let listener = TcpListener::bind(&config.upload_addr).await?;
        let sender = BatchSender::connect(&config.learner_addr).await?;
        info!("connected to learner at {}", config.learner_addr);

        let upload = UploadServer::new(&config.checkpoint_dir, &config.upload_route);
        let upload_task = tokio::spawn(upload.serve(listener));

        let (queue, source) = dispatch_queue(capacity, config.backpressure);
        let mut sender_task = tokio::spawn(sender.run(source));

        let (stop_tx, stop_rx) = watch::channel(false);
        let collected = {
            let run = collector.run_until(&queue, &mut watcher, stop_rx);
            tokio::pin!(run);

            tokio::select! {
                collected = &mut run => Some(collected),
                _ = shutdown => {
                    info!("received shutdown signal, finishing the current horizon");
                    let _ = stop_tx.send(true);

                    match time::timeout(config.shutdown_grace(), &mut run).await {
                        Ok(collected) => Some(collected),
                        Err(_) => {
                            warn!(
                                "collector didn't reach a horizon boundary within {:?}, dropping it",
                                config.shutdown_grace()
                            );
                            None
                        }
                    }
                }
            }
        };

        collector.stop().await;

        let interrupted = match &collected {
            Some(Ok(metrics)) => metrics.interrupted,
            Some(Err(_)) => false,
            None => true,
        };

        match &collected {
            Some(Ok(_)) if !interrupted => queue.finish(),
            _ => queue.abort(),
        }

        let sent = match time::timeout(config.shutdown_grace(), &mut sender_task).await {
            Ok(joined) => Some(joined.map_err(|e| ActorErr::Io(io::Error::other(e)))),
            Err(_) => {
                warn!("sender didn't finish within {:?}, aborting it", config.shutdown_grace());
                sender_task.abort();
                None
            }
        };

        stop_upload(upload_task).await;

        let metrics = *collector.metrics();

        if let Some(Err(e)) = collected {
            return Err(e);
        }

        let sender = match sent {
            Some(joined) => Some(joined??),
            None => None,
        };

        let report = ActorReport {
            metrics,
            sender,
            interrupted,
        };

        info!(
            global_step = metrics.global_step,
            batches = metrics.batches,
            checkpoints = metrics.checkpoints;
            "actor finished"
        );

        Ok(report)
    }
}

async fn stop_upload(task: JoinHandle<io::Result<()>>) {
    if task.is_finished() {
        match task.await {
            Ok(Err(e)) => warn!("upload endpoint failed: {e}"),
            Err(e) => warn!("upload endpoint panicked: {e}"),
            Ok(Ok(())) => {}
        }
    } else {
        task.abort();
    }
}
