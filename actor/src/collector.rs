use log::{debug, info};
use ndarray::{Array2, ArrayView1};
use rand::Rng;
use tokio::sync::watch;

use crate::{
    checkpoint::{CheckpointWatcher, Poll},
    config::ActorConfig,
    dispatch::{Closed, DispatchQueue, Enqueued},
    env::WorkerPool,
    error::{Result, check_len},
    metrics::{ActorMetrics, EpisodeSink, EpisodeSummary, LogSink, Progress},
    policy::{Policy, sample_actions},
    reward::RewardRescale,
    rollout::{Batch, RolloutBuffer},
};

/// Running return, length and action counts of every worker's episode.
#[derive(Debug, Clone)]
struct EpisodeTracker {
    rewards: Vec<f32>,
    lengths: Vec<usize>,
    action_counts: Vec<Vec<usize>>,
}

impl EpisodeTracker {
    fn new(workers: usize, num_actions: usize) -> Self {
        Self {
            rewards: vec![0.0; workers],
            lengths: vec![0; workers],
            action_counts: vec![vec![0; num_actions]; workers],
        }
    }

    fn update(&mut self, worker: usize, reward: f32, action: usize) {
        self.rewards[worker] += reward;
        self.lengths[worker] += 1;
        self.action_counts[worker][action] += 1;
    }

    /// Closes `worker`'s episode, its counters start over from zero.
    fn finish(&mut self, worker: usize) -> (f32, usize, Vec<usize>) {
        let num_actions = self.action_counts[worker].len();
        (
            std::mem::take(&mut self.rewards[worker]),
            std::mem::take(&mut self.lengths[worker]),
            std::mem::replace(&mut self.action_counts[worker], vec![0; num_actions]),
        )
    }
}

/// Drives the workers through horizons and turns them into batches.
pub struct Collector<P, W, R> {
    policy: P,
    pool: W,
    rng: R,
    horizon: usize,
    num_actions: usize,
    reward: RewardRescale,
    max_global_steps: usize,
    report_interval: usize,
    observations: Array2<f32>,
    tracker: EpisodeTracker,
    sink: Box<dyn EpisodeSink>,
    progress: Progress,
    metrics: ActorMetrics,
}

impl<P, W, R> Collector<P, W, R>
where
    P: Policy,
    W: WorkerPool,
    R: Rng + Send,
{
    /// Creates a new `Collector`.
    ///
    /// # Arguments
    /// * `policy` - The model actions are sampled from.
    /// * `pool` - The workers, already started.
    /// * `rng` - Source of randomness for action sampling.
    /// * `config` - The actor's configuration.
    ///
    /// # Errors
    /// `ShapeMismatch` if `pool` disagrees with `config` on the worker count or
    /// the observation size.
    pub fn new(policy: P, pool: W, rng: R, config: &ActorConfig) -> Result<Self> {
        let observations = pool.initial_observations();
        check_len("workers", observations.nrows(), config.num_envs)?;
        check_len("observation size", observations.ncols(), config.obs_dim)?;

        Ok(Self {
            policy,
            pool,
            rng,
            horizon: config.horizon,
            num_actions: config.num_actions,
            reward: config.reward,
            max_global_steps: config.max_global_steps,
            report_interval: config.report_interval.max(1),
            tracker: EpisodeTracker::new(config.num_envs, config.num_actions),
            observations,
            sink: Box::new(LogSink),
            progress: Progress::new(0),
            metrics: ActorMetrics::default(),
        })
    }

    /// Replaces where episode summaries go.
    pub fn with_sink(mut self, sink: impl EpisodeSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn workers(&self) -> usize {
        self.observations.nrows()
    }

    pub fn metrics(&self) -> &ActorMetrics {
        &self.metrics
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// The observation every worker is currently at.
    pub fn observations(&self) -> &Array2<f32> {
        &self.observations
    }

    /// Collects step `t` of the horizon into `buffer`.
    ///
    /// Samples one action per worker from the policy, steps every worker and
    /// waits for all of them, then records the outcome.
    ///
    /// # Errors
    /// Policy failures and pool failures, both fatal.
    pub async fn step(&mut self, t: usize, buffer: &mut RolloutBuffer) -> Result<()> {
        let workers = self.workers();

        let inference = self.policy.infer(self.observations.view())?;
        check_len("values", inference.values.len(), workers)?;
        check_len("distributions", inference.probs.nrows(), workers)?;
        check_len("actions", inference.probs.ncols(), self.num_actions)?;

        let (actions, one_hot) = sample_actions(&mut self.rng, inference.probs.view());
        buffer.record_decision(
            t,
            self.observations.view(),
            one_hot.view(),
            inference.values.view(),
        )?;

        self.pool.submit_actions(&actions)?;
        self.pool.await_completion().await?;

        let mut rewards = Vec::with_capacity(workers);
        let mut dones = Vec::with_capacity(workers);
        let global_step = self.metrics.global_step + workers;

        for (w, slot) in self.pool.shared_slots().iter().enumerate() {
            self.observations
                .row_mut(w)
                .assign(&ArrayView1::from(slot.observation.as_slice()));
            self.tracker.update(w, slot.reward, actions[w]);

            if slot.done {
                let (reward, length, action_counts) = self.tracker.finish(w);
                let summary = EpisodeSummary {
                    worker: w,
                    reward,
                    length,
                    global_step,
                    action_counts,
                };

                self.sink.record(&summary);
                self.progress.episode(reward);
                self.metrics.episodes += 1;
            }

            rewards.push(self.reward.apply(slot.reward));
            dones.push(slot.done);
        }

        buffer.record_outcome(t, &rewards, &dones)?;
        self.metrics.global_step = global_step;
        Ok(())
    }

    /// Collects one full horizon into a fresh buffer and seals it.
    pub async fn collect(&mut self) -> Result<Batch> {
        let mut buffer = RolloutBuffer::new(
            self.horizon,
            self.workers(),
            self.observations.ncols(),
            self.num_actions,
        );

        for t in 0..self.horizon {
            self.step(t, &mut buffer).await?;
        }

        buffer.seal(self.observations.view())
    }

    /// Loads a newer checkpoint into the policy if one was published.
    pub fn refresh(&mut self, watcher: &mut CheckpointWatcher) -> Result<()> {
        if let Poll::Loaded(pointer) = watcher.poll(&mut self.policy)? {
            debug!(id = pointer.id.as_str(), global_step = self.metrics.global_step; "policy refreshed");
            self.metrics.checkpoints += 1;
        }
        Ok(())
    }

    /// Collects batches into `queue` until the step budget is spent or the
    /// queue stops accepting them.
    ///
    /// The watcher is polled once before the first horizon and after every
    /// horizon, never in the middle of one.
    pub async fn run(
        &mut self,
        queue: &DispatchQueue,
        watcher: &mut CheckpointWatcher,
    ) -> Result<ActorMetrics> {
        let (_never, shutdown) = watch::channel(false);
        self.run_until(queue, watcher, shutdown).await
    }

    /// Same as `run` but also stops once `shutdown` turns `true`.
    ///
    /// Shutdown is only honoured between horizons, a started horizon always
    /// completes its steps. A sealed batch still waiting for room in the
    /// queue is discarded.
    pub async fn run_until(
        &mut self,
        queue: &DispatchQueue,
        watcher: &mut CheckpointWatcher,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ActorMetrics> {
        self.progress = Progress::new(self.metrics.global_step);
        self.refresh(watcher)?;

        let mut horizons = 0;

        while self.metrics.global_step < self.max_global_steps {
            if *shutdown.borrow() {
                self.metrics.interrupted = true;
                break;
            }

            if queue.is_closed() {
                self.metrics.queue_closed = true;
                break;
            }

            let batch = self.collect().await?;

            let enqueued = tokio::select! {
                biased;
                enqueued = queue.enqueue(batch) => Some(enqueued),
                _ = requested(&mut shutdown) => None,
            };

            let Some(enqueued) = enqueued else {
                self.metrics.interrupted = true;
                break;
            };

            match enqueued {
                Ok(Enqueued::Queued) => self.metrics.batches += 1,
                Ok(Enqueued::DroppedOldest | Enqueued::DroppedNewest) => {
                    self.metrics.batches += 1;
                    self.metrics.dropped += 1;
                }
                Err(Closed) => {
                    self.metrics.queue_closed = true;
                    break;
                }
            }

            self.refresh(watcher)?;

            horizons += 1;
            if horizons % self.report_interval == 0 {
                self.progress.report(self.metrics.global_step);
            }
        }

        info!(
            global_step = self.metrics.global_step,
            batches = self.metrics.batches,
            episodes = self.metrics.episodes,
            interrupted = self.metrics.interrupted;
            "collection finished"
        );

        Ok(self.metrics)
    }

    /// Terminates the pool's workers.
    pub async fn stop(&mut self) {
        self.pool.stop().await;
    }
}

/// Resolves once shutdown is requested, never if the requester went away.
async fn requested(shutdown: &mut watch::Receiver<bool>) {
    let gone = shutdown.wait_for(|stop| *stop).await.is_err();
    if gone {
        std::future::pending::<()>().await;
    }
}
