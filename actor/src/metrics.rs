//! Episode summaries and periodic progress reporting.

use std::{collections::VecDeque, time::Instant};

use log::info;

/// Rewards kept for the rolling average in progress reports.
const RECENT_EPISODES: usize = 10;

/// Emitted every time a worker finishes an episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub worker: usize,
    /// Sum of the unscaled rewards of the episode.
    pub reward: f32,
    pub length: usize,
    pub global_step: usize,
    /// How many times each action was taken during the episode.
    pub action_counts: Vec<usize>,
}

/// Receives the episode summaries of the collector.
pub trait EpisodeSink: Send {
    fn record(&mut self, summary: &EpisodeSummary);
}

/// Logs every episode summary at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl EpisodeSink for LogSink {
    fn record(&mut self, summary: &EpisodeSummary) {
        log::debug!(
            worker = summary.worker,
            reward = summary.reward,
            length = summary.length,
            global_step = summary.global_step;
            "episode finished, actions {:?}",
            summary.action_counts
        );
    }
}

/// Tracks throughput and recent returns for the progress log line.
#[derive(Debug)]
pub struct Progress {
    started: Instant,
    last_report: Instant,
    last_step: usize,
    recent: VecDeque<f32>,
}

impl Progress {
    pub fn new(global_step: usize) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_report: now,
            last_step: global_step,
            recent: VecDeque::with_capacity(RECENT_EPISODES),
        }
    }

    /// Remembers an episode's return for the rolling average.
    pub fn episode(&mut self, reward: f32) {
        if self.recent.len() == RECENT_EPISODES {
            self.recent.pop_front();
        }
        self.recent.push_back(reward);
    }

    /// Mean return of the last episodes, `None` before the first one ends.
    pub fn mean_reward(&self) -> Option<f32> {
        (!self.recent.is_empty()).then(|| self.recent.iter().sum::<f32>() / self.recent.len() as f32)
    }

    /// Logs steps per second since the last report and since the start.
    pub fn report(&mut self, global_step: usize) {
        let now = Instant::now();
        let window = now.duration_since(self.last_report).as_secs_f64().max(f64::EPSILON);
        let total = now.duration_since(self.started).as_secs_f64().max(f64::EPSILON);

        let steps_per_sec = global_step.saturating_sub(self.last_step) as f64 / window;
        let avg_steps_per_sec = global_step as f64 / total;

        info!(
            global_step = global_step;
            "{steps_per_sec:.0} steps/s, avg {avg_steps_per_sec:.0} steps/s, mean reward {}",
            self.mean_reward().map_or("n/a".to_string(), |r| format!("{r:.2}"))
        );

        self.last_report = now;
        self.last_step = global_step;
    }
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorMetrics {
    pub global_step: usize,
    /// Batches handed to the dispatch queue.
    pub batches: usize,
    /// Batches lost to the queue's drop policy.
    pub dropped: usize,
    pub episodes: usize,
    /// Checkpoints loaded into the policy.
    pub checkpoints: usize,
    /// Collection ended because the sender stopped consuming.
    pub queue_closed: bool,
    /// Collection ended at a horizon boundary because shutdown was requested.
    pub interrupted: bool,
}
