#![allow(dead_code)]

use std::{sync::Arc, thread};

use actor::{
    env::{Environment, Transition},
    metrics::{EpisodeSink, EpisodeSummary},
};
use parking_lot::Mutex;

/// Observation `[steps into the episode, worker id]`, episodes of fixed length.
pub struct Counter {
    pub id: usize,
    pub episode_len: usize,
    pub reward: f32,
    steps: usize,
}

impl Counter {
    pub fn new(id: usize, episode_len: usize, reward: f32) -> Self {
        Self {
            id,
            episode_len,
            reward,
            steps: 0,
        }
    }

    fn observation(&self) -> Vec<f32> {
        vec![self.steps as f32, self.id as f32]
    }
}

impl Environment for Counter {
    fn initial_observation(&mut self) -> Vec<f32> {
        self.observation()
    }

    fn step(&mut self, _: usize) -> Transition {
        self.steps += 1;
        let done = self.steps == self.episode_len;
        if done {
            self.steps = 0;
        }

        Transition {
            observation: self.observation(),
            reward: self.reward,
            done,
        }
    }
}

/// Never finishes a step.
pub struct Hang;

impl Environment for Hang {
    fn initial_observation(&mut self) -> Vec<f32> {
        vec![0.0, 0.0]
    }

    fn step(&mut self, _: usize) -> Transition {
        loop {
            thread::park();
        }
    }
}

/// Panics on its first step.
pub struct Crash;

impl Environment for Crash {
    fn initial_observation(&mut self) -> Vec<f32> {
        vec![0.0, 0.0]
    }

    fn step(&mut self, _: usize) -> Transition {
        panic!("environment blew up");
    }
}

pub fn counters(workers: usize, episode_len: usize, reward: f32) -> Vec<Box<dyn Environment>> {
    (0..workers)
        .map(|id| Box::new(Counter::new(id, episode_len, reward)) as Box<dyn Environment>)
        .collect()
}

/// Keeps every summary it receives.
#[derive(Clone, Default)]
pub struct Recorded(pub Arc<Mutex<Vec<EpisodeSummary>>>);

impl EpisodeSink for Recorded {
    fn record(&mut self, summary: &EpisodeSummary) {
        self.0.lock().push(summary.clone());
    }
}
