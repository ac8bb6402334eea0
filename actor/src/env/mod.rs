//! The environments the actor collects experience from, and the pool that
//! steps them in lockstep.

mod cartpole;
mod pool;
mod slot;

pub use cartpole::CartPole;
pub use pool::{EnvPool, WorkerPool, WorkerPoolTemplate};
pub use slot::WorkerSlot;

/// What an environment produced after taking one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub done: bool,
}

/// A single environment instance driven by one worker.
pub trait Environment: Send {
    /// The first observation of the first episode.
    fn initial_observation(&mut self) -> Vec<f32>;

    /// Advances the environment by one step.
    ///
    /// When the step ends the episode the environment resets itself, and the
    /// returned observation is the first one of the next episode.
    fn step(&mut self, action: usize) -> Transition;
}
