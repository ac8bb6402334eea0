use std::f32::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{Environment, Transition};

const GRAVITY: f32 = 9.8;
const MASS_CART: f32 = 1.0;
const MASS_POLE: f32 = 0.1;
const TOTAL_MASS: f32 = MASS_CART + MASS_POLE;
/// Half the pole's length.
const LENGTH: f32 = 0.5;
const POLE_MASS_LENGTH: f32 = MASS_POLE * LENGTH;
const FORCE_MAG: f32 = 10.0;
const TAU: f32 = 0.02;
const THETA_THRESHOLD: f32 = 12.0 * 2.0 * PI / 360.0;
const X_THRESHOLD: f32 = 2.4;

/// The classic cart and pole balancing task.
///
/// Observation: `[x, x_dot, theta, theta_dot]`, action `0` pushes left and `1`
/// pushes right. Every step the pole stays up is worth `1.0`.
#[derive(Debug)]
pub struct CartPole {
    state: [f32; 4],
    steps: usize,
    max_steps: usize,
    rng: StdRng,
}

impl CartPole {
    /// Creates a new `CartPole`.
    ///
    /// # Arguments
    /// * `max_steps` - Steps after which an episode is truncated.
    /// * `seed` - Seed for the initial state noise.
    pub fn new(max_steps: usize, seed: u64) -> Self {
        let mut env = Self {
            state: [0.0; 4],
            steps: 0,
            max_steps,
            rng: StdRng::seed_from_u64(seed),
        };

        env.reset();
        env
    }

    fn reset(&mut self) {
        for x in &mut self.state {
            *x = self.rng.random_range(-0.05..0.05);
        }
        self.steps = 0;
    }

    fn fell(&self) -> bool {
        let [x, _, theta, _] = self.state;
        x.abs() > X_THRESHOLD || theta.abs() > THETA_THRESHOLD
    }
}

impl Environment for CartPole {
    fn initial_observation(&mut self) -> Vec<f32> {
        self.state.to_vec()
    }

    fn step(&mut self, action: usize) -> Transition {
        let [x, x_dot, theta, theta_dot] = self.state;
        let force = if action == 1 { FORCE_MAG } else { -FORCE_MAG };

        let (sin, cos) = theta.sin_cos();
        let temp = (force + POLE_MASS_LENGTH * theta_dot * theta_dot * sin) / TOTAL_MASS;
        let theta_acc =
            (GRAVITY * sin - cos * temp) / (LENGTH * (4.0 / 3.0 - MASS_POLE * cos * cos / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * cos / TOTAL_MASS;

        self.state = [
            x + TAU * x_dot,
            x_dot + TAU * x_acc,
            theta + TAU * theta_dot,
            theta_dot + TAU * theta_acc,
        ];
        self.steps += 1;

        let fell = self.fell();
        let done = fell || self.steps >= self.max_steps;
        let reward = if fell { 0.0 } else { 1.0 };

        if done {
            self.reset();
        }

        Transition {
            observation: self.state.to_vec(),
            reward,
            done,
        }
    }
}
