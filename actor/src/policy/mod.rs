//! The policy the collector acts with, and how actions are drawn from it.

mod linear;
mod sampling;

use std::{error::Error, fmt};

use ndarray::{Array1, Array2, ArrayView2};

use crate::{checkpoint::CheckpointPointer, error::Result};

pub use linear::LinearPolicy;
pub use sampling::{EPSNEG, sample_action, sample_actions};

/// The output of one forward pass over every worker's observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    /// Value estimate per worker.
    pub values: Array1<f32>,
    /// Action distribution per worker, one row each.
    pub probs: Array2<f32>,
}

/// Why a checkpoint couldn't be loaded into a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreErr {
    /// The artifacts are missing or partially written, retrying may succeed.
    Incomplete(String),
    /// The artifacts can never fit this policy.
    Incompatible(String),
}

impl fmt::Display for RestoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreErr::Incomplete(detail) => write!(f, "checkpoint incomplete: {detail}"),
            RestoreErr::Incompatible(detail) => write!(f, "checkpoint incompatible: {detail}"),
        }
    }
}

impl Error for RestoreErr {}

/// A model mapping observations to values and action distributions.
///
/// Parameters are only swapped through `restore`, which takes `&mut self`,
/// so a swap can never overlap an inference.
pub trait Policy: Send {
    /// Runs the forward pass.
    ///
    /// # Arguments
    /// * `observations` - One row per worker.
    ///
    /// # Errors
    /// Any failure here is fatal for the rollout.
    fn infer(&self, observations: ArrayView2<'_, f32>) -> Result<Inference>;

    /// Replaces the parameters with the ones of `checkpoint`.
    ///
    /// On error the previous parameters must remain in place.
    fn restore(&mut self, checkpoint: &CheckpointPointer) -> std::result::Result<(), RestoreErr>;
}
