//! Fixed horizon trajectory storage and the sealed batches handed to the learner.

use std::io;

use ndarray::{Array, Array2, Array3, ArrayView1, ArrayView2, Dimension, s};
use serde::{Deserialize, Serialize};

use crate::error::{ActorErr, Result, check_len};

/// Storage for one horizon of `T` steps over `W` workers.
///
/// Each step is written in two halves: the decision (observation the policy
/// saw, chosen actions and value estimates) before the workers advance, and
/// the outcome (rewards and done flags) once they did. The buffer becomes a
/// [`Batch`] through [`RolloutBuffer::seal`], which consumes it.
#[derive(Debug)]
pub struct RolloutBuffer {
    states: Array3<f32>,
    rewards: Array2<f32>,
    done_mask: Array2<f32>,
    actions: Array3<f32>,
    values: Array2<f32>,
    decided: usize,
    completed: usize,
}

impl RolloutBuffer {
    /// Creates a new zeroed `RolloutBuffer`.
    ///
    /// # Arguments
    /// * `horizon` - Steps to record, `T`.
    /// * `workers` - Parallel workers, `W`.
    /// * `obs_dim` - Flat size of one observation.
    /// * `num_actions` - Size of the one hot action vectors, `A`.
    pub fn new(horizon: usize, workers: usize, obs_dim: usize, num_actions: usize) -> Self {
        Self {
            states: Array3::zeros((horizon + 1, workers, obs_dim)),
            rewards: Array2::zeros((horizon, workers)),
            done_mask: Array2::zeros((horizon, workers)),
            actions: Array3::zeros((horizon, workers, num_actions)),
            values: Array2::zeros((horizon, workers)),
            decided: 0,
            completed: 0,
        }
    }

    pub fn horizon(&self) -> usize {
        self.rewards.nrows()
    }

    pub fn workers(&self) -> usize {
        self.rewards.ncols()
    }

    /// Steps fully recorded so far.
    pub fn len(&self) -> usize {
        self.completed
    }

    pub fn is_empty(&self) -> bool {
        self.completed == 0
    }

    pub fn is_full(&self) -> bool {
        self.completed == self.horizon()
    }

    /// Records what the policy saw and decided at step `t`.
    pub fn record_decision(
        &mut self,
        t: usize,
        observations: ArrayView2<'_, f32>,
        actions: ArrayView2<'_, f32>,
        values: ArrayView1<'_, f32>,
    ) -> Result<()> {
        check_len("decision step", t, self.completed)?;
        check_len("decision step", self.decided, self.completed)?;
        if self.is_full() {
            return Err(ActorErr::ShapeMismatch {
                what: "recorded steps",
                got: t + 1,
                expected: self.horizon(),
            });
        }
        check_len("observation rows", observations.nrows(), self.workers())?;
        check_len("observation size", observations.ncols(), self.states.dim().2)?;
        check_len("action rows", actions.nrows(), self.workers())?;
        check_len("action size", actions.ncols(), self.actions.dim().2)?;
        check_len("values", values.len(), self.workers())?;

        self.states.slice_mut(s![t, .., ..]).assign(&observations);
        self.actions.slice_mut(s![t, .., ..]).assign(&actions);
        self.values.row_mut(t).assign(&values);
        self.decided += 1;
        Ok(())
    }

    /// Records the rewards and done flags the workers produced at step `t`.
    ///
    /// The done mask stores `1 - done`, the factor the learner multiplies
    /// bootstrapped returns with.
    pub fn record_outcome(&mut self, t: usize, rewards: &[f32], dones: &[bool]) -> Result<()> {
        check_len("outcome step", t + 1, self.decided)?;
        check_len("outcome step", t, self.completed)?;
        check_len("rewards", rewards.len(), self.workers())?;
        check_len("done flags", dones.len(), self.workers())?;

        let mut reward_row = self.rewards.row_mut(t);
        let mut mask_row = self.done_mask.row_mut(t);

        for (w, (&reward, &done)) in rewards.iter().zip(dones).enumerate() {
            reward_row[w] = reward;
            mask_row[w] = if done { 0.0 } else { 1.0 };
        }

        self.completed += 1;
        Ok(())
    }

    /// Appends the bootstrap observation row and freezes the buffer.
    ///
    /// # Errors
    /// `ShapeMismatch` if the horizon isn't complete or `bootstrap` has the wrong shape.
    pub fn seal(mut self, bootstrap: ArrayView2<'_, f32>) -> Result<Batch> {
        let horizon = self.horizon();
        check_len("recorded steps", self.completed, horizon)?;
        check_len("bootstrap rows", bootstrap.nrows(), self.workers())?;
        check_len("bootstrap size", bootstrap.ncols(), self.states.dim().2)?;

        self.states.slice_mut(s![horizon, .., ..]).assign(&bootstrap);

        Ok(Batch {
            states: self.states,
            rewards: self.rewards,
            done_mask: self.done_mask,
            actions: self.actions,
            values: self.values,
        })
    }
}

/// One sealed horizon of trajectory data.
///
/// `states` is `(T + 1, W, obs_dim)`, `actions` is `(T, W, A)` and the rest
/// are `(T, W)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub states: Array3<f32>,
    pub rewards: Array2<f32>,
    pub done_mask: Array2<f32>,
    pub actions: Array3<f32>,
    pub values: Array2<f32>,
}

/// Shape information sent ahead of the batch's numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub horizon: usize,
    pub workers: usize,
    pub obs_dim: usize,
    pub num_actions: usize,
}

type HeaderLen = u32;
const HEADER_LEN_SIZE: usize = size_of::<HeaderLen>();

impl Batch {
    pub fn header(&self) -> BatchHeader {
        let (horizon, workers, num_actions) = self.actions.dim();
        BatchHeader {
            horizon,
            workers,
            obs_dim: self.states.dim().2,
            num_actions,
        }
    }

    pub fn horizon(&self) -> usize {
        self.rewards.nrows()
    }

    pub fn workers(&self) -> usize {
        self.rewards.ncols()
    }

    /// Appends the wire encoding of this batch to `buf`.
    ///
    /// Layout: a big endian `u32` header length, the JSON [`BatchHeader`] and
    /// then `states`, `rewards`, `done_mask`, `actions` and `values` as
    /// native endian `f32`s in row major order.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        // SAFETY: `BatchHeader` is a flat struct of numbers, it always serializes.
        let header = serde_json::to_vec(&self.header()).unwrap();

        buf.extend_from_slice(&(header.len() as HeaderLen).to_be_bytes());
        buf.extend_from_slice(&header);

        put(buf, &self.states);
        put(buf, &self.rewards);
        put(buf, &self.done_mask);
        put(buf, &self.actions);
        put(buf, &self.values);
    }

    /// Rebuilds a batch from the bytes written by [`Batch::encode`].
    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < HEADER_LEN_SIZE {
            return Err(invalid("batch shorter than its header length"));
        }

        let (len_buf, rest) = bytes.split_at(HEADER_LEN_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_LEN_SIZE` just above.
        let header_len = HeaderLen::from_be_bytes(len_buf.try_into().unwrap()) as usize;

        if rest.len() < header_len {
            return Err(invalid("batch shorter than its header"));
        }

        let (header, mut rest) = rest.split_at(header_len);
        let BatchHeader {
            horizon: t,
            workers: w,
            obs_dim: d,
            num_actions: a,
        } = serde_json::from_slice(header)?;

        let rows = t.checked_add(1).ok_or_else(overflow)?;
        let state_len = volume(&[rows, w, d])?;
        let step_len = volume(&[t, w])?;
        let action_len = volume(&[t, w, a])?;

        let batch = Self {
            states: shaped((rows, w, d), take(&mut rest, state_len)?)?,
            rewards: shaped((t, w), take(&mut rest, step_len)?)?,
            done_mask: shaped((t, w), take(&mut rest, step_len)?)?,
            actions: shaped((t, w, a), take(&mut rest, action_len)?)?,
            values: shaped((t, w), take(&mut rest, step_len)?)?,
        };

        if !rest.is_empty() {
            return Err(invalid("trailing bytes after batch"));
        }

        Ok(batch)
    }
}

fn invalid(detail: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, detail.to_string())
}

fn overflow() -> io::Error {
    invalid("batch shape overflows")
}

fn volume(dims: &[usize]) -> io::Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(overflow)
}

fn put<D: Dimension>(buf: &mut Vec<u8>, arr: &Array<f32, D>) {
    match arr.as_slice() {
        Some(nums) => buf.extend_from_slice(bytemuck::cast_slice(nums)),
        None => arr
            .iter()
            .for_each(|x| buf.extend_from_slice(&x.to_ne_bytes())),
    }
}

fn take(bytes: &mut &[u8], count: usize) -> io::Result<Vec<f32>> {
    let needed = count.checked_mul(size_of::<f32>()).ok_or_else(overflow)?;

    if bytes.len() < needed {
        return Err(invalid("batch data is truncated"));
    }

    let (head, tail) = bytes.split_at(needed);
    *bytes = tail;

    Ok(head
        .chunks_exact(size_of::<f32>())
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn shaped<Sh, D>(shape: Sh, nums: Vec<f32>) -> io::Result<Array<f32, D>>
where
    D: Dimension,
    Sh: Into<ndarray::StrideShape<D>>,
{
    Array::from_shape_vec(shape, nums).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
