use std::{
    fs, io,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array2, ArrayView2, Axis};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use super::{Inference, Policy, RestoreErr};
use crate::{
    checkpoint::CheckpointPointer,
    error::{ActorErr, Result, check_len},
};

const PI_W: &str = "pi/w";
const PI_B: &str = "pi/b";
const V_W: &str = "v/w";
const V_B: &str = "v/b";

/// Extension of the artifact a `LinearPolicy` is stored in.
pub const ARTIFACT_EXT: &str = "safetensors";

/// A softmax linear actor with a linear critic.
///
/// `probs = softmax(obs · pi_w + pi_b)` and `value = obs · v_w + v_b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPolicy {
    pi_w: Array2<f32>,
    pi_b: Array1<f32>,
    v_w: Array1<f32>,
    v_b: f32,
}

impl LinearPolicy {
    /// Creates a new `LinearPolicy` with every parameter at zero, a uniform policy.
    pub fn new(obs_dim: usize, num_actions: usize) -> Self {
        Self {
            pi_w: Array2::zeros((obs_dim, num_actions)),
            pi_b: Array1::zeros(num_actions),
            v_w: Array1::zeros(obs_dim),
            v_b: 0.0,
        }
    }

    /// Creates a `LinearPolicy` from explicit parameters.
    ///
    /// # Errors
    /// `ShapeMismatch` if the parameters don't agree on the sizes.
    pub fn from_params(
        pi_w: Array2<f32>,
        pi_b: Array1<f32>,
        v_w: Array1<f32>,
        v_b: f32,
    ) -> Result<Self> {
        check_len("actor bias", pi_b.len(), pi_w.ncols())?;
        check_len("critic weights", v_w.len(), pi_w.nrows())?;

        Ok(Self {
            pi_w,
            pi_b,
            v_w,
            v_b,
        })
    }

    pub fn obs_dim(&self) -> usize {
        self.pi_w.nrows()
    }

    pub fn num_actions(&self) -> usize {
        self.pi_w.ncols()
    }

    /// Where the artifact of checkpoint `id` lives inside `dir`.
    pub fn artifact_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.{ARTIFACT_EXT}"))
    }

    /// Encodes the parameters in the safetensors format.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let tensors = [
            (PI_W, le_bytes(self.pi_w.iter()), self.pi_w.shape().to_vec()),
            (PI_B, le_bytes(self.pi_b.iter()), vec![self.pi_b.len()]),
            (V_W, le_bytes(self.v_w.iter()), vec![self.v_w.len()]),
            (V_B, le_bytes([self.v_b].iter()), vec![1]),
        ];

        let views = tensors
            .iter()
            .map(|(name, data, shape)| {
                TensorView::new(Dtype::F32, shape.clone(), data)
                    .map(|view| (*name, view))
                    .map_err(io::Error::other)
            })
            .collect::<io::Result<Vec<_>>>()?;

        safetensors::serialize(views, &None).map_err(io::Error::other)
    }

    /// Writes the parameters as the artifact of checkpoint `id` in `dir`.
    ///
    /// # Returns
    /// The path of the written artifact.
    pub fn save(&self, dir: &Path, id: &str) -> io::Result<PathBuf> {
        let path = Self::artifact_path(dir, id);
        fs::write(&path, self.to_bytes()?)?;
        Ok(path)
    }

    fn load(&self, bytes: &[u8]) -> std::result::Result<Self, RestoreErr> {
        let tensors = SafeTensors::deserialize(bytes)
            .map_err(|e| RestoreErr::Incomplete(format!("unreadable artifact: {e}")))?;

        let (d, a) = (self.obs_dim(), self.num_actions());
        let pi_w = tensor(&tensors, PI_W, &[d, a])?;
        let pi_b = tensor(&tensors, PI_B, &[a])?;
        let v_w = tensor(&tensors, V_W, &[d])?;
        let v_b = tensor(&tensors, V_B, &[1])?;

        let incompatible = |e: ndarray::ShapeError| RestoreErr::Incompatible(e.to_string());

        Ok(Self {
            pi_w: Array2::from_shape_vec((d, a), pi_w).map_err(incompatible)?,
            pi_b: Array1::from_vec(pi_b),
            v_w: Array1::from_vec(v_w),
            v_b: v_b[0],
        })
    }
}

impl Policy for LinearPolicy {
    fn infer(&self, observations: ArrayView2<'_, f32>) -> Result<Inference> {
        check_len("observation size", observations.ncols(), self.obs_dim())?;

        let mut probs = observations.dot(&self.pi_w) + &self.pi_b;
        let values = observations.dot(&self.v_w) + self.v_b;

        for mut row in probs.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            row.mapv_inplace(|x| (x - max).exp());
            let total = row.sum();
            row /= total;
        }

        if probs.iter().chain(values.iter()).any(|x| !x.is_finite()) {
            return Err(ActorErr::Policy("forward pass produced non finite numbers".into()));
        }

        Ok(Inference { values, probs })
    }

    fn restore(&mut self, checkpoint: &CheckpointPointer) -> std::result::Result<(), RestoreErr> {
        let mut path = checkpoint.path.clone().into_os_string();
        path.push(".");
        path.push(ARTIFACT_EXT);

        let bytes = fs::read(&path)
            .map_err(|e| RestoreErr::Incomplete(format!("{}: {e}", PathBuf::from(&path).display())))?;

        *self = self.load(&bytes)?;
        Ok(())
    }
}

fn le_bytes<'a>(nums: impl Iterator<Item = &'a f32>) -> Vec<u8> {
    nums.flat_map(|x| x.to_le_bytes()).collect()
}

fn tensor(
    tensors: &SafeTensors<'_>,
    name: &str,
    shape: &[usize],
) -> std::result::Result<Vec<f32>, RestoreErr> {
    let view = tensors
        .tensor(name)
        .map_err(|_| RestoreErr::Incompatible(format!("missing tensor {name}")))?;

    if view.dtype() != Dtype::F32 {
        return Err(RestoreErr::Incompatible(format!(
            "tensor {name} is {:?}, expected F32",
            view.dtype()
        )));
    }

    if view.shape() != shape {
        return Err(RestoreErr::Incompatible(format!(
            "tensor {name} has shape {:?}, expected {shape:?}",
            view.shape()
        )));
    }

    Ok(view
        .data()
        .chunks_exact(size_of::<f32>())
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn pointer(dir: &Path, id: &str) -> CheckpointPointer {
        CheckpointPointer {
            id: id.to_string(),
            path: dir.join(id),
        }
    }

    fn trained() -> LinearPolicy {
        LinearPolicy::from_params(
            array![[1.0, -1.0], [0.5, 0.0]],
            array![0.0, 0.25],
            array![2.0, -1.0],
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn zero_policy_is_uniform() {
        let policy = LinearPolicy::new(3, 4);
        let out = policy.infer(Array2::ones((2, 3)).view()).unwrap();

        assert_eq!(out.values, array![0.0, 0.0]);
        assert!(out.probs.iter().all(|&p| (p - 0.25).abs() < 1e-6));
    }

    #[test]
    fn rows_are_distributions() {
        let out = trained().infer(array![[1.0, 2.0], [-3.0, 0.5]].view()).unwrap();

        for row in out.probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert_eq!(out.values, array![0.5, -6.0]);
    }

    #[test]
    fn wrong_observation_size_is_an_error() {
        let err = trained().infer(Array2::zeros((1, 3)).view()).unwrap_err();
        assert!(matches!(err, ActorErr::ShapeMismatch { got: 3, expected: 2, .. }));
    }

    #[test]
    fn saved_parameters_are_restored() {
        let dir = tempfile::tempdir().unwrap();
        trained().save(dir.path(), "150").unwrap();

        let mut policy = LinearPolicy::new(2, 2);
        policy.restore(&pointer(dir.path(), "150")).unwrap();
        assert_eq!(policy, trained());
    }

    #[test]
    fn missing_or_truncated_artifact_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let mut policy = LinearPolicy::new(2, 2);

        let err = policy.restore(&pointer(dir.path(), "7")).unwrap_err();
        assert!(matches!(err, RestoreErr::Incomplete(_)));

        let bytes = trained().to_bytes().unwrap();
        fs::write(LinearPolicy::artifact_path(dir.path(), "7"), &bytes[..bytes.len() / 2]).unwrap();

        let err = policy.restore(&pointer(dir.path(), "7")).unwrap_err();
        assert!(matches!(err, RestoreErr::Incomplete(_)));
        assert_eq!(policy, LinearPolicy::new(2, 2));
    }

    #[test]
    fn other_shapes_are_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        LinearPolicy::new(3, 2).save(dir.path(), "9").unwrap();

        let mut policy = LinearPolicy::new(2, 2);
        let err = policy.restore(&pointer(dir.path(), "9")).unwrap_err();
        assert!(matches!(err, RestoreErr::Incompatible(_)));
    }
}
