use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

/// Slack subtracted from every probability before sampling, the float32
/// distance from `1.0` to the next smaller number.
pub const EPSNEG: f32 = f32::EPSILON / 2.0;

/// Draws one action index from a categorical distribution.
///
/// Every probability is shrunk by [`EPSNEG`] (clamped at zero, `NaN` counts as
/// zero) so rounding that makes the distribution sum slightly above one can't
/// push the draw past the last bucket. If the draw still falls through, the
/// most likely action is returned.
pub fn sample_action<R: Rng>(rng: &mut R, probs: ArrayView1<'_, f32>) -> usize {
    let guarded = |p: f32| if p.is_nan() { 0.0 } else { (p - EPSNEG).max(0.0) };

    let total: f32 = probs.iter().copied().map(guarded).sum();
    if total <= 0.0 {
        return argmax(probs);
    }

    let target = rng.random::<f32>() * total;
    let mut acc = 0.0;

    for (action, &p) in probs.iter().enumerate() {
        acc += guarded(p);
        if target < acc {
            return action;
        }
    }

    argmax(probs)
}

/// Samples one action per row of `probs`, independently per worker.
///
/// # Returns
/// The action indices and their one hot encoding, shaped like `probs`.
pub fn sample_actions<R: Rng>(
    rng: &mut R,
    probs: ArrayView2<'_, f32>,
) -> (Vec<usize>, Array2<f32>) {
    let mut one_hot = Array2::zeros(probs.raw_dim());

    let actions = probs
        .rows()
        .into_iter()
        .zip(one_hot.rows_mut())
        .map(|(row, mut hot)| {
            let action = sample_action(rng, row);
            hot[action] = 1.0;
            action
        })
        .collect();

    (actions, one_hot)
}

fn argmax(probs: ArrayView1<'_, f32>) -> usize {
    probs
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .reduce(|best, cur| if cur.1 > best.1 { cur } else { best })
        .map(|(i, _)| i)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, array};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn overshooting_distribution_still_samples() {
        let mut rng = StdRng::seed_from_u64(1);
        let probs = Array1::from_elem(3, 1.0 / 3.0 + 1e-7);

        for _ in 0..1_000 {
            assert!(sample_action(&mut rng, probs.view()) < 3);
        }
    }

    #[test]
    fn certain_action_is_always_picked() {
        let mut rng = StdRng::seed_from_u64(2);
        let probs = array![0.0, 1.0, 0.0];

        for _ in 0..100 {
            assert_eq!(sample_action(&mut rng, probs.view()), 1);
        }
    }

    #[test]
    fn degenerate_rows_fall_back_to_argmax() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(sample_action(&mut rng, array![0.0, 0.0].view()), 0);
        assert_eq!(sample_action(&mut rng, array![f32::NAN, 1e-9].view()), 1);
    }

    #[test]
    fn frequencies_follow_the_distribution() {
        let mut rng = StdRng::seed_from_u64(4);
        let probs = array![0.2, 0.8];

        let ones = (0..10_000)
            .filter(|_| sample_action(&mut rng, probs.view()) == 1)
            .count();
        assert!((7_500..8_500).contains(&ones), "got {ones}");
    }

    #[test]
    fn one_hot_rows_match_indices() {
        let mut rng = StdRng::seed_from_u64(5);
        let probs = array![[1.0, 0.0], [0.0, 1.0], [0.5, 0.5]];

        let (actions, one_hot) = sample_actions(&mut rng, probs.view());

        assert_eq!(actions[..2], [0, 1]);
        for (w, &a) in actions.iter().enumerate() {
            assert_eq!(one_hot.row(w).sum(), 1.0);
            assert_eq!(one_hot[[w, a]], 1.0);
        }
    }
}
