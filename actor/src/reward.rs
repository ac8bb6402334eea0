use serde::{Deserialize, Serialize};

/// How raw environment rewards are rescaled before being stored in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RewardRescale {
    None,
    Clip { min: f32, max: f32 },
    Sign,
}

impl Default for RewardRescale {
    fn default() -> Self {
        Self::Clip {
            min: -1.0,
            max: 1.0,
        }
    }
}

impl RewardRescale {
    pub fn apply(&self, reward: f32) -> f32 {
        match *self {
            RewardRescale::None => reward,
            RewardRescale::Clip { min, max } => reward.clamp(min, max),
            RewardRescale::Sign if reward == 0.0 => 0.0,
            RewardRescale::Sign => reward.signum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_clips_to_unit_range() {
        let rescale = RewardRescale::default();
        assert_eq!(rescale.apply(5.0), 1.0);
        assert_eq!(rescale.apply(-3.0), -1.0);
        assert_eq!(rescale.apply(0.25), 0.25);
    }

    #[test]
    fn sign_keeps_zero() {
        assert_eq!(RewardRescale::Sign.apply(0.0), 0.0);
        assert_eq!(RewardRescale::Sign.apply(-0.1), -1.0);
        assert_eq!(RewardRescale::Sign.apply(7.0), 1.0);
    }

    #[test]
    fn deserializes_tagged() {
        let rescale: RewardRescale =
            serde_json::from_str(r#"{"kind":"clip","min":-2.0,"max":2.0}"#).unwrap();
        assert_eq!(rescale, RewardRescale::Clip { min: -2.0, max: 2.0 });
    }
}
