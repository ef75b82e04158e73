//! Learning-rate policies derived from hyperparameters

use serde::{Deserialize, Serialize};

/// Learning-rate policy applied per optimizer step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LrSchedule {
    /// Fixed learning rate
    Constant { lr: f32 },
    /// Staircase exponential decay: the rate is multiplied by `decay_rate`
    /// at every integer multiple of `decay_steps`
    ExponentialDecay { initial: f32, decay_rate: f32, decay_steps: usize },
}

impl LrSchedule {
    /// Learning rate at the given global step
    pub fn lr_at(&self, global_step: usize) -> f32 {
        match *self {
            LrSchedule::Constant { lr } => lr,
            LrSchedule::ExponentialDecay { initial, decay_rate, decay_steps } => {
                let exponent = (global_step / decay_steps) as i32;
                initial * decay_rate.powi(exponent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_constant() {
        let schedule = LrSchedule::Constant { lr: 0.01 };
        assert_relative_eq!(schedule.lr_at(0), 0.01);
        assert_relative_eq!(schedule.lr_at(1_000_000), 0.01);
    }

    #[test]
    fn test_staircase_decay() {
        let schedule =
            LrSchedule::ExponentialDecay { initial: 0.1, decay_rate: 0.5, decay_steps: 100 };
        assert_relative_eq!(schedule.lr_at(0), 0.1);
        assert_relative_eq!(schedule.lr_at(99), 0.1);
        assert_relative_eq!(schedule.lr_at(100), 0.05);
        assert_relative_eq!(schedule.lr_at(199), 0.05);
        assert_relative_eq!(schedule.lr_at(200), 0.025);
    }
}
