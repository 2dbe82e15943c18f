//! Learning-rate schedules with restart support.
//!
//! Both schemes are pure functions of the global step: the lr at any step is
//! reproducible without replaying the schedule, which keeps resumed runs
//! exact.

use anyhow::bail;

use crate::options::TrainOptions;

/// A learning-rate schedule selected at construction from the config's
/// `lr_scheme` string.
#[derive(Debug, Clone)]
pub enum LrSchedule {
    /// Piecewise-constant lr, decayed by `gamma` at each milestone; each
    /// restart returns to `base_lr × weight` and restarts milestone counting.
    MultiStepRestart {
        milestones: Vec<usize>,
        gamma: f64,
        restarts: Vec<usize>,
        restart_weights: Vec<f64>,
    },
    /// Cosine annealing from `base_lr × weight` down to `eta_min` over each
    /// period; the last period's floor holds afterwards.
    CosineRestart {
        periods: Vec<usize>,
        restart_weights: Vec<f64>,
        eta_min: f64,
    },
}

impl LrSchedule {
    /// Build the schedule named by `lr_scheme`. Any other name fails here,
    /// before an optimizer step is possible.
    pub fn from_options(train: &TrainOptions) -> anyhow::Result<Self> {
        match train.lr_scheme.as_str() {
            "MultiStepLR" => {
                if !train.restarts.is_empty()
                    && train.restarts.len() != train.restart_weights.len()
                {
                    bail!(
                        "restarts ({}) and restart_weights ({}) must have equal length",
                        train.restarts.len(),
                        train.restart_weights.len()
                    );
                }
                Ok(Self::MultiStepRestart {
                    milestones: train.lr_steps.clone(),
                    gamma: train.lr_gamma,
                    restarts: train.restarts.clone(),
                    restart_weights: train.restart_weights.clone(),
                })
            }
            "CosineAnnealingLR_Restart" => {
                if train.t_period.is_empty() {
                    bail!("CosineAnnealingLR_Restart requires a non-empty t_period");
                }
                if !train.restart_weights.is_empty()
                    && train.restart_weights.len() != train.t_period.len()
                {
                    bail!(
                        "t_period ({}) and restart_weights ({}) must have equal length",
                        train.t_period.len(),
                        train.restart_weights.len()
                    );
                }
                Ok(Self::CosineRestart {
                    periods: train.t_period.clone(),
                    restart_weights: train.restart_weights.clone(),
                    eta_min: train.eta_min,
                })
            }
            other => bail!("learning rate scheme '{other}' is not implemented"),
        }
    }

    /// Learning rate at the given global step.
    pub fn lr(&self, base_lr: f64, step: usize) -> f64 {
        match self {
            Self::MultiStepRestart {
                milestones,
                gamma,
                restarts,
                restart_weights,
            } => {
                // Index of the segment this step falls in (0 = before any restart).
                let segment = restarts.iter().filter(|&&r| r <= step).count();
                let (segment_start, weight) = if segment == 0 {
                    (0, 1.0)
                } else {
                    (restarts[segment - 1], restart_weights[segment - 1])
                };
                let decays = milestones
                    .iter()
                    .filter(|&&m| m > segment_start && m <= step)
                    .count();
                base_lr * weight * gamma.powi(decays as i32)
            }
            Self::CosineRestart {
                periods,
                restart_weights,
                eta_min,
            } => {
                let mut start = 0;
                let mut index = periods.len() - 1;
                let mut position = periods[index]; // floor once past the end
                for (i, &period) in periods.iter().enumerate() {
                    if step < start + period {
                        index = i;
                        position = step - start;
                        break;
                    }
                    start += period;
                }
                let weight = restart_weights.get(index).copied().unwrap_or(1.0);
                let phase = std::f64::consts::PI * position as f64 / periods[index] as f64;
                eta_min + (base_lr * weight - eta_min) * 0.5 * (1.0 + phase.cos())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train_options(scheme: &str) -> TrainOptions {
        TrainOptions {
            lr: 1e-4,
            weight_decay: 0.0,
            beta1: 0.9,
            beta2: 0.999,
            max_grad_norm: None,
            loss_type: crate::training::loss::LossKind::L1,
            is_weighted: false,
            weight: 1.0,
            lr_scheme: scheme.to_string(),
            lr_steps: vec![],
            lr_gamma: 0.5,
            restarts: vec![],
            restart_weights: vec![],
            t_period: vec![],
            eta_min: 0.0,
        }
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let options = train_options("ReduceLROnPlateau");
        let err = LrSchedule::from_options(&options).unwrap_err();
        assert!(
            err.to_string().contains("not implemented"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_multistep_decays_at_milestones() {
        let mut options = train_options("MultiStepLR");
        options.lr_steps = vec![100, 200];
        let schedule = LrSchedule::from_options(&options).unwrap();

        let base = 1e-4;
        assert!((schedule.lr(base, 0) - base).abs() < 1e-12);
        assert!((schedule.lr(base, 99) - base).abs() < 1e-12);
        assert!((schedule.lr(base, 100) - base * 0.5).abs() < 1e-12);
        assert!((schedule.lr(base, 199) - base * 0.5).abs() < 1e-12);
        assert!((schedule.lr(base, 200) - base * 0.25).abs() < 1e-12);
        assert!((schedule.lr(base, 10_000) - base * 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_multistep_restart_resets_decay() {
        let mut options = train_options("MultiStepLR");
        options.lr_steps = vec![100, 400];
        options.restarts = vec![300];
        options.restart_weights = vec![0.5];
        let schedule = LrSchedule::from_options(&options).unwrap();

        let base = 1e-4;
        // Decayed once before the restart.
        assert!((schedule.lr(base, 299) - base * 0.5).abs() < 1e-12);
        // Restart: back to base × weight, milestone 100 no longer counts.
        assert!((schedule.lr(base, 300) - base * 0.5).abs() < 1e-12);
        assert!((schedule.lr(base, 399) - base * 0.5).abs() < 1e-12);
        // Milestone 400 lies inside the new segment and decays again.
        assert!((schedule.lr(base, 400) - base * 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_multistep_mismatched_restart_weights() {
        let mut options = train_options("MultiStepLR");
        options.restarts = vec![100, 200];
        options.restart_weights = vec![1.0];
        assert!(LrSchedule::from_options(&options).is_err());
    }

    #[test]
    fn test_cosine_period_boundaries() {
        let mut options = train_options("CosineAnnealingLR_Restart");
        options.t_period = vec![100, 200];
        options.restart_weights = vec![1.0, 0.5];
        options.eta_min = 1e-7;
        let schedule = LrSchedule::from_options(&options).unwrap();

        let base = 1e-4;
        // Start of first period: full lr.
        assert!((schedule.lr(base, 0) - base).abs() < 1e-12);
        // Midpoint of first period: halfway to eta_min.
        let mid = 1e-7 + (base - 1e-7) * 0.5;
        assert!((schedule.lr(base, 50) - mid).abs() < 1e-10);
        // Restart into second period at its weighted peak.
        assert!((schedule.lr(base, 100) - base * 0.5).abs() < 1e-10);
        // End of the final period floors at eta_min and stays there.
        assert!((schedule.lr(base, 300) - 1e-7).abs() < 1e-10);
        assert!((schedule.lr(base, 1000) - 1e-7).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_requires_period() {
        let options = train_options("CosineAnnealingLR_Restart");
        assert!(LrSchedule::from_options(&options).is_err());
    }
}
