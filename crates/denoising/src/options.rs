//! Option structs for the restoration wrapper.
//!
//! Deserialized from the `[train]` and `[path]` sections of a TOML config by
//! the CLI, or built directly by tests. Scheme-specific learning-rate fields
//! live flat in `[train]`; only the fields of the selected `lr_scheme` are
//! consulted.

use std::path::PathBuf;

use serde::Deserialize;

use crate::training::loss::LossKind;

/// Top-level options consumed by the wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// Experiment name, used in log lines only.
    #[serde(default)]
    pub name: String,
    /// Whether the caller runs several data-parallel replicas. Consumed for
    /// logging only; batch sharding belongs to the tensor backend.
    #[serde(default)]
    pub distributed: bool,
    /// Training hyperparameters.
    pub train: TrainOptions,
    /// Checkpoint paths.
    #[serde(default)]
    pub path: PathOptions,
}

/// Optimizer, loss, and learning-rate-schedule hyperparameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainOptions {
    /// Base learning rate.
    pub lr: f64,
    /// AdamW weight decay.
    #[serde(default)]
    pub weight_decay: f64,
    /// Adam β₁.
    #[serde(default = "default_beta1")]
    pub beta1: f32,
    /// Adam β₂.
    #[serde(default = "default_beta2")]
    pub beta2: f32,
    /// Maximum gradient norm; `None` disables clipping.
    #[serde(default)]
    pub max_grad_norm: Option<f64>,
    /// Elementwise matching loss flavor.
    #[serde(default = "default_loss_type")]
    pub loss_type: LossKind,
    /// Whether the matching loss accepts per-sample weights.
    #[serde(default)]
    pub is_weighted: bool,
    /// Scalar multiplier applied to the matching loss.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Learning-rate scheme name: `MultiStepLR` or `CosineAnnealingLR_Restart`.
    pub lr_scheme: String,
    /// MultiStepLR: milestone steps at which the lr decays by `lr_gamma`.
    #[serde(default)]
    pub lr_steps: Vec<usize>,
    /// MultiStepLR: decay factor per milestone.
    #[serde(default = "default_gamma")]
    pub lr_gamma: f64,
    /// MultiStepLR: steps at which the schedule restarts.
    #[serde(default)]
    pub restarts: Vec<usize>,
    /// Per-restart (MultiStepLR) or per-period (cosine) lr weights.
    #[serde(default)]
    pub restart_weights: Vec<f64>,
    /// Cosine: period lengths in steps.
    #[serde(default)]
    pub t_period: Vec<usize>,
    /// Cosine: floor learning rate.
    #[serde(default)]
    pub eta_min: f64,
}

/// Checkpoint locations and load behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct PathOptions {
    /// Pretrained model to restore on `load()`. `None` skips loading.
    #[serde(default)]
    pub pretrain_model: Option<PathBuf>,
    /// When false, a failed pretrained-model load logs a warning instead of
    /// erroring.
    #[serde(default = "default_true")]
    pub strict_load: bool,
    /// Directory `save(label)` writes into.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            pretrain_model: None,
            strict_load: true,
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_loss_type() -> LossKind {
    LossKind::L1
}

fn default_weight() -> f64 {
    1.0
}

fn default_gamma() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_options() {
        let toml_str = r#"
name = "derain"
distributed = false

[train]
lr = 1e-4
weight_decay = 1e-5
beta1 = 0.9
beta2 = 0.99
loss_type = "l2"
is_weighted = true
weight = 2.0
lr_scheme = "MultiStepLR"
lr_steps = [200000, 400000]
lr_gamma = 0.5
restarts = [250000]
restart_weights = [1.0]

[path]
pretrain_model = "experiments/derain/5000_denoiser"
strict_load = false
checkpoint_dir = "experiments/derain"
"#;
        let options: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(options.name, "derain");
        assert!(!options.distributed);
        assert!((options.train.lr - 1e-4).abs() < 1e-12);
        assert_eq!(options.train.loss_type, LossKind::L2);
        assert!(options.train.is_weighted);
        assert_eq!(options.train.lr_steps, vec![200_000, 400_000]);
        assert!(!options.path.strict_load);
        assert_eq!(
            options.path.pretrain_model.as_deref(),
            Some(std::path::Path::new("experiments/derain/5000_denoiser"))
        );
    }

    #[test]
    fn test_deserialize_minimal_options_uses_defaults() {
        let toml_str = r#"
[train]
lr = 2e-4
lr_scheme = "CosineAnnealingLR_Restart"
t_period = [250000, 250000]
"#;
        let options: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(options.name, "");
        assert!((options.train.beta1 - 0.9).abs() < 1e-6);
        assert!((options.train.beta2 - 0.999).abs() < 1e-6);
        assert_eq!(options.train.loss_type, LossKind::L1);
        assert!(!options.train.is_weighted);
        assert!((options.train.weight - 1.0).abs() < 1e-12);
        assert!(options.train.max_grad_norm.is_none());
        assert!(options.path.pretrain_model.is_none());
        assert!(options.path.strict_load);
        assert_eq!(options.path.checkpoint_dir, PathBuf::from("checkpoints"));
    }
}
