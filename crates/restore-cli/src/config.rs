//! TOML config loading for the restoration CLI.
//!
//! Deserializes a config with top-level experiment fields plus `[train]`,
//! `[path]`, `[sde]`, and `[model]` sections.

use std::path::Path;

use denoising::options::{Options, PathOptions, TrainOptions};
use diffusion::IrSdeConfig;
use serde::Deserialize;

use denoising::model::NoiseEstimatorConfig;

/// Top-level structure matching the experiment config file.
#[derive(Debug, Deserialize)]
pub struct RestoreToml {
    /// Experiment name.
    #[serde(default)]
    pub name: String,
    /// Whether several data-parallel replicas run this config.
    #[serde(default)]
    pub distributed: bool,
    /// Optimizer/loss/lr-schedule hyperparameters.
    pub train: TrainOptions,
    /// Checkpoint paths.
    #[serde(default)]
    pub path: PathOptions,
    /// Mean-reverting SDE parameters.
    pub sde: IrSdeConfig,
    /// Noise estimator architecture.
    pub model: NoiseEstimatorConfig,
}

impl RestoreToml {
    /// The wrapper-facing slice of the config.
    pub fn options(&self) -> Options {
        Options {
            name: self.name.clone(),
            distributed: self.distributed,
            train: self.train.clone(),
            path: self.path.clone(),
        }
    }
}

/// Load and deserialize a `RestoreToml` from a TOML file.
pub fn load_restore_toml(path: &Path) -> anyhow::Result<RestoreToml> {
    let contents = std::fs::read_to_string(path)?;
    let config: RestoreToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded restoration config");
    Ok(config)
}
