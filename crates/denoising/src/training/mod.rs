//! Training pipeline: matching loss, learning-rate schedules, and the
//! feed/optimize/restore wrapper around the noise estimator.

pub mod loss;
pub mod lr_schedule;
pub mod trainer;

pub use trainer::{adamw_from_options, DenoisingModel, Visuals};
