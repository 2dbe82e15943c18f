//! Noise-estimation networks. The wrapper treats them as opaque
//! `NoisePredictor` modules; anything implementing that trait plugs in.

pub mod estimator;

pub use estimator::{NoiseEstimator, NoiseEstimatorConfig};
