//! Training/inference wrapper for SDE-based image restoration.
//!
//! Owns the noise-estimation network, its AdamW optimizer, and the current
//! step's tensors; computes the score-matching loss against the SDE supplied
//! by the caller and runs reverse-time sampling at inference. The diffusion
//! math itself lives in the `diffusion` crate behind the `Sde` trait.

pub mod model;
pub mod options;
pub mod training;
