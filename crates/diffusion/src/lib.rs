//! Mean-reverting SDE diffusion for conditional image restoration.
//!
//! Models degradation as a forward Ornstein–Uhlenbeck process that drifts a
//! clean image toward its degraded counterpart while injecting noise, and
//! recovers the clean image by sampling the reverse-time SDE (or its
//! probability-flow ODE) with a learned noise estimate. The network itself is
//! supplied by the caller through the [`NoisePredictor`] seam, so this crate
//! owns no trainable parameters.

pub mod ir_sde;
pub mod mocks;
pub mod sde;

pub use ir_sde::{IrSde, IrSdeConfig, ThetaSchedule};
pub use sde::{NoisePredictor, ReverseOutput, Sde};
