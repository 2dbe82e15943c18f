//! Trait seams between the SDE, the noise-estimation network, and the
//! training wrapper.
//!
//! Training-side operations run on the autodiff backend so gradients flow
//! from the loss back into the network. The full reverse-time samplers are
//! typed on `B::InnerBackend`: inference goes through the valid (non-autodiff)
//! view of the model and cannot accumulate a gradient tape by construction.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Conditional noise estimator.
///
/// Predicts the noise component of a noisy state at the given per-sample
/// diffusion timesteps, conditioned on the degraded observation `mu` that the
/// forward process reverts toward.
pub trait NoisePredictor<B: Backend> {
    /// # Arguments
    /// - `state`: noisy sample, shape `(batch, channel, height, width)`
    /// - `mu`: conditioning signal, same shape as `state`
    /// - `timesteps`: per-sample timestep indices, shape `(batch,)`
    ///
    /// Returns the estimated noise, same shape as `state`.
    fn predict(
        &self,
        state: Tensor<B, 4>,
        mu: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4>;
}

/// Result of a full reverse-time pass.
pub struct ReverseOutput<B: Backend> {
    /// The denoised sample after the final reverse step.
    pub output: Tensor<B, 4>,
    /// Intermediate states, oldest first. Empty unless the caller asked for
    /// them to be saved.
    pub states: Vec<Tensor<B, 4>>,
}

/// A forward noising process and its reverse-time samplers.
///
/// The conditioning mean must be pinned with [`Sde::set_mu`] before any other
/// operation; the per-step methods do not guard against a missing mean, that
/// is the caller's contract.
pub trait Sde<B: AutodiffBackend> {
    /// Pin the terminal mean of the forward process to the conditioning
    /// signal for the current batch.
    fn set_mu(&mut self, mu: Tensor<B, 4>);

    /// The network's noise estimate for `state` at the given timesteps.
    fn noise_fn<N: NoisePredictor<B>>(
        &self,
        net: &N,
        state: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4>;

    /// Convert a noise estimate into a score (gradient of log-density).
    fn score_from_noise(&self, noise: Tensor<B, 4>, timesteps: Tensor<B, 1, Int>)
        -> Tensor<B, 4>;

    /// Mean of one discretized reverse-SDE step from `state` under `score`.
    fn reverse_sde_step_mean(
        &self,
        state: Tensor<B, 4>,
        score: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4>;

    /// The analytically optimal reverse step: the posterior mean of the
    /// previous state given the current state and the ground truth `state_0`.
    fn reverse_optimum_step(
        &self,
        state: Tensor<B, 4>,
        state_0: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4>;

    /// Sample the full reverse-time SDE from `state` down to the clean
    /// estimate, injecting noise at every step but the last.
    fn reverse_sde<N: NoisePredictor<B::InnerBackend>>(
        &self,
        net: &N,
        state: Tensor<B::InnerBackend, 4>,
        save_states: bool,
    ) -> ReverseOutput<B::InnerBackend>;

    /// Integrate the deterministic probability-flow ODE from `state` down to
    /// the clean estimate.
    fn reverse_ode<N: NoisePredictor<B::InnerBackend>>(
        &self,
        net: &N,
        state: Tensor<B::InnerBackend, 4>,
        save_states: bool,
    ) -> ReverseOutput<B::InnerBackend>;
}
