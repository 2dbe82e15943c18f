//! Mock SDE for testing wrappers without any diffusion math.

use std::cell::Cell;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::sde::{NoisePredictor, ReverseOutput, Sde};

/// Identity-behaving SDE that records which reverse sampler was invoked.
///
/// Every tensor operation passes its input through unchanged, so tests can
/// assert on dispatch and data flow without caring about numerics.
pub struct RecordingSde<B: AutodiffBackend> {
    mu: Option<Tensor<B, 4>>,
    sde_calls: Cell<usize>,
    ode_calls: Cell<usize>,
}

impl<B: AutodiffBackend> Default for RecordingSde<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> RecordingSde<B> {
    pub fn new() -> Self {
        Self {
            mu: None,
            sde_calls: Cell::new(0),
            ode_calls: Cell::new(0),
        }
    }

    /// How many times `reverse_sde` was invoked.
    pub fn sde_calls(&self) -> usize {
        self.sde_calls.get()
    }

    /// How many times `reverse_ode` was invoked.
    pub fn ode_calls(&self) -> usize {
        self.ode_calls.get()
    }

    /// The conditioning mean most recently pinned with `set_mu`, if any.
    pub fn mu(&self) -> Option<Tensor<B, 4>> {
        self.mu.clone()
    }
}

impl<B: AutodiffBackend> Sde<B> for RecordingSde<B> {
    fn set_mu(&mut self, mu: Tensor<B, 4>) {
        self.mu = Some(mu);
    }

    fn noise_fn<N: NoisePredictor<B>>(
        &self,
        _net: &N,
        state: Tensor<B, 4>,
        _timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        state.zeros_like()
    }

    fn score_from_noise(
        &self,
        noise: Tensor<B, 4>,
        _timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        noise
    }

    fn reverse_sde_step_mean(
        &self,
        state: Tensor<B, 4>,
        _score: Tensor<B, 4>,
        _timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        state
    }

    fn reverse_optimum_step(
        &self,
        _state: Tensor<B, 4>,
        state_0: Tensor<B, 4>,
        _timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        state_0
    }

    fn reverse_sde<N: NoisePredictor<B::InnerBackend>>(
        &self,
        _net: &N,
        state: Tensor<B::InnerBackend, 4>,
        _save_states: bool,
    ) -> ReverseOutput<B::InnerBackend> {
        self.sde_calls.set(self.sde_calls.get() + 1);
        ReverseOutput {
            output: state,
            states: Vec::new(),
        }
    }

    fn reverse_ode<N: NoisePredictor<B::InnerBackend>>(
        &self,
        _net: &N,
        state: Tensor<B::InnerBackend, 4>,
        _save_states: bool,
    ) -> ReverseOutput<B::InnerBackend> {
        self.ode_calls.set(self.ode_calls.get() + 1);
        ReverseOutput {
            output: state,
            states: Vec::new(),
        }
    }
}
