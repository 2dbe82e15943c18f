//! Mean-reverting SDE with precomputed discretization tables.
//!
//! Forward process: `dx = θ_t (μ − x) dt + σ_t dW` with `σ_t² = 2 θ_t λ²`,
//! so the marginal at step `t` is
//! `x_t ~ N(μ + (x_0 − μ) e^{−θ̄_t}, λ² (1 − e^{−2 θ̄_t}))`
//! where `θ̄_t` is the cumulative integral of θ up to `t`. The process starts
//! at the clean image `x_0` and reverts toward the degraded observation `μ`,
//! reaching its stationary distribution `N(μ, λ²)` as `θ̄_t` grows.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Distribution, TensorData};
use rand::Rng;

use crate::sde::{NoisePredictor, ReverseOutput, Sde};

/// How θ ramps up over the diffusion steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ThetaSchedule {
    /// θ grows linearly with the step index.
    Linear,
    /// θ follows a raised-cosine ramp (slow start, slow finish).
    Cosine,
}

/// Configuration for the mean-reverting SDE.
#[derive(Config, Debug)]
pub struct IrSdeConfig {
    /// Stationary standard deviation λ of the forward process.
    #[config(default = 10.0)]
    pub max_sigma: f64,
    /// Number of discretization steps T.
    #[config(default = 100)]
    pub steps: usize,
    /// Shape of the θ ramp.
    #[config(default = "ThetaSchedule::Cosine")]
    pub schedule: ThetaSchedule,
    /// Target value of `θ̄_T`. Controls how completely the mean reverts to μ
    /// by the final step: the residual of `x_0` in `x_T` is `e^{−θ̄_T}`.
    #[config(default = 9.21)]
    pub terminal_decay: f64,
}

impl IrSdeConfig {
    /// Build the SDE, precomputing all per-step tables on `device`.
    pub fn init<B: AutodiffBackend>(&self, device: &B::Device) -> IrSde<B> {
        let t = self.steps;
        assert!(t > 0, "step count must be > 0");
        let dt = 1.0 / t as f64;

        // Raw ramp, normalized so the cumulative integral hits terminal_decay.
        let raw: Vec<f64> = (1..=t)
            .map(|i| match self.schedule {
                ThetaSchedule::Linear => i as f64 / t as f64,
                ThetaSchedule::Cosine => {
                    0.5 * (1.0 - (std::f64::consts::PI * i as f64 / t as f64).cos())
                }
            })
            .collect();
        let integral: f64 = raw.iter().map(|w| w * dt).sum();
        let scale = self.terminal_decay / integral;

        let mut thetas = vec![0.0];
        thetas.extend(raw.iter().map(|w| w * scale));

        let mut theta_cum = vec![0.0; t + 1];
        for i in 1..=t {
            theta_cum[i] = theta_cum[i - 1] + thetas[i] * dt;
        }

        let lambda2 = self.max_sigma * self.max_sigma;
        let sigma_sq: Vec<f64> = thetas.iter().map(|th| 2.0 * th * lambda2).collect();
        let exp_dt: Vec<f64> = thetas.iter().map(|th| (-th * dt).exp()).collect();
        let exp_cum: Vec<f64> = theta_cum.iter().map(|tc| (-tc).exp()).collect();
        let one_minus_e2cum: Vec<f64> =
            theta_cum.iter().map(|tc| 1.0 - (-2.0 * tc).exp()).collect();
        let sigma_bar: Vec<f64> = one_minus_e2cum
            .iter()
            .map(|v| self.max_sigma * v.sqrt())
            .collect();

        let table = |values: &[f64]| {
            let floats: Vec<f32> = values.iter().map(|v| *v as f32).collect();
            let len = floats.len();
            Tensor::<B, 1>::from_data(TensorData::new(floats, [len]), device)
        };

        tracing::debug!(
            steps = t,
            max_sigma = self.max_sigma,
            schedule = ?self.schedule,
            "initialized mean-reverting SDE"
        );

        IrSde {
            steps: t,
            dt,
            t_thetas: table(&thetas),
            t_sigma_sq: table(&sigma_sq),
            t_sigma_bar: table(&sigma_bar),
            t_exp_dt: table(&exp_dt),
            t_exp_cum: table(&exp_cum),
            t_one_minus_e2cum: table(&one_minus_e2cum),
            thetas,
            sigma_sq,
            sigma_bar,
            exp_cum,
            mu: None,
        }
    }
}

/// Mean-reverting SDE over 4D image batches.
///
/// Index 0 of every table is the clean state (θ̄_0 = 0); valid diffusion
/// timesteps are `1..=steps`.
pub struct IrSde<B: AutodiffBackend> {
    steps: usize,
    dt: f64,
    // Device tables for per-sample gathers on the training path.
    t_thetas: Tensor<B, 1>,
    t_sigma_sq: Tensor<B, 1>,
    t_sigma_bar: Tensor<B, 1>,
    t_exp_dt: Tensor<B, 1>,
    t_exp_cum: Tensor<B, 1>,
    t_one_minus_e2cum: Tensor<B, 1>,
    // Host copies for scalar-coefficient sampling loops.
    thetas: Vec<f64>,
    sigma_sq: Vec<f64>,
    sigma_bar: Vec<f64>,
    exp_cum: Vec<f64>,
    mu: Option<Tensor<B, 4>>,
}

impl<B: AutodiffBackend> IrSde<B> {
    /// Number of discretization steps T.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Marginal standard deviation `σ̄_t` of the forward process at step `t`.
    pub fn marginal_std(&self, t: usize) -> f64 {
        self.sigma_bar[t]
    }

    fn mu(&self) -> Tensor<B, 4> {
        self.mu
            .clone()
            .expect("conditioning mean not set: call set_mu first")
    }

    /// Gather per-sample coefficients from a table, shaped for broadcasting
    /// over `(batch, channel, height, width)`.
    fn gather(&self, table: &Tensor<B, 1>, timesteps: Tensor<B, 1, Int>) -> Tensor<B, 4> {
        let coeffs = table.clone().select(0, timesteps);
        let [batch] = coeffs.dims();
        coeffs.reshape([batch, 1, 1, 1])
    }

    /// Diffuse the clean state `x_0` to the given per-sample timesteps by
    /// sampling the forward marginal directly.
    pub fn noise_state(&self, x0: Tensor<B, 4>, timesteps: Tensor<B, 1, Int>) -> Tensor<B, 4> {
        let mu = self.mu();
        let decay = self.gather(&self.t_exp_cum, timesteps.clone());
        let std = self.gather(&self.t_sigma_bar, timesteps);
        let eps = Tensor::random(x0.dims(), Distribution::Normal(0.0, 1.0), &x0.device());
        mu.clone() + (x0 - mu) * decay + eps * std
    }

    /// Diffuse the clean state to a single scalar timestep `t`.
    pub fn noise_state_at(&self, x0: Tensor<B, 4>, t: usize) -> Tensor<B, 4> {
        let mu = self.mu();
        let eps = Tensor::random(x0.dims(), Distribution::Normal(0.0, 1.0), &x0.device());
        mu.clone() + (x0 - mu).mul_scalar(self.exp_cum[t]) + eps.mul_scalar(self.sigma_bar[t])
    }

    /// Draw uniform random timesteps in `1..=steps` for a training batch and
    /// diffuse `x0` to them. Sets the conditioning mean to `mu` as a side
    /// effect, exactly as a training loop feeds the wrapper afterwards.
    pub fn generate_random_states(
        &mut self,
        x0: Tensor<B, 4>,
        mu: Tensor<B, 4>,
        rng: &mut impl Rng,
    ) -> (Tensor<B, 1, Int>, Tensor<B, 4>) {
        self.set_mu(mu);
        let [batch, _, _, _] = x0.dims();
        let ts: Vec<i32> = (0..batch)
            .map(|_| rng.gen_range(1..=self.steps) as i32)
            .collect();
        let timesteps = Tensor::<B, 1, Int>::from_data(
            TensorData::new(ts, [batch]),
            &x0.device(),
        );
        let state = self.noise_state(x0, timesteps.clone());
        (timesteps, state)
    }

    /// One reverse step shared by both samplers. `ode` halves the diffusion
    /// term and is integrated without noise by the caller.
    fn reverse_step_mean_scalar(
        &self,
        x: Tensor<B::InnerBackend, 4>,
        mu: Tensor<B::InnerBackend, 4>,
        score: Tensor<B::InnerBackend, 4>,
        t: usize,
        ode: bool,
    ) -> Tensor<B::InnerBackend, 4> {
        let diffusion = if ode {
            0.5 * self.sigma_sq[t]
        } else {
            self.sigma_sq[t]
        };
        let drift = (mu - x.clone()).mul_scalar(self.thetas[t]);
        x - (drift - score.mul_scalar(diffusion)).mul_scalar(self.dt)
    }

    fn reverse_loop<N: NoisePredictor<B::InnerBackend>>(
        &self,
        net: &N,
        state: Tensor<B::InnerBackend, 4>,
        save_states: bool,
        ode: bool,
    ) -> ReverseOutput<B::InnerBackend> {
        let mu = self.mu().inner();
        let device = state.device();
        let [batch, _, _, _] = state.dims();
        let mut x = state;
        let mut states = Vec::new();

        for t in (1..=self.steps).rev() {
            let timesteps =
                Tensor::<B::InnerBackend, 1, Int>::full([batch], t as i32, &device);
            let noise = net.predict(x.clone(), mu.clone(), timesteps);
            let score = noise.div_scalar(self.sigma_bar[t]).neg();
            let mean = self.reverse_step_mean_scalar(x, mu.clone(), score, t, ode);
            x = if !ode && t > 1 {
                let z = Tensor::random(mean.dims(), Distribution::Normal(0.0, 1.0), &device);
                mean + z.mul_scalar((self.sigma_sq[t] * self.dt).sqrt())
            } else {
                mean
            };
            if save_states {
                states.push(x.clone());
            }
        }

        ReverseOutput { output: x, states }
    }
}

impl<B: AutodiffBackend> Sde<B> for IrSde<B> {
    fn set_mu(&mut self, mu: Tensor<B, 4>) {
        self.mu = Some(mu);
    }

    fn noise_fn<N: NoisePredictor<B>>(
        &self,
        net: &N,
        state: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        net.predict(state, self.mu(), timesteps)
    }

    fn score_from_noise(
        &self,
        noise: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        let std = self.gather(&self.t_sigma_bar, timesteps);
        -(noise / std)
    }

    fn reverse_sde_step_mean(
        &self,
        state: Tensor<B, 4>,
        score: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        let mu = self.mu();
        let theta = self.gather(&self.t_thetas, timesteps.clone());
        let sigma_sq = self.gather(&self.t_sigma_sq, timesteps);
        let drift = (mu - state.clone()) * theta;
        state - (drift - score * sigma_sq).mul_scalar(self.dt)
    }

    fn reverse_optimum_step(
        &self,
        state: Tensor<B, 4>,
        state_0: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        let mu = self.mu();
        let prev = timesteps.clone().sub_scalar(1).clamp_min(0);

        let a = self.gather(&self.t_exp_dt, timesteps.clone());
        let var_t = self.gather(&self.t_one_minus_e2cum, timesteps);
        let var_prev = self.gather(&self.t_one_minus_e2cum, prev.clone());
        let decay_prev = self.gather(&self.t_exp_cum, prev);

        // Posterior mean of x_{t-1} given x_t and x_0 under the OU marginals:
        // both terms are scaled by the inverse marginal variance at t.
        let one_minus_a2 = (a.clone() * a.clone()).neg().add_scalar(1.0);
        let from_state = (state - mu.clone()) * a * var_prev / var_t.clone();
        let from_clean = (state_0 - mu.clone()) * decay_prev * one_minus_a2 / var_t;
        mu + from_state + from_clean
    }

    fn reverse_sde<N: NoisePredictor<B::InnerBackend>>(
        &self,
        net: &N,
        state: Tensor<B::InnerBackend, 4>,
        save_states: bool,
    ) -> ReverseOutput<B::InnerBackend> {
        self.reverse_loop(net, state, save_states, false)
    }

    fn reverse_ode<N: NoisePredictor<B::InnerBackend>>(
        &self,
        net: &N,
        state: Tensor<B::InnerBackend, 4>,
        save_states: bool,
    ) -> ReverseOutput<B::InnerBackend> {
        self.reverse_loop(net, state, save_states, true)
    }
}
