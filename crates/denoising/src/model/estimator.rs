//! A compact conditional CNN noise estimator.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;

use diffusion::NoisePredictor;

/// Configuration for [`NoiseEstimator`].
///
/// ```text
/// cat(state, condition): (batch, 2·channels, h, w)
///   → Conv 3×3 → + timestep embedding → SiLU
///   → Conv 3×3 → SiLU
///   → Conv 3×3 → noise estimate: (batch, channels, h, w)
/// ```
#[derive(Config, Debug)]
pub struct NoiseEstimatorConfig {
    /// Image channels (3 for RGB).
    #[config(default = 3)]
    pub channels: usize,
    /// Hidden feature width.
    #[config(default = 32)]
    pub hidden: usize,
    /// Largest timestep the embedding normalizes against.
    #[config(default = 100)]
    pub max_timestep: usize,
}

/// Predicts the noise component of a noisy state given the degraded
/// observation and the diffusion timestep.
#[derive(Module, Debug)]
pub struct NoiseEstimator<B: Backend> {
    conv_in: Conv2d<B>,
    conv_mid: Conv2d<B>,
    conv_out: Conv2d<B>,
    time_embed: Linear<B>,
    max_timestep: usize,
}

impl NoiseEstimatorConfig {
    /// Initialize a NoiseEstimator with the given configuration.
    pub fn init<B: Backend>(&self, device: &B::Device) -> NoiseEstimator<B> {
        let conv = |cin: usize, cout: usize| {
            Conv2dConfig::new([cin, cout], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        NoiseEstimator {
            conv_in: conv(2 * self.channels, self.hidden),
            conv_mid: conv(self.hidden, self.hidden),
            conv_out: conv(self.hidden, self.channels),
            time_embed: LinearConfig::new(1, self.hidden).init(device),
            max_timestep: self.max_timestep,
        }
    }
}

impl<B: Backend> NoiseEstimator<B> {
    /// Forward pass.
    ///
    /// Input shapes: `state`/`mu` `(batch, channels, h, w)`, `timesteps`
    /// `(batch,)`. Output matches `state`.
    pub fn forward(
        &self,
        state: Tensor<B, 4>,
        mu: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        let x = Tensor::cat(vec![state, mu], 1);
        let x = self.conv_in.forward(x);

        // Normalized timestep, broadcast over the spatial dims.
        let t = timesteps
            .float()
            .div_scalar(self.max_timestep as f32)
            .unsqueeze_dim::<2>(1);
        let emb = self.time_embed.forward(t);
        let [batch, hidden] = emb.dims();
        let x = x + emb.reshape([batch, hidden, 1, 1]);

        let x = burn::tensor::activation::silu(x);
        let x = self.conv_mid.forward(x);
        let x = burn::tensor::activation::silu(x);
        self.conv_out.forward(x)
    }
}

impl<B: Backend> NoisePredictor<B> for NoiseEstimator<B> {
    fn predict(
        &self,
        state: Tensor<B, 4>,
        mu: Tensor<B, 4>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 4> {
        self.forward(state, mu, timesteps)
    }
}
