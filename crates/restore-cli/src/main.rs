mod config;

use std::path::PathBuf;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::tensor::{Distribution, Tensor};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use denoising::model::NoiseEstimator;
use denoising::training::{adamw_from_options, DenoisingModel};
use diffusion::{IrSde, Sde};

type Backend = Autodiff<NdArray<f32>>;

/// SDE-based image restoration: train a conditional denoiser or run
/// reverse-time sampling with it.
#[derive(Parser)]
#[command(name = "restore", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run optimization steps on synthetic degraded/clean pairs.
    Train {
        /// Path to the experiment config TOML file.
        #[arg(long, default_value = "configs/derain.toml")]
        config: PathBuf,
        /// Number of optimization steps.
        #[arg(long, default_value_t = 200)]
        steps: usize,
        /// Batch size per step.
        #[arg(long, default_value_t = 4)]
        batch: usize,
        /// Square image size in pixels.
        #[arg(long, default_value_t = 32)]
        size: usize,
        /// Steps between progress log lines.
        #[arg(long, default_value_t = 20)]
        log_interval: usize,
        /// Steps between checkpoint saves. 0 disables intermediate saves.
        #[arg(long, default_value_t = 100)]
        checkpoint_interval: usize,
        /// RNG seed for the timestep draws.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Restore a synthetic degraded batch with the (optionally pretrained)
    /// denoiser and report reconstruction error.
    Restore {
        /// Path to the experiment config TOML file.
        #[arg(long, default_value = "configs/derain.toml")]
        config: PathBuf,
        /// Batch size.
        #[arg(long, default_value_t = 2)]
        batch: usize,
        /// Square image size in pixels.
        #[arg(long, default_value_t = 32)]
        size: usize,
        /// Integrate the deterministic probability-flow ODE instead of the
        /// stochastic reverse SDE.
        #[arg(long)]
        ode: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            steps,
            batch,
            size,
            log_interval,
            checkpoint_interval,
            seed,
        } => run_train(&config, steps, batch, size, log_interval, checkpoint_interval, seed),
        Command::Restore {
            config,
            batch,
            size,
            ode,
        } => run_restore(&config, batch, size, ode),
    }
}

/// A synthetic clean/degraded pair: a smooth random image and a noisy,
/// globally-dimmed copy standing in for the degraded observation.
fn synthetic_pair(
    batch: usize,
    channels: usize,
    size: usize,
    device: &<Backend as burn::tensor::backend::Backend>::Device,
) -> (Tensor<Backend, 4>, Tensor<Backend, 4>) {
    let clean = Tensor::random(
        [batch, channels, size, size],
        Distribution::Normal(0.0, 0.5),
        device,
    );
    let noise = Tensor::random(
        [batch, channels, size, size],
        Distribution::Normal(0.0, 0.2),
        device,
    );
    let degraded = clean.clone().mul_scalar(0.7) + noise;
    (clean, degraded)
}

fn build(
    config_path: &std::path::Path,
) -> anyhow::Result<(
    DenoisingModel<
        Backend,
        NoiseEstimator<Backend>,
        impl burn::optim::Optimizer<NoiseEstimator<Backend>, Backend>,
    >,
    IrSde<Backend>,
    usize,
)> {
    let device = Default::default();
    let toml = config::load_restore_toml(config_path)?;
    let options = toml.options();

    let sde = toml.sde.init::<Backend>(&device);
    let net = toml.model.init::<Backend>(&device);
    let optimizer = adamw_from_options(&options.train);

    let wrapper = DenoisingModel::new(net, optimizer, &options, device)?;
    wrapper.describe_network();
    Ok((wrapper, sde, toml.model.channels))
}

fn run_train(
    config_path: &std::path::Path,
    steps: usize,
    batch: usize,
    size: usize,
    log_interval: usize,
    checkpoint_interval: usize,
    seed: u64,
) -> anyhow::Result<()> {
    let device: <Backend as burn::tensor::backend::Backend>::Device = Default::default();
    let (mut wrapper, mut sde, channels) = build(config_path)?;
    wrapper.load()?;

    let mut rng = StdRng::seed_from_u64(seed);
    for step in 0..steps {
        let (clean, degraded) = synthetic_pair(batch, channels, size, &device);
        let (timesteps, noisy) =
            sde.generate_random_states(clean.clone(), degraded.clone(), &mut rng);

        wrapper.feed_data(noisy, degraded, Some(clean));
        wrapper.optimize_parameters(step, timesteps, &mut sde)?;

        if log_interval > 0 && step % log_interval == 0 {
            let log = wrapper.current_log();
            tracing::info!(
                step,
                loss = log.get("loss"),
                lr = log.get("lr"),
                "training progress"
            );
        }
        if checkpoint_interval > 0 && step > 0 && step % checkpoint_interval == 0 {
            wrapper.save(&step.to_string())?;
        }
    }

    wrapper.save("latest")?;
    tracing::info!(steps, "training finished");
    Ok(())
}

fn run_restore(
    config_path: &std::path::Path,
    batch: usize,
    size: usize,
    ode: bool,
) -> anyhow::Result<()> {
    let device: <Backend as burn::tensor::backend::Backend>::Device = Default::default();
    let (mut wrapper, mut sde, channels) = build(config_path)?;
    wrapper.load()?;

    // Synthetic degraded batch; start sampling from the terminal marginal
    // around the degraded observation, as training does.
    let (clean, degraded) = synthetic_pair(batch, channels, size, &device);
    sde.set_mu(degraded.clone());
    let terminal = sde.noise_state_at(degraded.clone(), sde.steps());

    wrapper.feed_data(terminal, degraded, Some(clean));
    wrapper.restore(&mut sde, ode, false)?;

    let visuals = wrapper.current_visuals(true)?;
    let Some(ground_truth) = visuals.ground_truth else {
        anyhow::bail!("ground truth missing from visuals");
    };
    let output: Vec<f32> = visuals
        .output
        .to_vec()
        .map_err(|e| anyhow::anyhow!("failed to read output tensor: {e:?}"))?;
    let target: Vec<f32> = ground_truth
        .to_vec()
        .map_err(|e| anyhow::anyhow!("failed to read ground-truth tensor: {e:?}"))?;
    let mse = output
        .iter()
        .zip(&target)
        .map(|(o, t)| (o - t) * (o - t))
        .sum::<f32>()
        / output.len() as f32;

    tracing::info!(ode, mse = f64::from(mse), "restoration finished");
    Ok(())
}
