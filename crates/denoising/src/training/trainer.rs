//! The feed/optimize/restore wrapper around a noise-estimation network.
//!
//! Holds the network, its AdamW optimizer, and the current step's tensors.
//! One `feed_data` call stages at most one pending step; `optimize_parameters`
//! runs the score-matching objective against the caller's SDE and `restore`
//! samples the reverse process in evaluation mode.

use std::collections::BTreeMap;

use anyhow::anyhow;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;

use diffusion::{NoisePredictor, Sde};

use crate::options::{Options, PathOptions, TrainOptions};
use crate::training::loss::MatchingLoss;
use crate::training::lr_schedule::LrSchedule;

/// Metadata written next to each saved model record.
#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct CheckpointMeta {
    pub label: String,
    pub loss: Option<f64>,
}

/// Host-memory snapshots of the first batch item, for presentation.
pub struct Visuals {
    pub input: TensorData,
    pub output: TensorData,
    pub ground_truth: Option<TensorData>,
}

/// AdamW configured from the training options: betas, weight decay, and
/// optional gradient-norm clipping.
pub fn adamw_from_options<B, M>(train: &TrainOptions) -> impl Optimizer<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    AdamWConfig::new()
        .with_beta_1(train.beta1)
        .with_beta_2(train.beta2)
        .with_weight_decay(train.weight_decay as f32)
        .with_grad_clipping(
            train
                .max_grad_norm
                .map(|norm| GradientClippingConfig::Norm(norm as f32)),
        )
        .init::<B, M>()
}

/// Training/inference wrapper for a conditional denoising network.
///
/// The SDE is supplied by the caller at each step; the wrapper only pins its
/// conditioning mean and consumes its step/sampling operations.
pub struct DenoisingModel<B: AutodiffBackend, M, O> {
    model: M,
    optimizer: O,
    loss_fn: MatchingLoss,
    schedule: LrSchedule,
    train: TrainOptions,
    paths: PathOptions,
    device: B::Device,
    state: Option<Tensor<B, 4>>,
    condition: Option<Tensor<B, 4>>,
    state_0: Option<Tensor<B, 4>>,
    output: Option<Tensor<B, 4>>,
    saved_states: Vec<Tensor<B, 4>>,
    log: BTreeMap<String, f64>,
}

impl<B, M, O> DenoisingModel<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + NoisePredictor<B>,
    M::InnerModule: NoisePredictor<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Build the wrapper. Fails fast on an unrecognized lr scheme, before any
    /// optimizer step is possible.
    pub fn new(
        model: M,
        optimizer: O,
        options: &Options,
        device: B::Device,
    ) -> anyhow::Result<Self> {
        let schedule = LrSchedule::from_options(&options.train)?;
        if options.distributed {
            tracing::info!(
                name = %options.name,
                "distributed replicas configured; batch sharding is delegated to the backend"
            );
        }
        Ok(Self {
            model,
            optimizer,
            loss_fn: MatchingLoss::new(options.train.loss_type, options.train.is_weighted),
            schedule,
            train: options.train.clone(),
            paths: options.path.clone(),
            device,
            state: None,
            condition: None,
            state_0: None,
            output: None,
            saved_states: Vec::new(),
            log: BTreeMap::new(),
        })
    }

    /// Stage one step's tensors, moved to the compute device. Overwrites the
    /// previous step's state and condition; the ground truth is only replaced
    /// when present.
    pub fn feed_data(
        &mut self,
        state: Tensor<B, 4>,
        condition: Tensor<B, 4>,
        ground_truth: Option<Tensor<B, 4>>,
    ) {
        self.state = Some(state.to_device(&self.device));
        self.condition = Some(condition.to_device(&self.device));
        if let Some(gt) = ground_truth {
            self.state_0 = Some(gt.to_device(&self.device));
        }
    }

    /// One optimization step at the given per-sample diffusion timesteps.
    ///
    /// Pins the SDE's conditioning mean, compares the expected reverse step
    /// under the network's score against the analytically optimal reverse
    /// step from the ground truth, and updates the network with the matching
    /// loss at the scheduled learning rate. Writes `loss` and `lr` into the
    /// log dict.
    pub fn optimize_parameters<S: Sde<B>>(
        &mut self,
        step: usize,
        timesteps: Tensor<B, 1, Int>,
        sde: &mut S,
    ) -> anyhow::Result<()> {
        let state = self
            .state
            .clone()
            .ok_or_else(|| anyhow!("no input fed: call feed_data before optimize_parameters"))?;
        let condition = self
            .condition
            .clone()
            .ok_or_else(|| anyhow!("no condition fed: call feed_data before optimize_parameters"))?;
        let state_0 = self.state_0.clone().ok_or_else(|| {
            anyhow!("ground truth was never fed: optimization requires feed_data with ground truth")
        })?;

        sde.set_mu(condition);
        let timesteps = timesteps.to_device(&self.device);

        let noise = sde.noise_fn(&self.model, state.clone(), timesteps.clone());
        let score = sde.score_from_noise(noise, timesteps.clone());

        // Maximum-likelihood objective for the previous state x_{t-1}.
        let expected = sde.reverse_sde_step_mean(state.clone(), score, timesteps.clone());
        let optimum = sde.reverse_optimum_step(state, state_0, timesteps);

        let loss = self
            .loss_fn
            .forward(expected, optimum, None)
            .mul_scalar(self.train.weight);
        let loss_value: f64 = loss.clone().into_scalar().elem();

        let lr = self.schedule.lr(self.train.lr, step);
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optimizer.step(lr, self.model.clone(), grads);

        self.log.insert("loss".to_string(), loss_value);
        self.log.insert("lr".to_string(), lr);
        Ok(())
    }

    /// Run reverse-time sampling from the staged state and store the result
    /// as the current output.
    ///
    /// Sampling goes through the valid (non-autodiff) view of the network, so
    /// no gradient state is accumulated and the training model is left
    /// untouched. `perform_ode` selects the deterministic probability-flow
    /// integrator over the stochastic sampler.
    pub fn restore<S: Sde<B>>(
        &mut self,
        sde: &mut S,
        perform_ode: bool,
        save_states: bool,
    ) -> anyhow::Result<()> {
        let state = self
            .state
            .clone()
            .ok_or_else(|| anyhow!("no input fed: call feed_data before restore"))?;
        let condition = self
            .condition
            .clone()
            .ok_or_else(|| anyhow!("no condition fed: call feed_data before restore"))?;
        sde.set_mu(condition);

        let net = self.model.valid();
        let reversed = if perform_ode {
            sde.reverse_ode(&net, state.inner(), save_states)
        } else {
            sde.reverse_sde(&net, state.inner(), save_states)
        };
        self.output = Some(Tensor::from_inner(reversed.output));
        self.saved_states = reversed
            .states
            .into_iter()
            .map(Tensor::from_inner)
            .collect();
        Ok(())
    }

    /// Latest scalar metrics, keyed by name.
    pub fn current_log(&self) -> &BTreeMap<String, f64> {
        &self.log
    }

    /// First batch item of condition/output (and optionally ground truth),
    /// detached and moved to host memory.
    pub fn current_visuals(&self, need_ground_truth: bool) -> anyhow::Result<Visuals> {
        let condition = self
            .condition
            .as_ref()
            .ok_or_else(|| anyhow!("no input fed: call feed_data first"))?;
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("no output available: run restore first"))?;
        let ground_truth = if need_ground_truth {
            let gt = self
                .state_0
                .as_ref()
                .ok_or_else(|| anyhow!("ground truth was never fed"))?;
            Some(first_item(gt))
        } else {
            None
        };
        Ok(Visuals {
            input: first_item(condition),
            output: first_item(output),
            ground_truth,
        })
    }

    /// Intermediate reverse-sampling states from the last `restore` call with
    /// `save_states = true`, oldest first.
    pub fn saved_states(&self) -> &[Tensor<B, 4>] {
        &self.saved_states
    }

    /// Log the network's structure and parameter count.
    pub fn describe_network(&self) {
        tracing::info!(
            params = self.model.num_params(),
            "network structure: {}",
            core::any::type_name::<M>()
        );
    }

    /// Restore pretrained weights from the configured path, if any.
    ///
    /// No configured path means no load. A failed load propagates under
    /// `strict_load` and downgrades to a warning otherwise.
    pub fn load(&mut self) -> anyhow::Result<()> {
        let Some(path) = self.paths.pretrain_model.clone() else {
            tracing::debug!("no pretrained model configured; starting from fresh weights");
            return Ok(());
        };
        tracing::info!(path = %path.display(), "loading pretrained model");
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        match self.model.clone().load_file(path.clone(), &recorder, &self.device) {
            Ok(model) => {
                self.model = model;
                Ok(())
            }
            Err(e) if !self.paths.strict_load => {
                tracing::warn!(
                    path = %path.display(),
                    "pretrained model load failed ({e}); continuing with fresh weights"
                );
                Ok(())
            }
            Err(e) => Err(anyhow!(
                "failed to load pretrained model from {}: {e}",
                path.display()
            )),
        }
    }

    /// Save the model record and a metadata file under the checkpoint dir,
    /// keyed by `label`.
    pub fn save(&self, label: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.paths.checkpoint_dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let model_path = self.paths.checkpoint_dir.join(format!("{label}_denoiser"));
        self.model
            .clone()
            .save_file(model_path, &recorder)
            .map_err(|e| anyhow!("failed to save model checkpoint '{label}': {e}"))?;

        let meta_path = self.paths.checkpoint_dir.join(format!("{label}_meta.json"));
        serde_json::to_writer(
            std::fs::File::create(&meta_path)?,
            &CheckpointMeta {
                label: label.to_string(),
                loss: self.log.get("loss").copied(),
            },
        )?;

        tracing::info!(label, "checkpoint saved");
        Ok(())
    }
}

fn first_item<B: Backend>(tensor: &Tensor<B, 4>) -> TensorData {
    tensor.clone().detach().slice([0..1]).squeeze::<3>(0).into_data()
}
