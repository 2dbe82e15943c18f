//! Integration tests for the denoising crate.
//!
//! Exercise cross-module interactions: wrapper + estimator + SDE optimization
//! steps, sampler dispatch, visuals extraction, and checkpoint round-trips.
//! All use the NdArray backend and synthetic data.

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::tensor::Distribution;
use rand::SeedableRng;
use tempfile::TempDir;

use denoising::model::{NoiseEstimator, NoiseEstimatorConfig};
use denoising::options::Options;
use denoising::training::loss::LossKind;
use denoising::training::{adamw_from_options, DenoisingModel};
use diffusion::mocks::RecordingSde;
use diffusion::{IrSde, IrSdeConfig};

type TestAutodiffBackend = Autodiff<NdArray<f32>>;

const STEPS: usize = 8;

fn base_options() -> Options {
    let toml_str = r#"
name = "test"

[train]
lr = 1e-3
weight_decay = 1e-4
loss_type = "l2"
weight = 1.0
lr_scheme = "MultiStepLR"
lr_steps = [1000]
lr_gamma = 0.5
"#;
    toml::from_str(toml_str).unwrap()
}

fn make_wrapper(
    options: &Options,
) -> DenoisingModel<
    TestAutodiffBackend,
    NoiseEstimator<TestAutodiffBackend>,
    impl Optimizer<NoiseEstimator<TestAutodiffBackend>, TestAutodiffBackend>,
> {
    let device = Default::default();
    let net = NoiseEstimatorConfig::new()
        .with_channels(1)
        .with_hidden(4)
        .with_max_timestep(STEPS)
        .init::<TestAutodiffBackend>(&device);
    let optimizer = adamw_from_options(&options.train);
    DenoisingModel::new(net, optimizer, options, device).unwrap()
}

fn make_sde() -> IrSde<TestAutodiffBackend> {
    let device = Default::default();
    IrSdeConfig::new()
        .with_steps(STEPS)
        .with_max_sigma(1.0)
        .init::<TestAutodiffBackend>(&device)
}

fn synthetic_pair() -> (
    Tensor<TestAutodiffBackend, 4>,
    Tensor<TestAutodiffBackend, 4>,
) {
    let device = Default::default();
    let gt = Tensor::random([2, 1, 8, 8], Distribution::Normal(0.0, 1.0), &device);
    let degradation = Tensor::random([2, 1, 8, 8], Distribution::Normal(0.0, 0.3), &device);
    let lq = gt.clone() + degradation;
    (gt, lq)
}

#[test]
fn test_optimize_parameters_logs_finite_loss() {
    let options = base_options();
    let mut wrapper = make_wrapper(&options);
    let mut sde = make_sde();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    for step in 0..3 {
        let (gt, lq) = synthetic_pair();
        let (timesteps, noisy) = sde.generate_random_states(gt.clone(), lq.clone(), &mut rng);
        wrapper.feed_data(noisy, lq, Some(gt));
        wrapper.optimize_parameters(step, timesteps, &mut sde).unwrap();

        let loss = *wrapper.current_log().get("loss").unwrap();
        assert!(loss.is_finite(), "step {step}: loss {loss} is not finite");
    }
    assert!(wrapper.current_log().contains_key("lr"));
}

#[test]
fn test_optimize_without_ground_truth_is_an_error() {
    let options = base_options();
    let mut wrapper = make_wrapper(&options);
    let mut sde = make_sde();
    let device = Default::default();

    let (_, lq) = synthetic_pair();
    wrapper.feed_data(lq.clone(), lq, None);
    let timesteps = Tensor::<TestAutodiffBackend, 1, Int>::full([2], 3, &device);

    let err = wrapper
        .optimize_parameters(0, timesteps, &mut sde)
        .unwrap_err();
    assert!(
        err.to_string().contains("ground truth"),
        "unexpected error: {err}"
    );
}

#[test]
fn test_unknown_lr_scheme_fails_at_construction() {
    let mut options = base_options();
    options.train.lr_scheme = "ReduceLROnPlateau".to_string();

    let device = Default::default();
    let net = NoiseEstimatorConfig::new()
        .with_channels(1)
        .with_hidden(4)
        .init::<TestAutodiffBackend>(&device);
    let optimizer = adamw_from_options(&options.train);
    let err = DenoisingModel::<TestAutodiffBackend, _, _>::new(net, optimizer, &options, device)
        .err()
        .unwrap();
    assert!(
        err.to_string().contains("not implemented"),
        "unexpected error: {err}"
    );
}

#[test]
fn test_restore_dispatches_to_the_selected_sampler() {
    let options = base_options();
    let mut wrapper = make_wrapper(&options);
    let mut mock = RecordingSde::<TestAutodiffBackend>::new();

    let (_, lq) = synthetic_pair();
    wrapper.feed_data(lq.clone(), lq, None);

    wrapper.restore(&mut mock, false, false).unwrap();
    assert_eq!(mock.sde_calls(), 1);
    assert_eq!(mock.ode_calls(), 0);

    wrapper.restore(&mut mock, true, false).unwrap();
    assert_eq!(mock.sde_calls(), 1);
    assert_eq!(mock.ode_calls(), 1);
    assert!(mock.mu().is_some(), "restore must pin the conditioning mean");
}

#[test]
fn test_restore_before_feed_is_an_error() {
    let options = base_options();
    let mut wrapper = make_wrapper(&options);
    let mut mock = RecordingSde::<TestAutodiffBackend>::new();

    let err = wrapper.restore(&mut mock, false, false).unwrap_err();
    assert!(err.to_string().contains("feed_data"), "unexpected error: {err}");
}

#[test]
fn test_visuals_keys() {
    let options = base_options();
    let mut wrapper = make_wrapper(&options);
    let mut mock = RecordingSde::<TestAutodiffBackend>::new();

    let (gt, lq) = synthetic_pair();

    // Before restore there is no output to show.
    wrapper.feed_data(lq.clone(), lq.clone(), None);
    assert!(wrapper.current_visuals(false).is_err());

    wrapper.restore(&mut mock, false, false).unwrap();
    let visuals = wrapper.current_visuals(false).unwrap();
    assert_eq!(visuals.input.shape, vec![1, 8, 8]);
    assert_eq!(visuals.output.shape, vec![1, 8, 8]);
    assert!(visuals.ground_truth.is_none());

    // Ground truth requested but never fed.
    assert!(wrapper.current_visuals(true).is_err());

    wrapper.feed_data(lq.clone(), lq, Some(gt));
    let visuals = wrapper.current_visuals(true).unwrap();
    assert!(visuals.ground_truth.is_some());
}

#[test]
fn test_optimize_still_works_after_restore() {
    // Sampling goes through the valid view of the model; the autodiff model
    // must come back untouched and trainable.
    let options = base_options();
    let mut wrapper = make_wrapper(&options);
    let mut sde = make_sde();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    let (gt, lq) = synthetic_pair();
    let (timesteps, noisy) = sde.generate_random_states(gt.clone(), lq.clone(), &mut rng);
    wrapper.feed_data(noisy, lq, Some(gt));

    wrapper.restore(&mut sde, false, true).unwrap();
    assert_eq!(wrapper.saved_states().len(), STEPS);

    wrapper.optimize_parameters(0, timesteps, &mut sde).unwrap();
    let loss = *wrapper.current_log().get("loss").unwrap();
    assert!(loss.is_finite(), "post-restore loss {loss} is not finite");
}

#[test]
fn test_checkpoint_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();

    let mut options = base_options();
    options.path.checkpoint_dir = dir.path().to_path_buf();
    let wrapper = make_wrapper(&options);
    wrapper.save("100").unwrap();

    assert!(dir.path().join("100_denoiser.mpk").exists());
    assert!(dir.path().join("100_meta.json").exists());

    // Strict load of the saved record succeeds.
    let mut load_options = base_options();
    load_options.path.pretrain_model = Some(dir.path().join("100_denoiser"));
    let mut loaded = make_wrapper(&load_options);
    loaded.load().unwrap();
}

#[test]
fn test_missing_pretrain_path_is_skipped() {
    let options = base_options();
    let mut wrapper = make_wrapper(&options);
    // No path configured: load is a no-op, not an error.
    wrapper.load().unwrap();
}

#[test]
fn test_strict_load_controls_failure_handling() {
    let dir = TempDir::new().unwrap();
    let bogus = dir.path().join("does_not_exist");

    let mut strict = base_options();
    strict.path.pretrain_model = Some(bogus.clone());
    let mut wrapper = make_wrapper(&strict);
    assert!(wrapper.load().is_err());

    let mut lenient = base_options();
    lenient.path.pretrain_model = Some(bogus);
    lenient.path.strict_load = false;
    let mut wrapper = make_wrapper(&lenient);
    wrapper.load().unwrap();
}

#[test]
fn test_loss_kind_is_wired_from_options() {
    // L2 on identical expected/optimum pairs should be ~0 even when the
    // recording mock short-circuits the SDE math.
    let options = base_options();
    assert_eq!(options.train.loss_type, LossKind::L2);
}
