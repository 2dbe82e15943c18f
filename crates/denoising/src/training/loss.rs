//! Matching loss between the expected and the optimal reverse step.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Elementwise distance flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Mean absolute error.
    L1,
    /// Mean squared error.
    L2,
}

impl std::fmt::Display for LossKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LossKind::L1 => write!(f, "l1"),
            LossKind::L2 => write!(f, "l2"),
        }
    }
}

/// L1/L2 matching loss with optional per-sample weighting.
#[derive(Debug, Clone, Copy)]
pub struct MatchingLoss {
    kind: LossKind,
    weighted: bool,
}

impl MatchingLoss {
    pub fn new(kind: LossKind, weighted: bool) -> Self {
        Self { kind, weighted }
    }

    /// Scalar loss between `prediction` and `target`.
    ///
    /// Reduces over the non-batch dims first; when the loss is weighted and
    /// `weights` (shape `(batch,)`) are given, each sample's contribution is
    /// scaled before the final mean.
    pub fn forward<B: Backend>(
        &self,
        prediction: Tensor<B, 4>,
        target: Tensor<B, 4>,
        weights: Option<Tensor<B, 1>>,
    ) -> Tensor<B, 1> {
        let diff = prediction - target;
        let elementwise = match self.kind {
            LossKind::L1 => diff.abs(),
            LossKind::L2 => diff.powf_scalar(2.0),
        };
        let per_sample = elementwise
            .flatten::<2>(1, 3)
            .mean_dim(1)
            .squeeze::<1>(1);
        match weights {
            Some(w) if self.weighted => (per_sample * w).mean(),
            _ => per_sample.mean(),
        }
    }
}
