//! Shared evaluation contract for the extra-loss criterions.
//!
//! Both criterions follow the same skeleton: run the model, pull the
//! auxiliary loss out of its output, compute the strategy-specific primary
//! loss, add the two, and report a normalization denominator plus a logging
//! map for the external aggregator.

use std::collections::HashMap;

use burn::{
    config::Config,
    tensor::{backend::Backend, cast::ToElement, Tensor},
};
use thiserror::Error;

use crate::{
    cross_entropy::{CrossEntropyExtraLoss, CrossEntropyExtraLossConfig},
    label_smoothed_cross_entropy::{
        LabelSmoothedCrossEntropyExtraLoss, LabelSmoothedCrossEntropyExtraLossConfig,
    },
    model::{NetOutput, SequenceModel},
    sample::Sample,
};

/// Registry identifier for the plain cross-entropy criterion.
pub const CROSS_ENTROPY_EXTRA_LOSS: &str = "cross_entropy_extra_loss";

/// Registry identifier for the label-smoothed cross-entropy criterion.
pub const LABEL_SMOOTHED_CROSS_ENTROPY_EXTRA_LOSS: &str =
    "label_smoothed_cross_entropy_extra_loss";

/// Key under which a model reports its auxiliary loss.
pub const EXTRA_LOSS_KEY: &str = "extra_loss";

/// Errors that can occur while building or evaluating a criterion.
#[derive(Debug, Error)]
pub enum CriterionError {
    /// The model returned an extras map without the required auxiliary loss.
    #[error("extra-loss criterions must be used with a model that appends an extra loss")]
    MissingExtraLoss,

    /// No criterion is registered under the requested name.
    #[error(
        "unknown criterion '{name}' (expected 'cross_entropy_extra_loss' or \
         'label_smoothed_cross_entropy_extra_loss')"
    )]
    UnknownCriterion { name: String },
}

/// One entry of the logging output map.
///
/// Reduced evaluations report plain scalars; unreduced evaluations hand the
/// raw per-token tensor through to the consumer.
#[derive(Debug, Clone)]
pub enum MetricValue<B: Backend> {
    Scalar(f64),
    Raw(Tensor<B, 1>),
}

impl<B: Backend> MetricValue<B> {
    /// Scalar when reduced, raw tensor otherwise.
    pub fn from_tensor(value: &Tensor<B, 1>, reduce: bool) -> Self {
        if reduce {
            Self::Scalar(value.clone().into_scalar().to_f64())
        } else {
            Self::Raw(value.clone())
        }
    }

    /// The scalar value, if this entry is reduced.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Raw(_) => None,
        }
    }
}

/// Result of one criterion evaluation.
#[derive(Debug, Clone)]
pub struct CriterionOutput<B: Backend> {
    /// Combined loss: a one-element tensor when reduced, per-token otherwise.
    pub loss: Tensor<B, 1>,
    /// Normalization denominator for the external optimizer.
    pub sample_size: usize,
    /// Metric name to value, rebuilt every call and aggregated externally.
    pub logging_output: HashMap<String, MetricValue<B>>,
}

/// Pull the auxiliary loss term out of a model output.
///
/// A [`NetOutput::Plain`] output carries no auxiliary loss and contributes
/// zero without error; an extras map missing the [`EXTRA_LOSS_KEY`] entry is
/// a usage error. The asymmetry is kept for compatibility with models that
/// predate the extras map.
pub fn extra_loss_term<B: Backend>(
    net_output: &NetOutput<B>,
) -> Result<Option<Tensor<B, 1>>, CriterionError> {
    match net_output {
        NetOutput::Plain(_) => Ok(None),
        NetOutput::WithExtras(_, extras) => extras
            .get(EXTRA_LOSS_KEY)
            .cloned()
            .map(Some)
            .ok_or(CriterionError::MissingExtraLoss),
    }
}

/// Configuration shared by every registered criterion.
#[derive(Config, Debug)]
pub struct CriterionConfig {
    /// Token id treated as padding and excluded from the loss. Default: 1
    #[config(default = 1)]
    pub padding_idx: usize,
    /// Normalize by sentence count instead of token count. Default: false
    #[config(default = false)]
    pub sentence_avg: bool,
    /// Label-smoothing epsilon, 0 disables smoothing. Default: 0.0
    #[config(default = 0.0)]
    pub label_smoothing: f64,
    /// Weight for the model-provided extra loss. Default: 1.0
    #[config(default = 1.0)]
    pub extra_loss_weight: f64,
}

/// A selectable loss criterion.
///
/// Strategies are plain data after construction; each evaluation is a
/// synchronous call with no retained state.
#[derive(Debug, Clone)]
pub enum Criterion {
    CrossEntropy(CrossEntropyExtraLoss),
    LabelSmoothed(LabelSmoothedCrossEntropyExtraLoss),
}

impl Criterion {
    /// Instantiate the criterion registered under `name`.
    ///
    /// # Errors
    /// Returns [`CriterionError::UnknownCriterion`] for unregistered names.
    pub fn from_name(name: &str, config: &CriterionConfig) -> Result<Self, CriterionError> {
        let criterion = match name {
            CROSS_ENTROPY_EXTRA_LOSS => Self::CrossEntropy(
                CrossEntropyExtraLossConfig::new()
                    .with_padding_idx(config.padding_idx)
                    .with_sentence_avg(config.sentence_avg)
                    .with_extra_loss_weight(config.extra_loss_weight)
                    .init(),
            ),
            LABEL_SMOOTHED_CROSS_ENTROPY_EXTRA_LOSS => Self::LabelSmoothed(
                LabelSmoothedCrossEntropyExtraLossConfig::new()
                    .with_padding_idx(config.padding_idx)
                    .with_sentence_avg(config.sentence_avg)
                    .with_label_smoothing(config.label_smoothing)
                    .with_extra_loss_weight(config.extra_loss_weight)
                    .init(),
            ),
            _ => {
                return Err(CriterionError::UnknownCriterion {
                    name: name.to_owned(),
                })
            }
        };
        tracing::debug!(criterion = name, "criterion selected");
        Ok(criterion)
    }

    /// Evaluate the criterion on one batch.
    ///
    /// # Errors
    /// Returns [`CriterionError::MissingExtraLoss`] if the model reports an
    /// extras map without an auxiliary loss.
    pub fn evaluate<B: Backend, M: SequenceModel<B>>(
        &self,
        model: &M,
        sample: &Sample<B>,
        reduce: bool,
    ) -> Result<CriterionOutput<B>, CriterionError> {
        match self {
            Self::CrossEntropy(criterion) => criterion.evaluate(model, sample, reduce),
            Self::LabelSmoothed(criterion) => criterion.evaluate(model, sample, reduce),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{cast::ToElement, Int, Tensor, TensorData};

    use super::*;
    use crate::tests::{sample_with_targets, StubModel, TestBackend};

    #[test]
    fn registry_builds_both_criterions_by_name() {
        let config = CriterionConfig::new();

        let plain = Criterion::from_name(CROSS_ENTROPY_EXTRA_LOSS, &config).unwrap();
        assert!(matches!(plain, Criterion::CrossEntropy(_)));

        let smoothed =
            Criterion::from_name(LABEL_SMOOTHED_CROSS_ENTROPY_EXTRA_LOSS, &config).unwrap();
        assert!(matches!(smoothed, Criterion::LabelSmoothed(_)));
    }

    #[test]
    fn registry_rejects_unknown_name() {
        let config = CriterionConfig::new();
        let result = Criterion::from_name("cross_entropy", &config);
        assert!(matches!(
            result,
            Err(CriterionError::UnknownCriterion { .. })
        ));
    }

    #[test]
    fn criterion_enum_dispatches_to_cross_entropy() {
        let device = Default::default();
        let config = CriterionConfig::new().with_padding_idx(2);
        let criterion = Criterion::from_name(CROSS_ENTROPY_EXTRA_LOSS, &config).unwrap();

        let lprobs = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[-1.0, -2.0, -3.0], [-0.5, -1.5, -2.5]]]),
            &device,
        );
        let model = StubModel::log_probs(lprobs);
        let target =
            Tensor::<TestBackend, 2, Int>::from_data(TensorData::from([[0, 1]]), &device);
        let sample = sample_with_targets(target, 2);

        let output = criterion.evaluate(&model, &sample, true).unwrap();

        // -(-1.0) + -(-1.5) = 2.5
        assert!((output.loss.into_scalar().to_f64() - 2.5).abs() < 1e-6);
        assert_eq!(output.sample_size, 2);
    }

    #[test]
    fn metric_value_scalar_accessor_distinguishes_raw() {
        let device = Default::default();
        let value = Tensor::<TestBackend, 1>::from_data(TensorData::from([1.5]), &device);

        let reduced = MetricValue::from_tensor(&value, true);
        assert_eq!(reduced.scalar(), Some(1.5));

        let raw = MetricValue::<TestBackend>::from_tensor(&value, false);
        assert!(raw.scalar().is_none());
    }
}
