//! Label-smoothed cross-entropy criterion augmented with a model-provided
//! extra loss.
//!
//! The primary term blends the true-label negative log-likelihood with a
//! uniform penalty over the full vocabulary:
//!
//! ```text
//! loss = (1 - eps) * nll_loss + (eps / vocab) * smooth_loss
//! ```
//!
//! where `smooth_loss` sums the negated log-probabilities over all classes.
//! With `eps = 0` the criterion degenerates exactly to plain NLL. The plain
//! NLL component is surfaced separately for diagnostics.

use std::collections::HashMap;

use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};

use crate::{
    criterion::{extra_loss_term, CriterionError, CriterionOutput, MetricValue},
    model::{NetOutput, SequenceModel},
    sample::Sample,
};

/// Configuration for creating a [`LabelSmoothedCrossEntropyExtraLoss`]
/// criterion.
#[derive(Config, Debug)]
pub struct LabelSmoothedCrossEntropyExtraLossConfig {
    /// Token id treated as padding and excluded from the loss. Default: 1
    #[config(default = 1)]
    pub padding_idx: usize,
    /// Normalize by sentence count instead of token count. Default: false
    #[config(default = false)]
    pub sentence_avg: bool,
    /// Label-smoothing epsilon, 0 disables smoothing. Values outside (0, 1)
    /// produce a non-convex weighting; no bound check is performed.
    /// Default: 0.0
    #[config(default = 0.0)]
    pub label_smoothing: f64,
    /// Weight for the model-provided extra loss. Default: 1.0
    #[config(default = 1.0)]
    pub extra_loss_weight: f64,
}

impl LabelSmoothedCrossEntropyExtraLossConfig {
    /// Initialize a [`LabelSmoothedCrossEntropyExtraLoss`] criterion.
    pub fn init(&self) -> LabelSmoothedCrossEntropyExtraLoss {
        LabelSmoothedCrossEntropyExtraLoss {
            padding_idx: self.padding_idx,
            sentence_avg: self.sentence_avg,
            eps: self.label_smoothing,
            alpha: self.extra_loss_weight,
        }
    }
}

/// Label-smoothed cross-entropy criterion with an additive extra-loss term.
#[derive(Debug, Clone)]
pub struct LabelSmoothedCrossEntropyExtraLoss {
    /// Token id excluded from the loss.
    pub padding_idx: usize,
    /// Normalize by sentence count instead of token count.
    pub sentence_avg: bool,
    /// Label-smoothing epsilon.
    pub eps: f64,
    /// Configured extra-loss weight. Recorded only: the extra term is added
    /// unscaled, matching the historical combination.
    pub alpha: f64,
}

impl LabelSmoothedCrossEntropyExtraLoss {
    /// Compute the loss for one batch.
    ///
    /// Returns the combined loss, the sample size used as gradient
    /// denominator, and the logging output for the external aggregator.
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
        let net_output = model.forward(&sample.net_input);
        let extra_loss = extra_loss_term(&net_output)?;

        let (smoothed, nll_loss) = self.compute_loss(model, &net_output, sample, reduce);
        let loss = match &extra_loss {
            Some(extra) => smoothed + extra.clone(),
            None => smoothed,
        };

        let sample_size = if self.sentence_avg {
            sample.nsentences()
        } else {
            sample.ntokens
        };

        let mut logging_output = HashMap::new();
        logging_output.insert("loss".to_owned(), MetricValue::from_tensor(&loss, reduce));
        logging_output.insert(
            "nll_loss".to_owned(),
            MetricValue::from_tensor(&nll_loss, reduce),
        );
        logging_output.insert(
            "extra_loss".to_owned(),
            extra_loss
                .as_ref()
                .map_or(MetricValue::Scalar(0.0), |extra| {
                    MetricValue::from_tensor(extra, reduce)
                }),
        );
        logging_output.insert(
            "ntokens".to_owned(),
            MetricValue::Scalar(sample.ntokens as f64),
        );
        logging_output.insert(
            "nsentences".to_owned(),
            MetricValue::Scalar(sample.nsentences() as f64),
        );
        logging_output.insert(
            "sample_size".to_owned(),
            MetricValue::Scalar(sample_size as f64),
        );

        Ok(CriterionOutput {
            loss,
            sample_size,
            logging_output,
        })
    }

    /// Compute the smoothed loss and its plain NLL component.
    ///
    /// Both are one-element tensors when `reduce` is set, per-token vectors
    /// otherwise. Padding positions contribute zero to both.
    pub fn compute_loss<B: Backend, M: SequenceModel<B>>(
        &self,
        model: &M,
        net_output: &NetOutput<B>,
        sample: &Sample<B>,
        reduce: bool,
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let lprobs = model.get_normalized_probs(net_output, true);
        let [batch, seq_len, vocab] = lprobs.dims();
        let num_tokens = batch * seq_len;
        let lprobs = lprobs.reshape([num_tokens, vocab]);
        let target = model
            .get_targets(sample, net_output)
            .reshape([num_tokens, 1]);

        let non_pad = target
            .clone()
            .not_equal_elem(self.padding_idx as i64)
            .float();
        let nll_loss = lprobs.clone().gather(1, target).neg() * non_pad.clone();
        let smooth_loss = lprobs.sum_dim(1).neg() * non_pad;

        let (nll_loss, smooth_loss) = if reduce {
            (nll_loss.sum(), smooth_loss.sum())
        } else {
            (
                nll_loss.reshape([num_tokens]),
                smooth_loss.reshape([num_tokens]),
            )
        };

        let eps_i = self.eps / vocab as f64;
        let loss =
            nll_loss.clone().mul_scalar(1.0 - self.eps) + smooth_loss.mul_scalar(eps_i);
        (loss, nll_loss)
    }
}
