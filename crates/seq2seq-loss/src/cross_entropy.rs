//! Cross-entropy criterion augmented with a model-provided extra loss.
//!
//! The primary term is negative log-likelihood summed over non-padding
//! positions; the model's auxiliary loss is then added on top.

use std::collections::HashMap;

use burn::{
    config::Config,
    tensor::backend::Backend,
};

use crate::{
    criterion::{extra_loss_term, CriterionError, CriterionOutput, MetricValue},
    model::SequenceModel,
    sample::Sample,
};

/// Configuration for creating a [`CrossEntropyExtraLoss`] criterion.
#[derive(Config, Debug)]
pub struct CrossEntropyExtraLossConfig {
    /// Token id treated as padding and excluded from the loss. Default: 1
    #[config(default = 1)]
    pub padding_idx: usize,
    /// Normalize by sentence count instead of token count. Default: false
    #[config(default = false)]
    pub sentence_avg: bool,
    /// Weight for the model-provided extra loss. Default: 1.0
    #[config(default = 1.0)]
    pub extra_loss_weight: f64,
}

impl CrossEntropyExtraLossConfig {
    /// Initialize a [`CrossEntropyExtraLoss`] criterion.
    pub fn init(&self) -> CrossEntropyExtraLoss {
        CrossEntropyExtraLoss {
            padding_idx: self.padding_idx,
            sentence_avg: self.sentence_avg,
            alpha: self.extra_loss_weight,
        }
    }
}

/// Cross-entropy criterion with an additive extra-loss term.
#[derive(Debug, Clone)]
pub struct CrossEntropyExtraLoss {
    /// Token id excluded from the loss.
    pub padding_idx: usize,
    /// Normalize by sentence count instead of token count.
    pub sentence_avg: bool,
    /// Configured extra-loss weight. Recorded only: the extra term is added
    /// unscaled, matching the historical combination.
    pub alpha: f64,
}

impl CrossEntropyExtraLoss {
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

        let lprobs = model.get_normalized_probs(&net_output, true);
        let [batch, seq_len, vocab] = lprobs.dims();
        let num_tokens = batch * seq_len;
        let lprobs = lprobs.reshape([num_tokens, vocab]);
        let target = model
            .get_targets(sample, &net_output)
            .reshape([num_tokens, 1]);

        // Padding rows stay in the per-token vector but contribute exactly 0.
        let non_pad = target
            .clone()
            .not_equal_elem(self.padding_idx as i64)
            .float();
        let per_token = (lprobs.gather(1, target).neg() * non_pad).reshape([num_tokens]);
        let primary = if reduce { per_token.sum() } else { per_token };

        let loss = match &extra_loss {
            Some(extra) => primary + extra.clone(),
            None => primary,
        };

        let sample_size = if self.sentence_avg {
            sample.nsentences()
        } else {
            sample.ntokens
        };

        let mut logging_output = HashMap::new();
        logging_output.insert("loss".to_owned(), MetricValue::from_tensor(&loss, reduce));
        // Key spelled with a hyphen for log-parser compatibility.
        logging_output.insert(
            "extra-loss".to_owned(),
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
}
