//! Extra-loss-augmented cross-entropy criterions for sequence-generation
//! training.
//!
//! This crate provides the loss side of a sequence-generation training loop:
//! criterions that combine a token-prediction loss with an auxiliary "extra
//! loss" the model computes internally (a regularization or auxiliary-task
//! signal). Data loading, optimization, and distributed synchronization are
//! external collaborators.
//!
//! ## Criterions
//!
//! - **[`CrossEntropyExtraLoss`]**: summed negative log-likelihood plus the
//!   model's extra loss.
//! - **[`LabelSmoothedCrossEntropyExtraLoss`]**: label-smoothed cross-entropy
//!   plus the model's extra loss, surfacing the plain NLL component for
//!   diagnostics.
//!
//! Both are registered by name (see [`Criterion::from_name`]) so a training
//! configuration can select one as a string, and both follow the same
//! evaluation contract: given a model and a batch they return the combined
//! loss, a normalization denominator, and a per-call logging map.
//!
//! ## Model contract
//!
//! Models implement [`SequenceModel`] and declare through [`NetOutput`]
//! whether they carry auxiliary outputs. A model that returns an extras map
//! must include an `extra_loss` entry; a model without extras silently
//! contributes zero.
//!
//! ```rust
//! use seq2seq_loss::{Criterion, CriterionConfig, CROSS_ENTROPY_EXTRA_LOSS};
//!
//! fn select_criterion() -> Criterion {
//!     let config = CriterionConfig::new().with_padding_idx(1);
//!     Criterion::from_name(CROSS_ENTROPY_EXTRA_LOSS, &config)
//!         .expect("registered criterion name")
//! }
//! ```

mod criterion;
mod cross_entropy;
mod label_smoothed_cross_entropy;
mod model;
mod sample;

pub use criterion::{
    extra_loss_term, Criterion, CriterionConfig, CriterionError, CriterionOutput, MetricValue,
    CROSS_ENTROPY_EXTRA_LOSS, EXTRA_LOSS_KEY, LABEL_SMOOTHED_CROSS_ENTROPY_EXTRA_LOSS,
};
pub use cross_entropy::{CrossEntropyExtraLoss, CrossEntropyExtraLossConfig};
pub use label_smoothed_cross_entropy::{
    LabelSmoothedCrossEntropyExtraLoss, LabelSmoothedCrossEntropyExtraLossConfig,
};
pub use model::{NetOutput, SequenceModel};
pub use sample::Sample;

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use burn::{
        backend::NdArray,
        tensor::{activation, backend::Backend, Int, Tensor, TensorData},
    };

    use crate::{
        model::{NetOutput, SequenceModel},
        sample::Sample,
    };

    pub type TestBackend = NdArray;

    /// Fixed-output model for exercising the criterions.
    pub struct StubModel<B: Backend> {
        pub output: Tensor<B, 3>,
        pub extras: Option<HashMap<String, Tensor<B, 1>>>,
        /// When set, `output` is taken as already log-normalized.
        pub normalized: bool,
    }

    impl<B: Backend> StubModel<B> {
        /// A model whose output rows are already log-probabilities.
        pub fn log_probs(output: Tensor<B, 3>) -> Self {
            Self {
                output,
                extras: None,
                normalized: true,
            }
        }

        pub fn with_extras(mut self, extras: HashMap<String, Tensor<B, 1>>) -> Self {
            self.extras = Some(extras);
            self
        }
    }

    impl<B: Backend> SequenceModel<B> for StubModel<B> {
        fn forward(&self, _net_input: &HashMap<String, Tensor<B, 2, Int>>) -> NetOutput<B> {
            match &self.extras {
                Some(extras) => NetOutput::WithExtras(self.output.clone(), extras.clone()),
                None => NetOutput::Plain(self.output.clone()),
            }
        }

        fn get_normalized_probs(
            &self,
            net_output: &NetOutput<B>,
            log_probs: bool,
        ) -> Tensor<B, 3> {
            let output = net_output.output().clone();
            match (self.normalized, log_probs) {
                (true, true) => output,
                (true, false) => output.exp(),
                (false, true) => activation::log_softmax(output, 2),
                (false, false) => activation::softmax(output, 2),
            }
        }

        fn get_targets(&self, sample: &Sample<B>, _net_output: &NetOutput<B>) -> Tensor<B, 2, Int> {
            sample.target.clone()
        }
    }

    /// A sample with no model inputs, for stub-model tests.
    pub fn sample_with_targets<B: Backend>(
        target: Tensor<B, 2, Int>,
        ntokens: usize,
    ) -> Sample<B> {
        Sample::new(HashMap::new(), target, ntokens)
    }

    /// An extras map carrying a single `extra_loss` scalar.
    pub fn stub_extras<B: Backend>(
        extra_loss: f64,
        device: &B::Device,
    ) -> HashMap<String, Tensor<B, 1>> {
        let mut extras = HashMap::new();
        extras.insert(
            crate::criterion::EXTRA_LOSS_KEY.to_owned(),
            Tensor::from_data(TensorData::from([extra_loss]), device),
        );
        extras
    }
}
