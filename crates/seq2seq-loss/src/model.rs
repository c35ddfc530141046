//! Model-side collaborator interface.
//!
//! The criterions never inspect model internals; they only rely on the
//! capabilities declared here. Whether a model carries an auxiliary loss is
//! part of its declared output type rather than a runtime shape check.

use std::collections::HashMap;

use burn::tensor::{backend::Backend, Int, Tensor};

use crate::sample::Sample;

/// Output of one model forward pass.
///
/// Models without an auxiliary loss return [`NetOutput::Plain`]; models that
/// append one return [`NetOutput::WithExtras`] with the auxiliary tensors
/// keyed by name. An extras map without an `extra_loss` entry is a usage
/// error when paired with the extra-loss criterions.
#[derive(Debug, Clone)]
pub enum NetOutput<B: Backend> {
    /// Decoder output only, `[batch, seq_len, vocab]`.
    Plain(Tensor<B, 3>),
    /// Decoder output plus named auxiliary scalar tensors.
    WithExtras(Tensor<B, 3>, HashMap<String, Tensor<B, 1>>),
}

impl<B: Backend> NetOutput<B> {
    /// The primary (logits-like) output, regardless of variant.
    pub fn output(&self) -> &Tensor<B, 3> {
        match self {
            Self::Plain(output) | Self::WithExtras(output, _) => output,
        }
    }
}

/// Capabilities a sequence-generation model must expose to the criterions.
pub trait SequenceModel<B: Backend> {
    /// Run the model on the batch's named inputs.
    fn forward(&self, net_input: &HashMap<String, Tensor<B, 2, Int>>) -> NetOutput<B>;

    /// Normalized probabilities over the vocabulary, `[batch, seq_len, vocab]`.
    ///
    /// With `log_probs` set the rows are log-normalized.
    fn get_normalized_probs(&self, net_output: &NetOutput<B>, log_probs: bool) -> Tensor<B, 3>;

    /// Target token ids for the given sample, `[batch, seq_len]`.
    fn get_targets(&self, sample: &Sample<B>, net_output: &NetOutput<B>) -> Tensor<B, 2, Int>;
}
