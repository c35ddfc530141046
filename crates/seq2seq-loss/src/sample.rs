//! Training batch record consumed by the criterions.

use std::collections::HashMap;

use burn::tensor::{backend::Backend, Int, Tensor};

/// One batch of sequence-generation training data.
///
/// Produced by the external data pipeline and read-only to this crate.
/// `net_input` is forwarded verbatim to the model; `target` holds the
/// ground-truth token ids and `ntokens` the number of non-padding tokens.
#[derive(Debug, Clone)]
pub struct Sample<B: Backend> {
    /// Named input tensors passed to the model (e.g. `src_tokens`,
    /// `prev_output_tokens`).
    pub net_input: HashMap<String, Tensor<B, 2, Int>>,
    /// Ground-truth token ids, `[batch, seq_len]`.
    pub target: Tensor<B, 2, Int>,
    /// Count of non-padding tokens in `target`.
    pub ntokens: usize,
}

impl<B: Backend> Sample<B> {
    /// Create a new sample.
    pub fn new(
        net_input: HashMap<String, Tensor<B, 2, Int>>,
        target: Tensor<B, 2, Int>,
        ntokens: usize,
    ) -> Self {
        Self {
            net_input,
            target,
            ntokens,
        }
    }

    /// Number of sentences in the batch (first target dimension).
    pub fn nsentences(&self) -> usize {
        self.target.dims()[0]
    }

    /// Total number of target positions, padding included.
    pub fn num_tokens_flat(&self) -> usize {
        let [batch, seq_len] = self.target.dims();
        batch * seq_len
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn sample_counts_sentences_and_flat_tokens() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 2, Int>::from_data(
            TensorData::from([[3, 4, 1], [5, 1, 1]]),
            &device,
        );
        let sample = Sample::new(HashMap::new(), target, 3);

        assert_eq!(sample.nsentences(), 2);
        assert_eq!(sample.num_tokens_flat(), 6);
        assert_eq!(sample.ntokens, 3);
    }
}
