//! Metric learning loss functions
//!
//! Losses here operate on a batch of embeddings with integer class labels,
//! optionally weighted by the output of a miner, and produce a single
//! differentiable scalar.

pub mod normalized_softmax;

pub use normalized_softmax::{NormalizedSoftmaxConfig, NormalizedSoftmaxLoss};

use crate::autograd::Variable;
use crate::error::{ProximaError, ProximaResult};
use crate::nn::miners::MinedIndices;

/// Base trait for all metric learning losses
pub trait MetricLoss: Send + Sync {
    /// Compute the loss for a batch of embeddings.
    ///
    /// `embeddings` is (batch_size x embedding_size), `labels` holds one
    /// class id per row, and `mined` optionally carries the tuple indices
    /// selected by a miner over the same batch.
    fn forward(
        &self,
        embeddings: &Variable<2>,
        labels: &[usize],
        mined: Option<&MinedIndices>,
    ) -> ProximaResult<Variable<0>>;

    /// Get the name of the loss function
    fn name(&self) -> &'static str;
}

/// Validate the batch contract shared by all metric losses
pub(crate) fn check_batch(embeddings: &Variable<2>, labels: &[usize]) -> ProximaResult<()> {
    if labels.is_empty() {
        return Err(ProximaError::InvalidInput(
            "Batch must contain at least one sample".to_string(),
        ));
    }
    if embeddings.shape().rows() != labels.len() {
        return Err(ProximaError::ShapeError(format!(
            "Batch has {} embeddings but {} labels",
            embeddings.shape().rows(),
            labels.len()
        )));
    }
    Ok(())
}
