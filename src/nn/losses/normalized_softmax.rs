//! Normalized softmax loss over learned class prototypes

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::autograd::Variable;
use crate::error::{ProximaError, ProximaResult};
use crate::nn::miners::{convert_to_weights, MinedIndices};
use crate::nn::regularizers::WeightRegularizer;
use crate::tensor::{Shape, Tensor};

use super::{check_batch, MetricLoss};

/// Configuration for [`NormalizedSoftmaxLoss`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSoftmaxConfig {
    /// Scalar divisor applied to the logits; smaller values sharpen the
    /// softmax distribution
    pub temperature: f32,
    /// Width of the embedding vectors
    pub embedding_size: usize,
    /// Number of classes, one prototype per class
    pub num_classes: usize,
}

impl NormalizedSoftmaxConfig {
    fn validate(&self) -> ProximaResult<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(ProximaError::ConfigurationError(format!(
                "Temperature must be strictly positive and finite, got {}",
                self.temperature
            )));
        }
        if self.embedding_size == 0 || self.num_classes == 0 {
            return Err(ProximaError::ConfigurationError(
                "Embedding size and class count must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Normalized softmax classification loss over learned class prototypes.
///
/// Each class owns one column of the trainable prototype matrix `W` of shape
/// (embedding_size x num_classes). Columns are rescaled to unit L2 norm
/// before use, so the logit for a class is the cosine similarity between
/// embedding and prototype scaled by the embedding's own norm, divided by
/// the temperature. Cross-entropy is taken per sample, weighted by the
/// miner-derived weights, and averaged; an optional regularization penalty
/// over the transposed prototype matrix is added on top.
pub struct NormalizedSoftmaxLoss {
    config: NormalizedSoftmaxConfig,
    weights: Variable<2>,
    regularizer: Option<Box<dyn WeightRegularizer>>,
    regularization_weight: f32,
}

impl NormalizedSoftmaxLoss {
    /// Create a loss with randomly initialized prototypes
    pub fn new(temperature: f32, embedding_size: usize, num_classes: usize) -> ProximaResult<Self> {
        Self::from_config(NormalizedSoftmaxConfig {
            temperature,
            embedding_size,
            num_classes,
        })
    }

    /// Create a loss from a configuration value
    pub fn from_config(config: NormalizedSoftmaxConfig) -> ProximaResult<Self> {
        config.validate()?;
        let shape = Shape::new([config.embedding_size, config.num_classes]);
        Self::with_prototypes(config, Tensor::randn(shape))
    }

    /// Deterministic prototype initialization, for reproducible runs
    pub fn with_seed(
        temperature: f32,
        embedding_size: usize,
        num_classes: usize,
        seed: u64,
    ) -> ProximaResult<Self> {
        let config = NormalizedSoftmaxConfig {
            temperature,
            embedding_size,
            num_classes,
        };
        config.validate()?;
        let shape = Shape::new([config.embedding_size, config.num_classes]);
        Self::with_prototypes(config, Tensor::randn_seeded(shape, seed))
    }

    fn with_prototypes(config: NormalizedSoftmaxConfig, prototypes: Tensor<2>) -> ProximaResult<Self> {
        debug!(
            temperature = config.temperature,
            embedding_size = config.embedding_size,
            num_classes = config.num_classes,
            "created normalized softmax loss"
        );
        Ok(Self {
            config,
            weights: Variable::parameter(prototypes),
            regularizer: None,
            regularization_weight: 1.0,
        })
    }

    /// Attach a penalty over the transposed prototype matrix
    pub fn with_regularizer(mut self, regularizer: Box<dyn WeightRegularizer>) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    /// Scale the regularization contribution (default 1.0; 0 disables it)
    pub fn with_regularization_weight(mut self, weight: f32) -> Self {
        self.regularization_weight = weight;
        self
    }

    pub fn config(&self) -> NormalizedSoftmaxConfig {
        self.config
    }

    pub fn temperature(&self) -> f32 {
        self.config.temperature
    }

    /// Trainable prototype matrix as a graph variable
    pub fn weights(&self) -> &Variable<2> {
        &self.weights
    }

    /// Current prototype values
    pub fn prototypes(&self) -> &Tensor<2> {
        self.weights.tensor()
    }

    /// Replace the prototype matrix, e.g. when restoring a checkpoint or
    /// applying an optimizer step. The new values become a fresh leaf
    /// parameter with no accumulated gradient.
    pub fn load_prototypes(&mut self, prototypes: Tensor<2>) -> ProximaResult<()> {
        let expected = Shape::new([self.config.embedding_size, self.config.num_classes]);
        if prototypes.shape() != expected {
            return Err(ProximaError::ShapeError(format!(
                "Expected prototypes of shape {}, got {}",
                expected,
                prototypes.shape()
            )));
        }
        if !prototypes.as_slice().iter().all(|v| v.is_finite()) {
            return Err(ProximaError::InvalidInput(
                "Prototype values must be finite".to_string(),
            ));
        }
        self.weights = Variable::parameter(prototypes);
        Ok(())
    }

    /// Clear the accumulated prototype gradient
    pub fn zero_grad(&self) {
        self.weights.zero_grad();
    }
}

impl MetricLoss for NormalizedSoftmaxLoss {
    fn forward(
        &self,
        embeddings: &Variable<2>,
        labels: &[usize],
        mined: Option<&MinedIndices>,
    ) -> ProximaResult<Variable<0>> {
        check_batch(embeddings, labels)?;
        if embeddings.shape().cols() != self.config.embedding_size {
            return Err(ProximaError::ShapeError(format!(
                "Expected embeddings of width {}, got {}",
                self.config.embedding_size,
                embeddings.shape().cols()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= self.config.num_classes) {
            return Err(ProximaError::InvalidInput(format!(
                "Label {} is out of range for {} classes",
                bad, self.config.num_classes
            )));
        }

        let miner_weights = convert_to_weights(mined, labels.len())?;
        let normalized = self.weights.normalize_columns()?;
        let logits = embeddings
            .matmul(&normalized)?
            .scale(1.0 / self.config.temperature)?;
        let unweighted = logits.cross_entropy_with_labels(labels)?;
        let loss = unweighted.mul_weights(&miner_weights)?.mean()?;

        let total = match &self.regularizer {
            Some(regularizer) if self.regularization_weight != 0.0 => {
                let penalty = regularizer.penalty(&self.weights.transpose()?)?;
                loss.add(&penalty.scale(self.regularization_weight)?)?
            }
            _ => loss,
        };
        trace!(
            batch_size = labels.len(),
            loss = total.item(),
            "normalized softmax forward"
        );
        Ok(total)
    }

    fn name(&self) -> &'static str {
        "NormalizedSoftmaxLoss"
    }
}
