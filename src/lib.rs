//! proxima - prototype-based metric learning losses
//!
//! Features:
//! - Normalized softmax loss over learned class prototypes, with
//!   temperature-scaled cosine-similarity logits
//! - Per-sample weighting from miner output (`convert_to_weights`)
//! - Pluggable weight regularization over the prototype matrix
//! - Small reverse-mode autodiff engine so gradients reach both the
//!   prototypes and the input embeddings
//!
//! # Example
//!
//! ```
//! use proxima::{MetricLoss, NormalizedSoftmaxLoss, Shape, Tensor, Variable};
//!
//! let loss_fn = NormalizedSoftmaxLoss::with_seed(0.1, 4, 3, 7)?;
//! let embeddings = Variable::constant(Tensor::randn_seeded(Shape::new([2, 4]), 13));
//! let labels = [0, 2];
//!
//! let loss = loss_fn.forward(&embeddings, &labels, None)?;
//! loss.backward()?;
//!
//! assert!(loss.item().is_finite());
//! assert!(loss_fn.weights().grad().is_some());
//! # Ok::<(), proxima::ProximaError>(())
//! ```

pub mod autograd;
pub mod error;
pub mod nn;
pub mod tensor;

pub use autograd::Variable;
pub use error::{ProximaError, ProximaResult};
pub use nn::losses::{MetricLoss, NormalizedSoftmaxConfig, NormalizedSoftmaxLoss};
pub use nn::miners::{convert_to_weights, MinedIndices};
pub use nn::regularizers::{LpRegularizer, WeightRegularizer};
pub use tensor::{Shape, Tensor};
