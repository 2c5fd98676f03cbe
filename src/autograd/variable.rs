//! Variable wrapper for tensors in the computation graph

use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::error::{ProximaError, ProximaResult};
use crate::tensor::{Shape, Tensor};

use super::graph::{self, GraphNode};

/// A tensor that can participate in automatic differentiation.
///
/// A variable holds a node iff its value (transitively) depends on a
/// parameter; plain constants carry no graph at all.
#[derive(Clone)]
pub struct Variable<const DIMS: usize> {
    tensor: Tensor<DIMS>,
    node: Option<Arc<GraphNode>>,
    requires_grad: bool,
}

impl<const DIMS: usize> Variable<DIMS> {
    /// Create a trainable leaf that accumulates gradients
    pub fn parameter(tensor: Tensor<DIMS>) -> Self {
        let node = GraphNode::leaf(tensor.numel());
        Self {
            tensor,
            node: Some(node),
            requires_grad: true,
        }
    }

    /// Create a variable outside the computation graph
    pub fn constant(tensor: Tensor<DIMS>) -> Self {
        Self {
            tensor,
            node: None,
            requires_grad: false,
        }
    }

    /// Wrap the output of a differentiable operation
    pub(crate) fn from_op(tensor: Tensor<DIMS>, node: Arc<GraphNode>) -> Self {
        Self {
            tensor,
            node: Some(node),
            requires_grad: true,
        }
    }

    /// Get reference to the underlying tensor
    pub fn tensor(&self) -> &Tensor<DIMS> {
        &self.tensor
    }

    /// Get the variable's shape
    pub fn shape(&self) -> Shape<DIMS> {
        self.tensor.shape()
    }

    /// Get number of elements
    pub fn numel(&self) -> usize {
        self.tensor.numel()
    }

    /// Check if the variable participates in gradient computation
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Check if the variable is a leaf node
    pub fn is_leaf(&self) -> bool {
        self.node.as_ref().map_or(false, |n| n.is_leaf())
    }

    pub(crate) fn node(&self) -> Option<&Arc<GraphNode>> {
        self.node.as_ref()
    }

    /// Accumulated gradient with respect to this variable, if any
    pub fn grad(&self) -> Option<Tensor<DIMS>> {
        let node = self.node.as_ref()?;
        let grad = node.grad()?;
        Some(Tensor::from_parts(grad, self.tensor.shape()))
    }

    /// Clear the accumulated gradient
    pub fn zero_grad(&self) {
        if let Some(node) = &self.node {
            node.zero_grad();
        }
    }

    /// Detach from the computation graph
    pub fn detach(&self) -> Self {
        Self::constant(self.tensor.clone())
    }
}

impl Variable<0> {
    /// Extract the scalar value
    pub fn item(&self) -> f32 {
        self.tensor.item()
    }

    /// Run a backward pass from this scalar, accumulating leaf gradients
    pub fn backward(&self) -> ProximaResult<()> {
        match &self.node {
            Some(node) => graph::backward(node),
            None => Err(ProximaError::ComputationError(
                "Cannot backpropagate through a variable with no graph".to_string(),
            )),
        }
    }
}

impl<const DIMS: usize> Debug for Variable<DIMS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("shape", &self.tensor.shape())
            .field("requires_grad", &self.requires_grad)
            .field("is_leaf", &self.is_leaf())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_is_leaf() {
        let var = Variable::parameter(Tensor::zeros(Shape::new([2, 3])));
        assert!(var.requires_grad());
        assert!(var.is_leaf());
        assert_eq!(var.shape().dims, [2, 3]);
        assert!(var.grad().is_none());
    }

    #[test]
    fn test_constant_has_no_graph() {
        let var = Variable::constant(Tensor::ones(Shape::new([4])));
        assert!(!var.requires_grad());
        assert!(!var.is_leaf());
        assert!(var.grad().is_none());
    }

    #[test]
    fn test_detach_drops_graph() {
        let var = Variable::parameter(Tensor::ones(Shape::new([2])));
        let detached = var.detach();
        assert!(!detached.requires_grad());
        assert_eq!(detached.tensor().as_slice(), var.tensor().as_slice());
    }

    #[test]
    fn test_backward_without_graph_fails() {
        let var = Variable::constant(Tensor::scalar(1.0));
        assert!(var.backward().is_err());
    }
}
