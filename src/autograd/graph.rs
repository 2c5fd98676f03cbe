//! Computation graph for reverse-mode automatic differentiation
//!
//! Nodes are rank-erased: each one records its element count, its parents,
//! and the backward function that pushes a flat gradient buffer to those
//! parents. Variables keep their nodes alive through `Arc`, so a graph
//! lives exactly as long as something still references its outputs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProximaError, ProximaResult};

use super::function::Function;

pub type NodeId = usize;

static NEXT_NODE_ID: AtomicUsize = AtomicUsize::new(0);

fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A node in the computation graph: one tensor-valued intermediate plus the
/// recipe for pushing gradients back to its parents.
pub struct GraphNode {
    id: NodeId,
    numel: usize,
    is_leaf: bool,
    // One slot per gradient produced by the backward function; a slot is
    // None when that input does not participate in the graph.
    parents: Vec<Option<Arc<GraphNode>>>,
    grad_fn: Option<Box<dyn Function + Send + Sync>>,
    grad: Mutex<Option<Vec<f32>>>,
}

impl GraphNode {
    /// Create a leaf node that accumulates gradients across backward passes
    pub fn leaf(numel: usize) -> Arc<Self> {
        Arc::new(Self {
            id: next_node_id(),
            numel,
            is_leaf: true,
            parents: Vec::new(),
            grad_fn: None,
            grad: Mutex::new(None),
        })
    }

    /// Create an operation node
    pub fn op(
        numel: usize,
        parents: Vec<Option<Arc<GraphNode>>>,
        grad_fn: Box<dyn Function + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_node_id(),
            numel,
            is_leaf: false,
            parents,
            grad_fn: Some(grad_fn),
            grad: Mutex::new(None),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Copy of the accumulated gradient, if any
    pub fn grad(&self) -> Option<Vec<f32>> {
        self.grad.lock().clone()
    }

    /// Clear the accumulated gradient
    pub fn zero_grad(&self) {
        *self.grad.lock() = None;
    }

    fn accumulate(&self, incoming: &[f32]) -> ProximaResult<()> {
        if incoming.len() != self.numel {
            return Err(ProximaError::ComputationError(format!(
                "Gradient length {} does not match node size {}",
                incoming.len(),
                self.numel
            )));
        }
        let mut slot = self.grad.lock();
        match slot.as_mut() {
            Some(existing) => {
                for (e, &g) in existing.iter_mut().zip(incoming) {
                    *e += g;
                }
            }
            None => *slot = Some(incoming.to_vec()),
        }
        Ok(())
    }
}

/// Run a backward sweep from a scalar root node.
///
/// Gradients of interior nodes are consumed during the sweep; leaf nodes
/// keep accumulating until explicitly zeroed, so repeated backward calls
/// add up.
pub fn backward(root: &Arc<GraphNode>) -> ProximaResult<()> {
    if root.numel != 1 {
        return Err(ProximaError::ComputationError(
            "Backward pass must start from a scalar".to_string(),
        ));
    }
    root.accumulate(&[1.0])?;

    let mut order = Vec::new();
    let mut visited = HashSet::new();
    topological_sort(root, &mut visited, &mut order);

    // Reverse topological order guarantees every child has pushed its
    // contribution before a node's gradient is consumed.
    for node in order.iter().rev() {
        if node.is_leaf {
            continue;
        }
        let grad = match node.grad.lock().take() {
            Some(g) => g,
            None => continue,
        };
        let grad_fn = match &node.grad_fn {
            Some(f) => f,
            None => continue,
        };
        let parent_grads = grad_fn.backward(&grad)?;
        if parent_grads.len() != node.parents.len() {
            return Err(ProximaError::ComputationError(format!(
                "{} produced {} gradients for {} parents",
                grad_fn.name(),
                parent_grads.len(),
                node.parents.len()
            )));
        }
        for (parent, parent_grad) in node.parents.iter().zip(parent_grads) {
            if let (Some(parent), Some(parent_grad)) = (parent, parent_grad) {
                parent.accumulate(&parent_grad)?;
            }
        }
    }
    Ok(())
}

fn topological_sort(
    node: &Arc<GraphNode>,
    visited: &mut HashSet<NodeId>,
    order: &mut Vec<Arc<GraphNode>>,
) {
    if !visited.insert(node.id) {
        return;
    }
    for parent in node.parents.iter().flatten() {
        topological_sort(parent, visited, order);
    }
    order.push(node.clone());
}
