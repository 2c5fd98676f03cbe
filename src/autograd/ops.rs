//! High-level operations that integrate with automatic differentiation
//!
//! Each method computes its forward value through the tensor kernels and,
//! when an input participates in the graph, wires a node whose backward
//! function is the exact adjoint of that kernel.

use crate::error::{ProximaError, ProximaResult};
use crate::tensor::{ops as kernels, Shape, Tensor};

use super::function::{
    AddBackward, CrossEntropyBackward, LpNormRowsBackward, MatMulBackward, MeanBackward,
    NormalizeColumnsBackward, PowBackward, ScaleBackward, TransposeBackward, WeightBackward,
};
use super::graph::GraphNode;
use super::variable::Variable;

impl Variable<2> {
    /// Matrix product with automatic differentiation
    pub fn matmul(&self, other: &Variable<2>) -> ProximaResult<Variable<2>> {
        let out = kernels::matmul(self.tensor(), other.tensor())?;
        let needs = [self.requires_grad(), other.requires_grad()];
        if !needs[0] && !needs[1] {
            return Ok(Variable::constant(out));
        }
        let (m, k) = (self.shape().rows(), self.shape().cols());
        let n = other.shape().cols();
        let grad_fn = MatMulBackward::new(
            self.tensor().storage(),
            other.tensor().storage(),
            m,
            k,
            n,
            needs,
        );
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned(), other.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }

    /// Transpose with automatic differentiation
    pub fn transpose(&self) -> ProximaResult<Variable<2>> {
        let out = kernels::transpose(self.tensor());
        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let grad_fn = TransposeBackward::new(self.shape().rows(), self.shape().cols());
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }

    /// Rescale every column to unit L2 norm
    pub fn normalize_columns(&self) -> ProximaResult<Variable<2>> {
        let (out, norms) = kernels::normalize_columns(self.tensor());
        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let grad_fn = NormalizeColumnsBackward::new(
            out.storage(),
            norms,
            self.shape().rows(),
            self.shape().cols(),
        );
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }

    /// Per-sample softmax cross-entropy from logits, with NO reduction.
    ///
    /// Returns one loss value per row so callers can weight samples before
    /// aggregating.
    pub fn cross_entropy_with_labels(&self, labels: &[usize]) -> ProximaResult<Variable<1>> {
        let (rows, cols) = (self.shape().rows(), self.shape().cols());
        if labels.len() != rows {
            return Err(ProximaError::ShapeError(format!(
                "Expected one label per logit row: {} rows, {} labels",
                rows,
                labels.len()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= cols) {
            return Err(ProximaError::InvalidInput(format!(
                "Label {} is out of range for {} classes",
                bad, cols
            )));
        }

        let log_probs = kernels::log_softmax_rows(self.tensor());
        let lp = log_probs.as_slice();
        let losses: Vec<f32> = labels
            .iter()
            .enumerate()
            .map(|(i, &label)| -lp[i * cols + label])
            .collect();
        let out = Tensor::from_parts(losses, Shape::new([rows]));

        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let probs = lp.iter().map(|&v| v.exp()).collect();
        let grad_fn = CrossEntropyBackward::new(probs, labels.to_vec(), cols);
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }

    /// Per-row Lp norm, p >= 1
    pub fn lp_norm_rows(&self, p: f32) -> ProximaResult<Variable<1>> {
        if !p.is_finite() || p < 1.0 {
            return Err(ProximaError::InvalidInput(format!(
                "Lp norm requires p >= 1, got {}",
                p
            )));
        }
        let out = kernels::lp_norm_rows(self.tensor(), p);
        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let grad_fn = LpNormRowsBackward::new(
            self.tensor().storage(),
            out.to_vec(),
            p,
            self.shape().cols(),
        );
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }
}

impl Variable<1> {
    /// Elementwise product with a constant weight vector.
    ///
    /// The weights are treated as data, not as a graph participant; no
    /// gradient flows into them.
    pub fn mul_weights(&self, weights: &Tensor<1>) -> ProximaResult<Variable<1>> {
        let out = kernels::mul_vec(self.tensor(), weights)?;
        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let grad_fn = WeightBackward::new(weights.storage());
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }

    /// Elementwise power
    pub fn powf(&self, exponent: f32) -> ProximaResult<Variable<1>> {
        let data = self
            .tensor()
            .as_slice()
            .iter()
            .map(|&v| v.powf(exponent))
            .collect();
        let out = Tensor::from_parts(data, self.shape());
        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let grad_fn = PowBackward::new(self.tensor().storage(), exponent);
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }
}

impl<const DIMS: usize> Variable<DIMS> {
    /// Multiply every element by a scalar
    pub fn scale(&self, factor: f32) -> ProximaResult<Variable<DIMS>> {
        let out = kernels::scale(self.tensor(), factor);
        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let grad_fn = ScaleBackward::new(factor);
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }

    /// Elementwise sum of two same-shape variables
    pub fn add(&self, other: &Variable<DIMS>) -> ProximaResult<Variable<DIMS>> {
        let out = kernels::add(self.tensor(), other.tensor())?;
        let needs = [self.requires_grad(), other.requires_grad()];
        if !needs[0] && !needs[1] {
            return Ok(Variable::constant(out));
        }
        let grad_fn = AddBackward::new(needs);
        let node = GraphNode::op(
            out.numel(),
            vec![self.node().cloned(), other.node().cloned()],
            Box::new(grad_fn),
        );
        Ok(Variable::from_op(out, node))
    }

    /// Mean over all elements
    pub fn mean(&self) -> ProximaResult<Variable<0>> {
        if self.numel() == 0 {
            return Err(ProximaError::ComputationError(
                "Cannot take the mean of an empty variable".to_string(),
            ));
        }
        let out = Tensor::scalar(kernels::mean_slice(self.tensor().as_slice()));
        if !self.requires_grad() {
            return Ok(Variable::constant(out));
        }
        let grad_fn = MeanBackward::new(self.numel());
        let node = GraphNode::op(1, vec![self.node().cloned()], Box::new(grad_fn));
        Ok(Variable::from_op(out, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FD_STEP: f32 = 1e-2;
    const FD_TOL: f32 = 1e-2;

    /// Central finite differences of a scalar function of a flat buffer
    fn numeric_grad(f: impl Fn(&[f32]) -> f32, x: &[f32]) -> Vec<f32> {
        let mut grad = vec![0.0f32; x.len()];
        let mut buf = x.to_vec();
        for i in 0..x.len() {
            let orig = buf[i];
            buf[i] = orig + FD_STEP;
            let plus = f(&buf);
            buf[i] = orig - FD_STEP;
            let minus = f(&buf);
            buf[i] = orig;
            grad[i] = (plus - minus) / (2.0 * FD_STEP);
        }
        grad
    }

    fn assert_close(analytic: &[f32], numeric: &[f32]) {
        assert_eq!(analytic.len(), numeric.len());
        for (i, (&a, &n)) in analytic.iter().zip(numeric).enumerate() {
            assert!(
                (a - n).abs() < FD_TOL,
                "gradient mismatch at {}: analytic {} vs numeric {}",
                i,
                a,
                n
            );
        }
    }

    #[test]
    fn test_matmul_gradients_match_finite_differences() {
        let a_data = vec![0.5, -1.0, 2.0, 1.5, 0.3, -0.7];
        let b_data = vec![1.0, 0.5, -0.5, 2.0, 0.8, -1.2];
        let a = Variable::parameter(Tensor::from_vec(a_data.clone(), Shape::new([2, 3])).unwrap());
        let b = Variable::parameter(Tensor::from_vec(b_data.clone(), Shape::new([3, 2])).unwrap());

        let loss = a.matmul(&b).unwrap().mean().unwrap();
        loss.backward().unwrap();

        let numeric_a = numeric_grad(
            |x| {
                let a = Variable::constant(Tensor::from_vec(x.to_vec(), Shape::new([2, 3])).unwrap());
                let b = Variable::constant(Tensor::from_vec(b_data.clone(), Shape::new([3, 2])).unwrap());
                a.matmul(&b).unwrap().mean().unwrap().item()
            },
            &a_data,
        );
        let numeric_b = numeric_grad(
            |x| {
                let a = Variable::constant(Tensor::from_vec(a_data.clone(), Shape::new([2, 3])).unwrap());
                let b = Variable::constant(Tensor::from_vec(x.to_vec(), Shape::new([3, 2])).unwrap());
                a.matmul(&b).unwrap().mean().unwrap().item()
            },
            &b_data,
        );

        assert_close(a.grad().unwrap().as_slice(), &numeric_a);
        assert_close(b.grad().unwrap().as_slice(), &numeric_b);
    }

    #[test]
    fn test_normalize_columns_gradients_match_finite_differences() {
        let w_data = vec![0.8, -0.4, 1.2, 0.9, -1.1, 0.6];
        let w = Variable::parameter(Tensor::from_vec(w_data.clone(), Shape::new([3, 2])).unwrap());

        // Project against an asymmetric probe so the gradient is not
        // annihilated by the normalization symmetry.
        let probe = Variable::constant(Tensor::from_vec(vec![1.0, -2.0], Shape::new([2, 1])).unwrap());
        let scalar = w
            .normalize_columns()
            .unwrap()
            .matmul(&probe)
            .unwrap()
            .mean()
            .unwrap();
        scalar.backward().unwrap();

        let numeric = numeric_grad(
            |x| {
                let w = Variable::constant(Tensor::from_vec(x.to_vec(), Shape::new([3, 2])).unwrap());
                let probe = Variable::constant(
                    Tensor::from_vec(vec![1.0, -2.0], Shape::new([2, 1])).unwrap(),
                );
                w.normalize_columns()
                    .unwrap()
                    .matmul(&probe)
                    .unwrap()
                    .mean()
                    .unwrap()
                    .item()
            },
            &w_data,
        );

        assert_close(w.grad().unwrap().as_slice(), &numeric);
    }

    #[test]
    fn test_cross_entropy_gradient_is_probs_minus_onehot() {
        let z_data = vec![0.2, -0.4, 1.1, -0.9, 0.7, 0.1];
        let labels = [2usize, 0];
        let z = Variable::parameter(Tensor::from_vec(z_data.clone(), Shape::new([2, 3])).unwrap());

        let loss = z.cross_entropy_with_labels(&labels).unwrap().mean().unwrap();
        loss.backward().unwrap();
        let grad = z.grad().unwrap();

        let log_probs = kernels::log_softmax_rows(
            &Tensor::from_vec(z_data.clone(), Shape::new([2, 3])).unwrap(),
        );
        for i in 0..2 {
            for j in 0..3 {
                let p = log_probs.get(i, j).exp();
                let indicator = if j == labels[i] { 1.0 } else { 0.0 };
                let expected = (p - indicator) / 2.0;
                assert!((grad.get(i, j) - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_cross_entropy_rejects_bad_labels() {
        let z = Variable::constant(Tensor::zeros(Shape::new([2, 3])));
        assert!(z.cross_entropy_with_labels(&[0]).is_err());
        assert!(z.cross_entropy_with_labels(&[0, 3]).is_err());
    }

    #[test]
    fn test_lp_norm_and_pow_gradients_match_finite_differences() {
        let x_data = vec![0.6, -1.3, 0.8, 2.1, -0.2, 0.9];
        let x = Variable::parameter(Tensor::from_vec(x_data.clone(), Shape::new([2, 3])).unwrap());

        let loss = x.lp_norm_rows(2.0).unwrap().powf(2.0).unwrap().mean().unwrap();
        loss.backward().unwrap();

        let numeric = numeric_grad(
            |v| {
                let x = Variable::constant(Tensor::from_vec(v.to_vec(), Shape::new([2, 3])).unwrap());
                x.lp_norm_rows(2.0)
                    .unwrap()
                    .powf(2.0)
                    .unwrap()
                    .mean()
                    .unwrap()
                    .item()
            },
            &x_data,
        );

        assert_close(x.grad().unwrap().as_slice(), &numeric);
    }

    #[test]
    fn test_scale_mean_and_weighting_chain() {
        let x = Variable::parameter(Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], Shape::new([4])).unwrap());
        let weights = Tensor::from_vec(vec![1.0, 0.0, 2.0, 0.5], Shape::new([4])).unwrap();

        let loss = x.mul_weights(&weights).unwrap().scale(2.0).unwrap().mean().unwrap();
        // mean(2 * x * w) = (2*1 + 0 + 2*6 + 2*2) / 4 = 4.5
        assert!((loss.item() - 4.5).abs() < 1e-6);

        loss.backward().unwrap();
        // d/dx_i = 2 * w_i / 4
        assert_close(x.grad().unwrap().as_slice(), &[0.5, 0.0, 1.0, 0.25]);
    }

    #[test]
    fn test_operations_on_constants_stay_out_of_graph() {
        let a = Variable::constant(Tensor::ones(Shape::new([2, 2])));
        let b = Variable::constant(Tensor::ones(Shape::new([2, 2])));
        let c = a.matmul(&b).unwrap();
        assert!(!c.requires_grad());
        assert!(c.mean().unwrap().backward().is_err());
    }

    #[test]
    fn test_transpose_gradient_flows_back() {
        let x_data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x = Variable::parameter(Tensor::from_vec(x_data.clone(), Shape::new([2, 3])).unwrap());
        let probe = Variable::constant(Tensor::from_vec(vec![1.0, -1.0], Shape::new([2, 1])).unwrap());

        let loss = x.transpose().unwrap().matmul(&probe).unwrap().mean().unwrap();
        loss.backward().unwrap();

        let numeric = numeric_grad(
            |v| {
                let x = Variable::constant(Tensor::from_vec(v.to_vec(), Shape::new([2, 3])).unwrap());
                let probe = Variable::constant(
                    Tensor::from_vec(vec![1.0, -1.0], Shape::new([2, 1])).unwrap(),
                );
                x.transpose().unwrap().matmul(&probe).unwrap().mean().unwrap().item()
            },
            &x_data,
        );

        assert_close(x.grad().unwrap().as_slice(), &numeric);
    }

    #[test]
    fn test_gradient_accumulation_until_zeroed() {
        let x = Variable::parameter(Tensor::from_vec(vec![1.0, 2.0], Shape::new([2])).unwrap());
        let loss = x.scale(3.0).unwrap().mean().unwrap();

        loss.backward().unwrap();
        let first = x.grad().unwrap().to_vec();
        loss.backward().unwrap();
        let second = x.grad().unwrap().to_vec();
        for (a, b) in first.iter().zip(&second) {
            assert!((b - 2.0 * a).abs() < 1e-6);
        }

        x.zero_grad();
        assert!(x.grad().is_none());
    }
}
