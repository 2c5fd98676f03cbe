//! Backward functions for the differentiable operation set
//!
//! Each struct saves exactly the forward values its adjoint needs and
//! implements [`Function`] to map an upstream gradient to per-parent
//! gradients. The slot order must match the parent order wired by the
//! operation layer.

use std::sync::Arc;

use crate::error::ProximaResult;
use crate::tensor::ops::{matmul_nt, matmul_tn, NORM_EPS};

/// Trait for backward passes through a single operation
pub trait Function {
    /// Map the gradient of the output to gradients for each parent slot
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>>;

    /// Get function name for debugging
    fn name(&self) -> &'static str;
}

/// C = A @ B, so dA = dC @ Bᵀ and dB = Aᵀ @ dC
pub struct MatMulBackward {
    lhs: Arc<Vec<f32>>,
    rhs: Arc<Vec<f32>>,
    m: usize,
    k: usize,
    n: usize,
    needs: [bool; 2],
}

impl MatMulBackward {
    pub fn new(
        lhs: Arc<Vec<f32>>,
        rhs: Arc<Vec<f32>>,
        m: usize,
        k: usize,
        n: usize,
        needs: [bool; 2],
    ) -> Self {
        Self {
            lhs,
            rhs,
            m,
            k,
            n,
            needs,
        }
    }
}

impl Function for MatMulBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        let da = self
            .needs[0]
            .then(|| matmul_nt(grad_output, &self.rhs, self.m, self.n, self.k));
        let db = self
            .needs[1]
            .then(|| matmul_tn(&self.lhs, grad_output, self.m, self.k, self.n));
        Ok(vec![da, db])
    }

    fn name(&self) -> &'static str {
        "MatMulBackward"
    }
}

/// Y = Xᵀ, so dX = dYᵀ
pub struct TransposeBackward {
    rows: usize,
    cols: usize,
}

impl TransposeBackward {
    /// `rows`/`cols` describe the ORIGINAL input shape
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}

impl Function for TransposeBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        // grad_output has the transposed shape (cols x rows)
        let mut grad = vec![0.0f32; self.rows * self.cols];
        for j in 0..self.cols {
            for i in 0..self.rows {
                grad[i * self.cols + j] = grad_output[j * self.rows + i];
            }
        }
        Ok(vec![Some(grad)])
    }

    fn name(&self) -> &'static str {
        "TransposeBackward"
    }
}

/// Column rescaling y_j = w_j / n_j with n_j = max(|w_j|, eps).
///
/// Per column: dW = (dY - y (y . dY)) / n
pub struct NormalizeColumnsBackward {
    normalized: Arc<Vec<f32>>,
    norms: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl NormalizeColumnsBackward {
    pub fn new(normalized: Arc<Vec<f32>>, norms: Vec<f32>, rows: usize, cols: usize) -> Self {
        Self {
            normalized,
            norms,
            rows,
            cols,
        }
    }
}

impl Function for NormalizeColumnsBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        let (d, c) = (self.rows, self.cols);
        let y = self.normalized.as_slice();
        let mut grad = vec![0.0f32; d * c];
        for j in 0..c {
            let mut dot = 0.0f64;
            for i in 0..d {
                dot += f64::from(y[i * c + j]) * f64::from(grad_output[i * c + j]);
            }
            let dot = dot as f32;
            for i in 0..d {
                grad[i * c + j] = (grad_output[i * c + j] - y[i * c + j] * dot) / self.norms[j];
            }
        }
        Ok(vec![Some(grad)])
    }

    fn name(&self) -> &'static str {
        "NormalizeColumnsBackward"
    }
}

/// Y = s * X, so dX = s * dY
pub struct ScaleBackward {
    factor: f32,
}

impl ScaleBackward {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl Function for ScaleBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        Ok(vec![Some(
            grad_output.iter().map(|&g| g * self.factor).collect(),
        )])
    }

    fn name(&self) -> &'static str {
        "ScaleBackward"
    }
}

/// Per-sample softmax cross-entropy from logits: dZ_ij = g_i * (p_ij - [j == label_i])
pub struct CrossEntropyBackward {
    probs: Vec<f32>,
    labels: Vec<usize>,
    classes: usize,
}

impl CrossEntropyBackward {
    pub fn new(probs: Vec<f32>, labels: Vec<usize>, classes: usize) -> Self {
        Self {
            probs,
            labels,
            classes,
        }
    }
}

impl Function for CrossEntropyBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        let c = self.classes;
        let mut grad = vec![0.0f32; self.labels.len() * c];
        for (i, (&label, &g)) in self.labels.iter().zip(grad_output).enumerate() {
            let row = &mut grad[i * c..(i + 1) * c];
            for (j, out) in row.iter_mut().enumerate() {
                let indicator = if j == label { 1.0 } else { 0.0 };
                *out = g * (self.probs[i * c + j] - indicator);
            }
        }
        Ok(vec![Some(grad)])
    }

    fn name(&self) -> &'static str {
        "CrossEntropyBackward"
    }
}

/// Y = X * w elementwise against a constant weight vector, so dX = dY * w
pub struct WeightBackward {
    weights: Arc<Vec<f32>>,
}

impl WeightBackward {
    pub fn new(weights: Arc<Vec<f32>>) -> Self {
        Self { weights }
    }
}

impl Function for WeightBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        Ok(vec![Some(
            grad_output
                .iter()
                .zip(self.weights.iter())
                .map(|(&g, &w)| g * w)
                .collect(),
        )])
    }

    fn name(&self) -> &'static str {
        "WeightBackward"
    }
}

/// y = mean(X), so dX_i = dy / n
pub struct MeanBackward {
    len: usize,
}

impl MeanBackward {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Function for MeanBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        let g = grad_output[0] / self.len as f32;
        Ok(vec![Some(vec![g; self.len])])
    }

    fn name(&self) -> &'static str {
        "MeanBackward"
    }
}

/// C = A + B, so both parents receive dC unchanged
pub struct AddBackward {
    needs: [bool; 2],
}

impl AddBackward {
    pub fn new(needs: [bool; 2]) -> Self {
        Self { needs }
    }
}

impl Function for AddBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        let da = self.needs[0].then(|| grad_output.to_vec());
        let db = self.needs[1].then(|| grad_output.to_vec());
        Ok(vec![da, db])
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// n_i = |row_i|_p, so dX_ij = g_i * sign(x_ij) |x_ij|^(p-1) n_i^(1-p)
pub struct LpNormRowsBackward {
    input: Arc<Vec<f32>>,
    norms: Vec<f32>,
    p: f32,
    cols: usize,
}

impl LpNormRowsBackward {
    pub fn new(input: Arc<Vec<f32>>, norms: Vec<f32>, p: f32, cols: usize) -> Self {
        Self {
            input,
            norms,
            p,
            cols,
        }
    }
}

impl Function for LpNormRowsBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        let c = self.cols;
        let p = f64::from(self.p);
        let mut grad = vec![0.0f32; self.norms.len() * c];
        for (i, (&norm, &g)) in self.norms.iter().zip(grad_output).enumerate() {
            // An all-zero row has no usable direction; its gradient stays 0.
            if norm <= NORM_EPS {
                continue;
            }
            let norm_term = f64::from(norm).powf(1.0 - p);
            for j in 0..c {
                let x = f64::from(self.input[i * c + j]);
                let magnitude = x.abs().powf(p - 1.0) * norm_term;
                grad[i * c + j] = (f64::from(g) * x.signum() * magnitude) as f32;
            }
        }
        Ok(vec![Some(grad)])
    }

    fn name(&self) -> &'static str {
        "LpNormRowsBackward"
    }
}

/// y_i = x_i^a, so dx_i = a * x_i^(a-1) * dy_i
pub struct PowBackward {
    input: Arc<Vec<f32>>,
    exponent: f32,
}

impl PowBackward {
    pub fn new(input: Arc<Vec<f32>>, exponent: f32) -> Self {
        Self { input, exponent }
    }
}

impl Function for PowBackward {
    fn backward(&self, grad_output: &[f32]) -> ProximaResult<Vec<Option<Vec<f32>>>> {
        let a = self.exponent;
        let grad = self
            .input
            .iter()
            .zip(grad_output)
            .map(|(&x, &g)| {
                if x == 0.0 {
                    0.0
                } else {
                    a * x.powf(a - 1.0) * g
                }
            })
            .collect();
        Ok(vec![Some(grad)])
    }

    fn name(&self) -> &'static str {
        "PowBackward"
    }
}
