//! CPU kernels shared by the differentiable operation layer
//!
//! These routines are pure forward computations over tensor storage. The
//! autograd layer wires them into the computation graph and pairs each with
//! its adjoint. Reductions accumulate in `f64` before narrowing back to `f32`.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{ProximaError, ProximaResult};

use super::core::{Shape, Tensor};

/// Lower clamp applied to column norms before rescaling, so zero columns
/// stay finite.
pub const NORM_EPS: f32 = 1e-12;

/// Matrix product of an (m x k) and a (k x n) tensor
pub fn matmul(a: &Tensor<2>, b: &Tensor<2>) -> ProximaResult<Tensor<2>> {
    let (m, k) = (a.shape().rows(), a.shape().cols());
    let (k2, n) = (b.shape().rows(), b.shape().cols());
    if k != k2 {
        return Err(ProximaError::ShapeError(format!(
            "Incompatible shapes for matmul: {} and {}",
            a.shape(),
            b.shape()
        )));
    }
    let out = matmul_raw(a.as_slice(), b.as_slice(), m, k, n);
    Ok(Tensor::from_parts(out, Shape::new([m, n])))
}

/// Raw row-major matmul kernel: (m x k) @ (k x n)
pub(crate) fn matmul_raw(lhs: &[f32], rhs: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; m * n];
    let fill_row = |(i, row): (usize, &mut [f32])| {
        let a_row = &lhs[i * k..(i + 1) * k];
        for (j, out_v) in row.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for (p, &a_v) in a_row.iter().enumerate() {
                acc += f64::from(a_v) * f64::from(rhs[p * n + j]);
            }
            *out_v = acc as f32;
        }
    };
    #[cfg(feature = "parallel")]
    out.par_chunks_mut(n.max(1)).enumerate().for_each(fill_row);
    #[cfg(not(feature = "parallel"))]
    out.chunks_mut(n.max(1)).enumerate().for_each(fill_row);
    out
}

/// G @ Bᵀ where G is (m x n) and B is (k x n), both row-major
pub(crate) fn matmul_nt(g: &[f32], b: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; m * k];
    for i in 0..m {
        let g_row = &g[i * n..(i + 1) * n];
        for p in 0..k {
            let b_row = &b[p * n..(p + 1) * n];
            let mut acc = 0.0f64;
            for j in 0..n {
                acc += f64::from(g_row[j]) * f64::from(b_row[j]);
            }
            out[i * k + p] = acc as f32;
        }
    }
    out
}

/// Aᵀ @ G where A is (m x k) and G is (m x n), both row-major
pub(crate) fn matmul_tn(a: &[f32], g: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; k * n];
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        let g_row = &g[i * n..(i + 1) * n];
        for (p, &a_v) in a_row.iter().enumerate() {
            let dst = &mut out[p * n..(p + 1) * n];
            for (j, &g_v) in g_row.iter().enumerate() {
                dst[j] += a_v * g_v;
            }
        }
    }
    out
}

/// Transpose a rank-2 tensor
pub fn transpose(x: &Tensor<2>) -> Tensor<2> {
    let (r, c) = (x.shape().rows(), x.shape().cols());
    let src = x.as_slice();
    let mut out = vec![0.0f32; r * c];
    for i in 0..r {
        for j in 0..c {
            out[j * r + i] = src[i * c + j];
        }
    }
    Tensor::from_parts(out, Shape::new([c, r]))
}

/// Rescale every column to unit L2 norm.
///
/// Returns the normalized tensor together with the clamped per-column norms
/// needed by the backward pass. A column norm never drops below [`NORM_EPS`].
pub fn normalize_columns(w: &Tensor<2>) -> (Tensor<2>, Vec<f32>) {
    let (d, c) = (w.shape().rows(), w.shape().cols());
    let src = w.as_slice();
    let mut norms = vec![0.0f32; c];
    for (j, norm) in norms.iter_mut().enumerate() {
        let mut acc = 0.0f64;
        for i in 0..d {
            let v = f64::from(src[i * c + j]);
            acc += v * v;
        }
        *norm = (acc.sqrt() as f32).max(NORM_EPS);
    }
    let mut out = vec![0.0f32; d * c];
    for i in 0..d {
        for j in 0..c {
            out[i * c + j] = src[i * c + j] / norms[j];
        }
    }
    (Tensor::from_parts(out, w.shape()), norms)
}

/// Numerically stable per-row log-softmax (max-shift log-sum-exp)
pub fn log_softmax_rows(z: &Tensor<2>) -> Tensor<2> {
    let (r, c) = (z.shape().rows(), z.shape().cols());
    let src = z.as_slice();
    let mut out = vec![0.0f32; r * c];
    for i in 0..r {
        let row = &src[i * c..(i + 1) * c];
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f64;
        for &v in row {
            sum += f64::from(v - max).exp();
        }
        let lse = f64::from(max) + sum.ln();
        for (j, &v) in row.iter().enumerate() {
            out[i * c + j] = (f64::from(v) - lse) as f32;
        }
    }
    Tensor::from_parts(out, z.shape())
}

/// Per-row Lp norm, p >= 1
pub fn lp_norm_rows(x: &Tensor<2>, p: f32) -> Tensor<1> {
    let (r, c) = (x.shape().rows(), x.shape().cols());
    let src = x.as_slice();
    let p64 = f64::from(p);
    let mut out = vec![0.0f32; r];
    for (i, norm) in out.iter_mut().enumerate() {
        let mut acc = 0.0f64;
        for &v in &src[i * c..(i + 1) * c] {
            acc += f64::from(v.abs()).powf(p64);
        }
        *norm = acc.powf(1.0 / p64) as f32;
    }
    Tensor::from_parts(out, Shape::new([r]))
}

/// Multiply every element by a scalar
pub fn scale<const DIMS: usize>(x: &Tensor<DIMS>, factor: f32) -> Tensor<DIMS> {
    let out = x.as_slice().iter().map(|&v| v * factor).collect();
    Tensor::from_parts(out, x.shape())
}

/// Elementwise sum of two same-shape tensors
pub fn add<const DIMS: usize>(a: &Tensor<DIMS>, b: &Tensor<DIMS>) -> ProximaResult<Tensor<DIMS>> {
    if a.shape() != b.shape() {
        return Err(ProximaError::ShapeError(format!(
            "Incompatible shapes for add: {} and {}",
            a.shape(),
            b.shape()
        )));
    }
    let out = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&x, &y)| x + y)
        .collect();
    Ok(Tensor::from_parts(out, a.shape()))
}

/// Elementwise product of two same-length rank-1 tensors
pub fn mul_vec(a: &Tensor<1>, b: &Tensor<1>) -> ProximaResult<Tensor<1>> {
    if a.len() != b.len() {
        return Err(ProximaError::ShapeError(format!(
            "Incompatible lengths for elementwise product: {} and {}",
            a.len(),
            b.len()
        )));
    }
    let out = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(&x, &y)| x * y)
        .collect();
    Ok(Tensor::from_parts(out, a.shape()))
}

/// Mean of a slice, accumulated in f64
pub fn mean_slice(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    let sum: f64 = x.iter().map(|&v| f64::from(v)).sum();
    (sum / x.len() as f64) as f32
}
