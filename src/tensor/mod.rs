//! Dense CPU tensors and the kernels behind the differentiable operation set
//!
//! Tensors are rank-typed through const generics, hold `f32` data in shared
//! storage, and are immutable once built; every operation produces a new
//! tensor. The `ops` module carries the pure forward kernels that the
//! autograd layer pairs with adjoints.

pub mod core;
pub mod ops;

pub use self::core::{Shape, Tensor};
pub use self::ops::NORM_EPS;
