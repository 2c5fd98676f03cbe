//! Core tensor types and fundamental operations

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{ProximaError, ProximaResult};

/// Compile-time shape with const generics for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape<const DIMS: usize> {
    pub dims: [usize; DIMS],
}

impl<const DIMS: usize> Shape<DIMS> {
    pub fn new(dims: [usize; DIMS]) -> Self {
        Self { dims }
    }

    pub fn total_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_valid(&self) -> bool {
        self.dims.iter().all(|&d| d > 0)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.dims
    }
}

impl Shape<2> {
    pub fn rows(&self) -> usize {
        self.dims[0]
    }

    pub fn cols(&self) -> usize {
        self.dims[1]
    }
}

impl<const DIMS: usize> Display for Shape<DIMS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.dims
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// Dense CPU tensor of `f32` values with cheaply cloneable shared storage
#[derive(Clone, PartialEq)]
pub struct Tensor<const DIMS: usize> {
    data: Arc<Vec<f32>>,
    shape: Shape<DIMS>,
}

impl<const DIMS: usize> Tensor<DIMS> {
    /// Create a tensor filled with zeros
    pub fn zeros(shape: Shape<DIMS>) -> Self {
        Self {
            data: Arc::new(vec![0.0; shape.total_elements()]),
            shape,
        }
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: Shape<DIMS>) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with a constant value
    pub fn full(shape: Shape<DIMS>, value: f32) -> Self {
        Self {
            data: Arc::new(vec![value; shape.total_elements()]),
            shape,
        }
    }

    /// Create a tensor from a vector, validating the element count
    pub fn from_vec(data: Vec<f32>, shape: Shape<DIMS>) -> ProximaResult<Self> {
        if data.len() != shape.total_elements() {
            return Err(ProximaError::ShapeError(format!(
                "Data length {} does not match shape {} with {} elements",
                data.len(),
                shape,
                shape.total_elements()
            )));
        }
        Ok(Self {
            data: Arc::new(data),
            shape,
        })
    }

    /// Internal constructor for kernels that produce correctly sized buffers
    pub(crate) fn from_parts(data: Vec<f32>, shape: Shape<DIMS>) -> Self {
        debug_assert_eq!(data.len(), shape.total_elements());
        Self {
            data: Arc::new(data),
            shape,
        }
    }

    /// Sample every element from a standard normal distribution
    pub fn randn(shape: Shape<DIMS>) -> Self {
        let mut rng = rand::thread_rng();
        Self::randn_with(shape, &mut rng)
    }

    /// Standard normal initialization with a fixed seed, for reproducible runs
    pub fn randn_seeded(shape: Shape<DIMS>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::randn_with(shape, &mut rng)
    }

    fn randn_with<R: Rng>(shape: Shape<DIMS>, rng: &mut R) -> Self {
        let data = (0..shape.total_elements())
            .map(|_| rng.sample(StandardNormal))
            .collect();
        Self {
            data: Arc::new(data),
            shape,
        }
    }

    /// Get tensor shape
    pub fn shape(&self) -> Shape<DIMS> {
        self.shape
    }

    /// Get number of elements
    pub fn numel(&self) -> usize {
        self.shape.total_elements()
    }

    /// Get data as a slice
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copy the data out as a vector
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.as_ref().clone()
    }

    /// Shared handle to the underlying storage
    pub(crate) fn storage(&self) -> Arc<Vec<f32>> {
        self.data.clone()
    }
}

impl Tensor<0> {
    /// Create a scalar tensor
    pub fn scalar(value: f32) -> Self {
        Self::from_parts(vec![value], Shape::new([]))
    }

    /// Extract the scalar value
    pub fn item(&self) -> f32 {
        self.data[0]
    }
}

impl Tensor<1> {
    /// Length of a rank-1 tensor
    pub fn len(&self) -> usize {
        self.shape.dims[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Tensor<2> {
    /// Element access by row and column
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.shape.cols() + col]
    }
}

impl<const DIMS: usize> Debug for Tensor<DIMS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("size", &self.numel())
            .finish()
    }
}
