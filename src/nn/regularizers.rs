//! Weight regularization penalties for prototype matrices

use crate::autograd::Variable;
use crate::error::{ProximaError, ProximaResult};

/// Penalty computed over a prototype matrix with one prototype per row.
///
/// Losses that learn a prototype matrix hand it over TRANSPOSED, so that
/// implementations always see prototypes as rows regardless of how the loss
/// stores them.
pub trait WeightRegularizer: Send + Sync {
    /// Compute a differentiable scalar penalty
    fn penalty(&self, prototypes: &Variable<2>) -> ProximaResult<Variable<0>>;

    /// Get the name of the regularizer
    fn name(&self) -> &'static str;
}

/// Mean Lp-norm penalty over prototype rows: mean_i |row_i|_p ^ power
pub struct LpRegularizer {
    p: f32,
    power: f32,
}

impl LpRegularizer {
    pub fn new(p: f32) -> ProximaResult<Self> {
        if !p.is_finite() || p < 1.0 {
            return Err(ProximaError::ConfigurationError(format!(
                "Lp regularizer requires p >= 1, got {}",
                p
            )));
        }
        Ok(Self { p, power: 1.0 })
    }

    /// Raise each row norm to the given power before averaging
    pub fn with_power(mut self, power: f32) -> Self {
        self.power = power;
        self
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn power(&self) -> f32 {
        self.power
    }
}

impl Default for LpRegularizer {
    fn default() -> Self {
        Self { p: 2.0, power: 1.0 }
    }
}

impl WeightRegularizer for LpRegularizer {
    fn penalty(&self, prototypes: &Variable<2>) -> ProximaResult<Variable<0>> {
        let norms = prototypes.lp_norm_rows(self.p)?;
        let powered = if self.power == 1.0 {
            norms
        } else {
            norms.powf(self.power)?
        };
        powered.mean()
    }

    fn name(&self) -> &'static str {
        "LpRegularizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Shape, Tensor};

    #[test]
    fn test_l2_penalty_is_mean_row_norm() {
        // Rows with norms 5 and 13.
        let w = Variable::constant(
            Tensor::from_vec(vec![3.0, 4.0, 5.0, 12.0], Shape::new([2, 2])).unwrap(),
        );
        let reg = LpRegularizer::default();
        let penalty = reg.penalty(&w).unwrap();
        assert!((penalty.item() - 9.0).abs() < 1e-5);
    }

    #[test]
    fn test_power_squares_the_norms() {
        let w = Variable::constant(
            Tensor::from_vec(vec![3.0, 4.0, 0.0, 2.0], Shape::new([2, 2])).unwrap(),
        );
        let reg = LpRegularizer::default().with_power(2.0);
        let penalty = reg.penalty(&w).unwrap();
        // (25 + 4) / 2
        assert!((penalty.item() - 14.5).abs() < 1e-5);
    }

    #[test]
    fn test_penalty_is_differentiable() {
        let w = Variable::parameter(
            Tensor::from_vec(vec![0.6, -0.8, 1.5, 2.0], Shape::new([2, 2])).unwrap(),
        );
        let reg = LpRegularizer::default();
        let penalty = reg.penalty(&w).unwrap();
        penalty.backward().unwrap();

        let grad = w.grad().unwrap();
        // d mean|row|_2 / dx = x / (n_rows * |row|)
        assert!((grad.get(0, 0) - 0.6 / (2.0 * 1.0)).abs() < 1e-5);
        assert!((grad.get(0, 1) - (-0.8) / (2.0 * 1.0)).abs() < 1e-5);
    }

    #[test]
    fn test_invalid_p_is_rejected() {
        assert!(LpRegularizer::new(0.5).is_err());
        assert!(LpRegularizer::new(f32::NAN).is_err());
        assert!(LpRegularizer::new(1.0).is_ok());
    }
}
