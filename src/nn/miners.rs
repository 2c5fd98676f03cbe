//! Conversion from mined tuple indices to per-sample loss weights
//!
//! Miners select informative pairs or triplets out of a batch; a
//! classification-style loss consumes that selection as a per-sample weight
//! vector instead of operating on the tuples directly. Only the conversion
//! lives here; the mining strategies themselves are external.

use crate::error::{ProximaError, ProximaResult};
use crate::tensor::{Shape, Tensor};

/// Indices produced by a pair or triplet miner over one batch.
///
/// Every value is a row index into the batch the miner ran on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinedIndices {
    /// Positive pairs (anchor, positive) and negative pairs (anchor, negative)
    Pairs {
        anchors_pos: Vec<usize>,
        positives: Vec<usize>,
        anchors_neg: Vec<usize>,
        negatives: Vec<usize>,
    },
    /// Triplets (anchor, positive, negative)
    Triplets {
        anchors: Vec<usize>,
        positives: Vec<usize>,
        negatives: Vec<usize>,
    },
}

impl MinedIndices {
    fn components(&self) -> Vec<&[usize]> {
        match self {
            MinedIndices::Pairs {
                anchors_pos,
                positives,
                anchors_neg,
                negatives,
            } => vec![
                anchors_pos.as_slice(),
                positives.as_slice(),
                anchors_neg.as_slice(),
                negatives.as_slice(),
            ],
            MinedIndices::Triplets {
                anchors,
                positives,
                negatives,
            } => vec![anchors.as_slice(), positives.as_slice(), negatives.as_slice()],
        }
    }

    /// True when the miner selected nothing at all
    pub fn is_empty(&self) -> bool {
        self.components().iter().all(|c| c.is_empty())
    }
}

/// Turn mined tuple indices into one multiplicative weight per batch element.
///
/// Each sample is weighted by how often it appears across all tuple
/// components, rescaled so the most-mined sample has weight 1. Samples the
/// miner never selected get weight 0. Without mining (`None` or an empty
/// selection) every sample gets weight 1.
///
/// The result is plain data: no gradient flows through it.
pub fn convert_to_weights(
    mined: Option<&MinedIndices>,
    batch_size: usize,
) -> ProximaResult<Tensor<1>> {
    if batch_size == 0 {
        return Err(ProximaError::InvalidInput(
            "Batch must contain at least one sample".to_string(),
        ));
    }
    let mined = match mined {
        Some(m) if !m.is_empty() => m,
        _ => return Ok(Tensor::ones(Shape::new([batch_size]))),
    };

    let mut counts = vec![0usize; batch_size];
    for component in mined.components() {
        for &idx in component {
            if idx >= batch_size {
                return Err(ProximaError::InvalidInput(format!(
                    "Mined index {} is out of range for batch size {}",
                    idx, batch_size
                )));
            }
            counts[idx] += 1;
        }
    }

    // A non-empty selection guarantees at least one non-zero count.
    let max = counts.iter().copied().max().unwrap_or(1).max(1);
    let weights = counts.iter().map(|&c| c as f32 / max as f32).collect();
    Tensor::from_vec(weights, Shape::new([batch_size]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_mining_gives_unit_weights() {
        let weights = convert_to_weights(None, 4).unwrap();
        assert_eq!(weights.as_slice(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_empty_selection_gives_unit_weights() {
        let mined = MinedIndices::Triplets {
            anchors: vec![],
            positives: vec![],
            negatives: vec![],
        };
        let weights = convert_to_weights(Some(&mined), 3).unwrap();
        assert_eq!(weights.as_slice(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_triplet_counts_scale_to_most_mined_sample() {
        let mined = MinedIndices::Triplets {
            anchors: vec![0, 0, 1],
            positives: vec![1, 2, 2],
            negatives: vec![3, 3, 3],
        };
        // counts: 0 -> 2, 1 -> 2, 2 -> 2, 3 -> 3, 4 -> 0
        let weights = convert_to_weights(Some(&mined), 5).unwrap();
        let expected = [2.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0, 1.0, 0.0];
        for (w, e) in weights.as_slice().iter().zip(&expected) {
            assert!((w - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pair_components_all_count() {
        let mined = MinedIndices::Pairs {
            anchors_pos: vec![0],
            positives: vec![1],
            anchors_neg: vec![0],
            negatives: vec![2],
        };
        // counts: 0 -> 2, 1 -> 1, 2 -> 1
        let weights = convert_to_weights(Some(&mined), 3).unwrap();
        let expected = [1.0, 0.5, 0.5];
        for (w, e) in weights.as_slice().iter().zip(&expected) {
            assert!((w - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mined = MinedIndices::Triplets {
            anchors: vec![0],
            positives: vec![1],
            negatives: vec![3],
        };
        assert!(convert_to_weights(Some(&mined), 3).is_err());
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        assert!(convert_to_weights(None, 0).is_err());
    }
}
