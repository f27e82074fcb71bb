//! Feature rescaling.
//!
//! The scaler is refit on every batch it is given: a cloud classified alone
//! and the same cloud classified together with another one can get different
//! normalized values, hence different predictions. Existing outputs depend on
//! this, so it is kept. A scaler persisted at training time would implement
//! [`FeatureScaler`] as well.

use std::ops::Deref;

use crate::error::{Error, Result};

use super::feature::FeatureMatrix;

/// A [`FeatureMatrix`] whose columns went through a [`FeatureScaler`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeatureMatrix(FeatureMatrix);

impl NormalizedFeatureMatrix {
    pub fn into_inner(self) -> FeatureMatrix {
        self.0
    }
}

impl Deref for NormalizedFeatureMatrix {
    type Target = FeatureMatrix;

    fn deref(&self) -> &FeatureMatrix {
        &self.0
    }
}

pub trait FeatureScaler {
    fn scale(&self, features: &FeatureMatrix) -> Result<NormalizedFeatureMatrix>;
}

/// Min-max scaling to `[0, 1]` fit on the batch being scaled. Constant
/// columns map to 0. Non-finite input is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMinMaxScaler;

impl FeatureScaler for BatchMinMaxScaler {
    fn scale(&self, features: &FeatureMatrix) -> Result<NormalizedFeatureMatrix> {
        if features.n_rows() == 0 {
            return Err(Error::Shape("cannot normalize an empty feature matrix".into()));
        }

        let width = features.n_cols();
        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        for (i, row) in features.rows().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if !v.is_finite() {
                    return Err(Error::Shape(format!(
                        "non-finite value {v} in column '{}' at row {i}",
                        features.columns()[j]
                    )));
                }
                min[j] = min[j].min(v);
                max[j] = max[j].max(v);
            }
        }

        let mut values = Vec::with_capacity(features.values().len());
        for row in features.rows() {
            for (j, &v) in row.iter().enumerate() {
                let range = max[j] - min[j];
                values.push(if range > 0.0 { (v - min[j]) / range } else { 0.0 });
            }
        }

        Ok(NormalizedFeatureMatrix(FeatureMatrix::new(
            features.columns().to_vec(),
            values,
        )?))
    }
}

/// Normalizes with a scaler fit on this batch only; see the module docs.
pub fn batch_relative_normalize(features: &FeatureMatrix) -> Result<NormalizedFeatureMatrix> {
    BatchMinMaxScaler.scale(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[Vec<f64>]) -> FeatureMatrix {
        FeatureMatrix::from_rows(vec!["a".into(), "b".into(), "c".into()], rows).unwrap()
    }

    #[test]
    fn columns_span_unit_interval() {
        let m = matrix(&[
            vec![10.0, -1.0, 7.0],
            vec![20.0, 1.0, 7.0],
            vec![15.0, 0.0, 7.0],
        ]);
        let n = batch_relative_normalize(&m).unwrap();
        for j in 0..2 {
            let column: Vec<f64> = n.column_values(j).collect();
            let min = column.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = column.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(min, 0.0);
            assert_eq!(max, 1.0);
        }
        assert_eq!(n.row(2)[0], 0.5);
        // constant column
        assert!(n.column_values(2).all(|v| v == 0.0));
        assert_eq!(n.columns(), m.columns());
    }

    #[test]
    fn single_row_is_all_zero() {
        let n = batch_relative_normalize(&matrix(&[vec![3.0, 4.0, 5.0]])).unwrap();
        assert_eq!(n.values(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn refits_on_every_batch() {
        let a = matrix(&[vec![0.0, 0.0, 0.0], vec![10.0, 10.0, 10.0]]);
        let b = matrix(&[vec![0.0, 0.0, 0.0], vec![5.0, 5.0, 5.0]]);
        let na = batch_relative_normalize(&a).unwrap();
        let nb = batch_relative_normalize(&b).unwrap();
        assert_eq!(na.row(1), nb.row(1));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let m = matrix(&[vec![1.0, 0.0, 0.0], vec![bad, 1.0, 1.0], vec![2.0, 2.0, 2.0]]);
            assert!(matches!(batch_relative_normalize(&m), Err(Error::Shape(_))));
        }
    }

    #[test]
    fn empty_matrix_is_rejected() {
        let m = FeatureMatrix::new(vec!["a".into()], vec![]).unwrap();
        assert!(matches!(batch_relative_normalize(&m), Err(Error::Shape(_))));
    }
}
