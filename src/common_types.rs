//! This module contains the record matrix a tree is built from.

use std::collections::HashSet;
use std::fmt::Debug;

use num_traits::{AsPrimitive, Float};

use crate::error::{KdTreeError, Result};

/// Stable identifier of a record, preserved through partitioning.
pub type RecordId = u64;

/// Scalar type accepted as a coordinate (`f32` or `f64` in practice).
pub trait Coordinate: Float + AsPrimitive<f64> + Debug + Send + Sync + 'static {}

impl<T> Coordinate for T where T: Float + AsPrimitive<f64> + Debug + Send + Sync + 'static {}

/// A dense, immutable `rows x columns` grid of coordinates.
///
/// Values are stored row-major in one buffer. Every row carries a [`RecordId`];
/// unless [`with_ids`](RecordMatrix::with_ids) is used, the id of a row is its index.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMatrix<F> {
    values: Vec<F>,
    columns: usize,
    ids: Vec<RecordId>,
}

impl<F: Coordinate> RecordMatrix<F> {
    /// Builds a matrix from one `Vec` per record.
    ///
    /// Fails with `DimensionMismatch` if the rows are ragged, and with
    /// `InvalidConfiguration` if there are no rows, no columns or a non-finite value.
    pub fn from_rows(rows: Vec<Vec<F>>) -> Result<Self> {
        let columns = match rows.first() {
            Some(row) => row.len(),
            None => {
                return Err(KdTreeError::InvalidConfiguration(
                    "record matrix has no rows".to_string(),
                ));
            }
        };

        let mut values = Vec::with_capacity(rows.len() * columns);
        for row in &rows {
            if row.len() != columns {
                return Err(KdTreeError::DimensionMismatch {
                    expected: columns,
                    found: row.len(),
                });
            }
            values.extend_from_slice(row);
        }

        Self::from_flat(values, columns)
    }

    /// Builds a matrix from a row-major buffer.
    pub fn from_flat(values: Vec<F>, columns: usize) -> Result<Self> {
        if columns == 0 {
            return Err(KdTreeError::InvalidConfiguration(
                "record matrix has zero columns".to_string(),
            ));
        }
        if values.is_empty() {
            return Err(KdTreeError::InvalidConfiguration(
                "record matrix has no rows".to_string(),
            ));
        }
        let trailing = values.len() % columns;
        if trailing != 0 {
            // The last row is short.
            return Err(KdTreeError::DimensionMismatch {
                expected: columns,
                found: trailing,
            });
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(KdTreeError::InvalidConfiguration(format!(
                "non-finite value at row {}, column {}",
                pos / columns,
                pos % columns
            )));
        }

        let rows = values.len() / columns;
        Ok(RecordMatrix {
            values,
            columns,
            ids: (0..rows as RecordId).collect(),
        })
    }

    /// Replaces the default row-index ids with caller-supplied ones.
    pub fn with_ids(mut self, ids: Vec<RecordId>) -> Result<Self> {
        if ids.len() != self.rows() {
            return Err(KdTreeError::InvalidConfiguration(format!(
                "{} record ids supplied for {} rows",
                ids.len(),
                self.rows()
            )));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(KdTreeError::InvalidConfiguration(format!(
                "duplicate record id {dup}"
            )));
        }
        self.ids = ids;
        Ok(self)
    }

    pub fn rows(&self) -> usize {
        self.values.len() / self.columns
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// The coordinates of one record.
    pub fn row(&self, index: usize) -> &[F] {
        let start = index * self.columns;
        &self.values[start..start + self.columns]
    }

    pub fn value(&self, row: usize, column: usize) -> F {
        self.values[row * self.columns + column]
    }

    pub fn id(&self, row: usize) -> RecordId {
        self.ids[row]
    }

    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[F]> {
        self.values.chunks_exact(self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_keeps_row_major_order() {
        let m = RecordMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.columns(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.value(0, 1), 2.0);
        assert_eq!(m.ids(), &[0, 1]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = RecordMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(err, KdTreeError::DimensionMismatch { expected: 2, found: 1 });

        let err = RecordMatrix::from_flat(vec![1.0f32, 2.0, 3.0], 2).unwrap_err();
        assert!(matches!(err, KdTreeError::DimensionMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn test_empty_and_zero_column_inputs_rejected() {
        let empty: Vec<Vec<f64>> = vec![];
        assert!(matches!(
            RecordMatrix::from_rows(empty),
            Err(KdTreeError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            RecordMatrix::<f64>::from_rows(vec![vec![], vec![]]),
            Err(KdTreeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_non_finite_value_reported_with_position() {
        let err = RecordMatrix::from_rows(vec![vec![1.0, 2.0], vec![f64::NAN, 4.0]]).unwrap_err();
        assert_eq!(
            err,
            KdTreeError::InvalidConfiguration("non-finite value at row 1, column 0".to_string())
        );
    }

    #[test]
    fn test_custom_ids() {
        let m = RecordMatrix::from_rows(vec![vec![1.0], vec![2.0]])
            .unwrap()
            .with_ids(vec![70, 12])
            .unwrap();
        assert_eq!(m.id(0), 70);
        assert_eq!(m.id(1), 12);

        let dup = RecordMatrix::from_rows(vec![vec![1.0], vec![2.0]])
            .unwrap()
            .with_ids(vec![5, 5]);
        assert!(matches!(dup, Err(KdTreeError::InvalidConfiguration(_))));

        let short = RecordMatrix::from_rows(vec![vec![1.0], vec![2.0]])
            .unwrap()
            .with_ids(vec![5]);
        assert!(matches!(short, Err(KdTreeError::InvalidConfiguration(_))));
    }
}
