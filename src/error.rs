//! Error types for building and querying the tree.

use thiserror::Error;

/// Errors surfaced by [`KdTree::build`](crate::KdTree::build) and the search operations.
///
/// Every variant describes malformed caller input; nothing here is transient.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KdTreeError {
    /// Bad bucket size, empty dataset, zero columns, non-finite coordinates or duplicate ids.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Ragged input rows, or a query whose length differs from the tree's dimensionality.
    #[error("dimension mismatch: expected {expected} columns, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Malformed `k`, radius or query coordinates.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A distance function that would make bounds pruning unsound.
    #[error("unsupported metric: {0}")]
    UnsupportedMetric(String),
}

pub type Result<T> = std::result::Result<T, KdTreeError>;
