//! kdbucket: a bucketed k-d tree with exact nearest-neighbor search.
//!
//! The tree follows Friedman, Bentley & Finkel (1977): every node splits its records on the
//! dimension of greatest spread at the median, leaves hold up to `bucket_size` records, and
//! queries walk the tree near-side first while pruning subtrees whose bounding box cannot
//! hold anything closer than the current k-th candidate.
//!
//! ```
//! use kdbucket::{KdTree, RecordMatrix};
//!
//! let records = RecordMatrix::from_rows(vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![5.0, 5.0],
//!     vec![5.0, 6.0],
//!     vec![5.0, 7.0],
//! ])?;
//! let tree = KdTree::build(records, 2)?;
//!
//! let nearest = tree.search(&[5.0, 5.5], 1)?;
//! assert_eq!(nearest[0].id, 2);
//! assert_eq!(nearest[0].distance, 0.5);
//! # Ok::<(), kdbucket::KdTreeError>(())
//! ```

pub mod common_types;
pub mod error;
pub mod knn;

#[cfg(feature = "python")]
mod python;

pub use common_types::{Coordinate, RecordId, RecordMatrix};
pub use error::{KdTreeError, Result};
pub use knn::bounds::BoundingBox;
pub use knn::kd_tree::{KdTree, KdTreeParams, Node, NodeId, NodeKind};
pub use knn::{Dissimilarity, Metric, Neighbor, brute_force, brute_force_within};
