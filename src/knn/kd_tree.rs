//! Bucketed k-d tree construction (Friedman, Bentley & Finkel, 1977).
//!
//! Each node splits its records on the dimension of greatest spread at the median value,
//! ties going left, until every leaf holds at most `bucket_size` records. Nodes live in a
//! preorder arena (root at index 0, children referenced by [`NodeId`]) and every node caches
//! the tight bounding box of its records for the search's pruning tests.
//!
//! Records are never copied: the tree keeps one permutation of row indices in which every
//! node owns a contiguous range, so internal nodes still expose their full record set.

use std::cmp::Ordering;
use std::ops::Range;

use log::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::bounds::BoundingBox;
use super::{Dissimilarity, Metric};
use crate::common_types::{Coordinate, RecordId, RecordMatrix};
use crate::error::{KdTreeError, Result};

/// Index of a node in the tree's arena.
pub type NodeId = usize;

/// Build and default search configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KdTreeParams {
    /// Maximum number of records in a leaf (degenerate all-duplicate leaves excepted).
    pub bucket_size: usize,
    /// Metric used by [`KdTree::search`] and [`KdTree::within_radius`].
    pub metric: Metric,
    /// Subtrees with at least this many records build their two halves concurrently.
    pub parallel_threshold: usize,
}

impl KdTreeParams {
    pub const DEFAULT_BUCKET_SIZE: usize = 16;
    pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.parallel_threshold = parallel_threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket_size < 1 {
            return Err(KdTreeError::InvalidConfiguration(
                "bucket_size must be at least 1".to_string(),
            ));
        }
        self.metric.check_pruning_contract()
    }
}

impl Default for KdTreeParams {
    fn default() -> Self {
        Self {
            bucket_size: Self::DEFAULT_BUCKET_SIZE,
            metric: Metric::default(),
            parallel_threshold: Self::DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind<F> {
    Leaf,
    Internal {
        /// Splitting dimension.
        discriminator: usize,
        /// Left records have `value <= partition`, right records `value > partition`.
        partition: F,
        left: NodeId,
        right: NodeId,
    },
}

/// One region of the partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<F> {
    range: Range<usize>,
    bounds: BoundingBox<F>,
    kind: NodeKind<F>,
}

impl<F: Coordinate> Node<F> {
    fn leaf(range: Range<usize>, bounds: BoundingBox<F>) -> Self {
        Node {
            range,
            bounds,
            kind: NodeKind::Leaf,
        }
    }

    /// Number of records in the subtree.
    pub fn count(&self) -> usize {
        self.range.len()
    }

    pub fn bounds(&self) -> &BoundingBox<F> {
        &self.bounds
    }

    pub fn kind(&self) -> &NodeKind<F> {
        &self.kind
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    pub fn discriminator(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Internal { discriminator, .. } => Some(discriminator),
            NodeKind::Leaf => None,
        }
    }

    pub fn partition(&self) -> Option<F> {
        match self.kind {
            NodeKind::Internal { partition, .. } => Some(partition),
            NodeKind::Leaf => None,
        }
    }

    pub fn children(&self) -> Option<(NodeId, NodeId)> {
        match self.kind {
            NodeKind::Internal { left, right, .. } => Some((left, right)),
            NodeKind::Leaf => None,
        }
    }

    fn shift_children(&mut self, by: usize) {
        if let NodeKind::Internal { left, right, .. } = &mut self.kind {
            *left += by;
            *right += by;
        }
    }
}

/// An immutable bucketed k-d tree over a [`RecordMatrix`].
#[derive(Debug, Clone)]
pub struct KdTree<F> {
    pub(crate) records: RecordMatrix<F>,
    pub(crate) params: KdTreeParams,
    pub(crate) nodes: Vec<Node<F>>,
    /// Row indices permuted so that every node owns `order[node.range]`.
    pub(crate) order: Vec<usize>,
}

impl<F: Coordinate> KdTree<F> {
    /// Builds a tree with the default parameters and the given bucket size.
    pub fn build(records: RecordMatrix<F>, bucket_size: usize) -> Result<Self> {
        Self::with_params(records, KdTreeParams::default().with_bucket_size(bucket_size))
    }

    /// Validates `rows` as a matrix, then builds.
    pub fn from_rows(rows: Vec<Vec<F>>, bucket_size: usize) -> Result<Self> {
        Self::build(RecordMatrix::from_rows(rows)?, bucket_size)
    }

    pub fn with_params(records: RecordMatrix<F>, params: KdTreeParams) -> Result<Self> {
        params.validate()?;

        let mut order: Vec<usize> = (0..records.rows()).collect();
        let builder = TreeBuilder {
            records: &records,
            bucket_size: params.bucket_size,
            parallel_threshold: params.parallel_threshold.max(1),
        };
        let nodes = builder.build_subtree(&mut order, 0);

        let tree = KdTree {
            records,
            params,
            nodes,
            order,
        };
        debug!(
            "built k-d tree: {} records x {} dims, {} nodes, {} leaves ({} oversized), depth {}",
            tree.len(),
            tree.dimensions(),
            tree.nodes.len(),
            tree.leaves().count(),
            tree.leaves()
                .filter(|leaf| leaf.count() > tree.params.bucket_size)
                .count(),
            tree.depth()
        );
        Ok(tree)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.records.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.records.columns()
    }

    pub fn bucket_size(&self) -> usize {
        self.params.bucket_size
    }

    pub fn metric(&self) -> Metric {
        self.params.metric
    }

    pub fn params(&self) -> &KdTreeParams {
        &self.params
    }

    pub fn records(&self) -> &RecordMatrix<F> {
        &self.records
    }

    pub fn root(&self) -> &Node<F> {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<F>> {
        self.nodes.get(id)
    }

    /// All nodes in preorder.
    pub fn nodes(&self) -> &[Node<F>] {
        &self.nodes
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Node<F>> {
        self.nodes.iter().filter(|node| node.is_leaf())
    }

    /// Rows of the records under `node`.
    pub fn rows_of(&self, node: &Node<F>) -> &[usize] {
        &self.order[node.range.clone()]
    }

    pub fn ids_of<'a>(&'a self, node: &Node<F>) -> impl Iterator<Item = RecordId> + 'a {
        self.rows_of(node).iter().map(|&row| self.records.id(row))
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        self.depth_from(0)
    }

    fn depth_from(&self, id: NodeId) -> usize {
        match self.nodes[id].children() {
            Some((left, right)) => 1 + self.depth_from(left).max(self.depth_from(right)),
            None => 1,
        }
    }

    pub(crate) fn reduced_distance_to_row<D: Dissimilarity>(
        &self,
        query: &[F],
        row: usize,
        metric: &D,
    ) -> f64 {
        metric.reduced_distance(query, self.records.row(row))
    }
}

struct TreeBuilder<'a, F> {
    records: &'a RecordMatrix<F>,
    bucket_size: usize,
    parallel_threshold: usize,
}

impl<F: Coordinate> TreeBuilder<'_, F> {
    /// Builds the subtree over `rows` (which sit at `start..` in the tree's row order).
    ///
    /// Returns the subtree in preorder with child ids relative to its own root.
    fn build_subtree(&self, rows: &mut [usize], start: usize) -> Vec<Node<F>> {
        let count = rows.len();
        let range = start..start + count;
        let bounds = BoundingBox::of_rows(self.records, rows);

        if count <= self.bucket_size {
            return vec![Node::leaf(range, bounds)];
        }

        let (discriminator, spread) = bounds.widest_axis();
        if spread <= F::zero() {
            trace!("{count} coincident records at rows {range:?} kept as one leaf");
            return vec![Node::leaf(range, bounds)];
        }

        let partition = self.partition_value(rows, discriminator, bounds.max()[discriminator]);
        let split = partition_in_place(rows, |row| {
            self.records.value(row, discriminator) <= partition
        });
        trace!(
            "split {count} records on dim {discriminator} at {partition:?}: {split} left, {} right",
            count - split
        );

        let (left_rows, right_rows) = rows.split_at_mut(split);
        let (left, right) = self.build_children(left_rows, start, right_rows, start + split);

        let mut nodes = Vec::with_capacity(1 + left.len() + right.len());
        nodes.push(Node {
            range,
            bounds,
            kind: NodeKind::Internal {
                discriminator,
                partition,
                left: 1,
                right: 1 + left.len(),
            },
        });
        let right_offset = 1 + left.len();
        nodes.extend(left.into_iter().map(|mut node| {
            node.shift_children(1);
            node
        }));
        nodes.extend(right.into_iter().map(|mut node| {
            node.shift_children(right_offset);
            node
        }));
        nodes
    }

    #[cfg(feature = "parallel")]
    fn build_children(
        &self,
        left_rows: &mut [usize],
        left_start: usize,
        right_rows: &mut [usize],
        right_start: usize,
    ) -> (Vec<Node<F>>, Vec<Node<F>>) {
        if left_rows.len() + right_rows.len() >= self.parallel_threshold {
            rayon::join(
                || self.build_subtree(left_rows, left_start),
                || self.build_subtree(right_rows, right_start),
            )
        } else {
            (
                self.build_subtree(left_rows, left_start),
                self.build_subtree(right_rows, right_start),
            )
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn build_children(
        &self,
        left_rows: &mut [usize],
        left_start: usize,
        right_rows: &mut [usize],
        right_start: usize,
    ) -> (Vec<Node<F>>, Vec<Node<F>>) {
        (
            self.build_subtree(left_rows, left_start),
            self.build_subtree(right_rows, right_start),
        )
    }

    /// Median of the records' values on `axis`; the midpoint of the two middle values
    /// for even counts.
    ///
    /// If the median equals `max` the partition drops to the largest value below `max`,
    /// so that the right side is never empty. Requires a positive spread on `axis`.
    fn partition_value(&self, rows: &[usize], axis: usize, max: F) -> F {
        let mut values: Vec<F> = rows.iter().map(|&row| self.records.value(row, axis)).collect();
        let mid = values.len() / 2;
        let (lower_half, &mut upper, _) = values.select_nth_unstable_by(mid, compare);

        let median = if lower_half.len() * 2 == rows.len() {
            let lower = lower_half.iter().copied().fold(F::neg_infinity(), F::max);
            lower + (upper - lower) / (F::one() + F::one())
        } else {
            upper
        };

        if median < max {
            return median;
        }
        values
            .iter()
            .copied()
            .filter(|&v| v < max)
            .fold(F::neg_infinity(), F::max)
    }
}

/// Total order on coordinates. Matrices never hold NaN, so the fallback is unreachable.
fn compare<F: Coordinate>(a: &F, b: &F) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Moves the rows satisfying `goes_left` to the front; returns how many there are.
fn partition_in_place(rows: &mut [usize], goes_left: impl Fn(usize) -> bool) -> usize {
    let mut split = 0;
    for i in 0..rows.len() {
        if goes_left(rows[i]) {
            rows.swap(split, i);
            split += 1;
        }
    }
    split
}
