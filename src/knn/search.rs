//! Exact nearest-neighbor and range search over a [`KdTree`].
//!
//! The k-NN descent visits the child containing the query first, keeps the `k` best
//! candidates in a bounded max-heap (the "ball"), and skips any subtree whose bounding box
//! lies farther from the query than the worst kept candidate. Once the ball is full and lies
//! strictly inside the bounding box of the node being finished, nothing outside that node can
//! improve it and the whole search stops.
//!
//! All comparisons happen on reduced distances (see [`Dissimilarity`]); only the results are
//! mapped back to real distances.

use log::trace;
use ordered_float::OrderedFloat;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::heap_utils::KBestNeighbors;
use super::kd_tree::{KdTree, NodeId, NodeKind};
use super::{Dissimilarity, Neighbor};
use crate::common_types::{Coordinate, RecordId};
use crate::error::{KdTreeError, Result};

pub(crate) fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(KdTreeError::InvalidQuery("k must be at least 1".to_string()));
    }
    Ok(())
}

pub(crate) fn check_radius(radius: f64) -> Result<()> {
    if !radius.is_finite() || radius < 0.0 {
        return Err(KdTreeError::InvalidQuery(format!(
            "radius must be finite and non-negative, got {radius}"
        )));
    }
    Ok(())
}

pub(crate) fn check_query<F: Coordinate>(dimensions: usize, query: &[F]) -> Result<()> {
    if query.len() != dimensions {
        return Err(KdTreeError::DimensionMismatch {
            expected: dimensions,
            found: query.len(),
        });
    }
    if let Some(axis) = query.iter().position(|v| !v.is_finite()) {
        return Err(KdTreeError::InvalidQuery(format!(
            "non-finite query coordinate on axis {axis}"
        )));
    }
    Ok(())
}

impl<F: Coordinate> KdTree<F> {
    /// The `k` records nearest to `query` under the tree's metric.
    ///
    /// Ascending by distance, ties broken by lowest record id; `min(k, len)` entries.
    ///
    /// A query of the wrong length fails with [`KdTreeError::DimensionMismatch`], the same
    /// variant the builder uses for ragged rows. `k == 0` and non-finite coordinates fail with
    /// [`KdTreeError::InvalidQuery`].
    pub fn search(&self, query: &[F], k: usize) -> Result<Vec<Neighbor>> {
        self.search_with(query, k, &self.params.metric)
    }

    /// Like [`search`](KdTree::search) with an explicit metric.
    pub fn search_with<D: Dissimilarity>(
        &self,
        query: &[F],
        k: usize,
        metric: &D,
    ) -> Result<Vec<Neighbor>> {
        self.search_with_stats(query, k, metric).map(|(hits, _)| hits)
    }

    pub(crate) fn search_with_stats<D: Dissimilarity>(
        &self,
        query: &[F],
        k: usize,
        metric: &D,
    ) -> Result<(Vec<Neighbor>, SearchStats)> {
        check_k(k)?;
        check_query(self.dimensions(), query)?;
        metric.check_pruning_contract()?;

        let mut search = NearestSearch::new(self, query, metric, k);
        let stopped_early = search.visit(0);
        let stats = SearchStats {
            visited: search.visited,
            pruned: search.pruned,
            stopped_early,
        };
        trace!(
            "k-NN search (k = {k}): visited {} of {} nodes, pruned {}, early stop: {}",
            stats.visited,
            self.nodes.len(),
            stats.pruned,
            stats.stopped_early
        );

        let hits = search
            .ball
            .into_sorted_vec()
            .into_iter()
            .map(|(reduced, (id, row))| Neighbor {
                id,
                row,
                distance: metric.dissimilarity(reduced),
            })
            .collect();
        Ok((hits, stats))
    }

    /// Every record within `radius` of `query` (inclusive) under the tree's metric.
    pub fn within_radius(&self, query: &[F], radius: f64) -> Result<Vec<Neighbor>> {
        self.within_radius_with(query, radius, &self.params.metric)
    }

    pub fn within_radius_with<D: Dissimilarity>(
        &self,
        query: &[F],
        radius: f64,
        metric: &D,
    ) -> Result<Vec<Neighbor>> {
        check_radius(radius)?;
        check_query(self.dimensions(), query)?;
        metric.check_pruning_contract()?;

        let mut search = RangeSearch {
            tree: self,
            query,
            metric,
            reduced_radius: metric.reduce(radius),
            hits: Vec::new(),
        };
        search.visit(0);

        let mut hits = search.hits;
        hits.sort_unstable();
        Ok(hits
            .into_iter()
            .map(|(reduced, id, row)| Neighbor {
                id,
                row,
                distance: metric.dissimilarity(reduced.0),
            })
            .collect())
    }

    /// Runs [`search`](KdTree::search) for every query, in parallel when the `parallel`
    /// feature is on. Fails on the first invalid query.
    pub fn search_batch(&self, queries: &[Vec<F>], k: usize) -> Result<Vec<Vec<Neighbor>>> {
        #[cfg(feature = "parallel")]
        let results = queries.par_iter().map(|query| self.search(query, k)).collect();
        #[cfg(not(feature = "parallel"))]
        let results = queries.iter().map(|query| self.search(query, k)).collect();
        results
    }
}

/// Node counters of one k-NN search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchStats {
    pub visited: usize,
    /// Far children skipped by the box test.
    pub pruned: usize,
    /// The ball ended strictly inside some visited node's box.
    pub stopped_early: bool,
}

struct NearestSearch<'t, F, D> {
    tree: &'t KdTree<F>,
    query: &'t [F],
    metric: &'t D,
    ball: KBestNeighbors<(RecordId, usize)>,
    visited: usize,
    pruned: usize,
}

impl<'t, F: Coordinate, D: Dissimilarity> NearestSearch<'t, F, D> {
    fn new(tree: &'t KdTree<F>, query: &'t [F], metric: &'t D, k: usize) -> Self {
        NearestSearch {
            tree,
            query,
            metric,
            ball: KBestNeighbors::new(k.min(tree.len())),
            visited: 0,
            pruned: 0,
        }
    }

    /// Searches the subtree at `id`; returns `true` when the ball is final.
    fn visit(&mut self, id: NodeId) -> bool {
        let tree = self.tree;
        let node = &tree.nodes[id];
        self.visited += 1;

        match *node.kind() {
            NodeKind::Leaf => {
                for &row in tree.rows_of(node) {
                    let reduced = tree.reduced_distance_to_row(self.query, row, self.metric);
                    self.ball.add(reduced, (tree.records.id(row), row));
                }
            }
            NodeKind::Internal {
                discriminator,
                partition,
                left,
                right,
            } => {
                let (near, far) = if self.query[discriminator] <= partition {
                    (left, right)
                } else {
                    (right, left)
                };
                if self.visit(near) {
                    return true;
                }
                if self.bounds_overlap_ball(far) {
                    if self.visit(far) {
                        return true;
                    }
                } else {
                    self.pruned += 1;
                }
            }
        }

        self.ball_within_bounds(id)
    }

    /// Whether the subtree at `id` could hold a candidate that orders before the worst kept
    /// one. Boxes exactly at the radius are kept so equal-distance lower ids are not lost.
    fn bounds_overlap_ball(&self, id: NodeId) -> bool {
        let bounds = self.tree.nodes[id].bounds();
        bounds.reduced_distance_to(self.query, self.metric) <= self.ball.radius()
    }

    /// Whether the full ball lies strictly inside the bounding box of the node at `id`.
    fn ball_within_bounds(&self, id: NodeId) -> bool {
        self.ball.is_full()
            && self.tree.nodes[id]
                .bounds()
                .encloses_ball(self.query, self.ball.radius(), self.metric)
    }
}

struct RangeSearch<'t, F, D> {
    tree: &'t KdTree<F>,
    query: &'t [F],
    metric: &'t D,
    reduced_radius: f64,
    hits: Vec<(OrderedFloat<f64>, RecordId, usize)>,
}

impl<F: Coordinate, D: Dissimilarity> RangeSearch<'_, F, D> {
    fn visit(&mut self, id: NodeId) {
        let tree = self.tree;
        let node = &tree.nodes[id];
        if node.bounds().reduced_distance_to(self.query, self.metric) > self.reduced_radius {
            return;
        }

        match node.children() {
            Some((left, right)) => {
                self.visit(left);
                self.visit(right);
            }
            None => {
                for &row in tree.rows_of(node) {
                    let reduced = tree.reduced_distance_to_row(self.query, row, self.metric);
                    if reduced <= self.reduced_radius {
                        self.hits.push((OrderedFloat(reduced), tree.records.id(row), row));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_types::RecordMatrix;
    use crate::knn::kd_tree::KdTreeParams;
    use crate::knn::{Metric, brute_force, brute_force_within};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn five_points() -> KdTree<f64> {
        KdTree::from_rows(
            vec![
                vec![0.0, 0.0],
                vec![0.0, 1.0],
                vec![5.0, 5.0],
                vec![5.0, 6.0],
                vec![5.0, 7.0],
            ],
            2,
        )
        .unwrap()
    }

    fn random_rows(rng: &mut StdRng, n: usize, dims: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-50.0..50.0)).collect())
            .collect()
    }

    #[test]
    fn test_equidistant_tie_resolved_by_lowest_id() {
        let tree = five_points();
        let hits = tree.search(&[5.0, 5.5], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
        assert_relative_eq!(hits[0].distance, 0.5);

        let hits = tree.search(&[5.0, 5.5], 2).unwrap();
        assert_eq!(hits.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_k_larger_than_dataset_returns_everything_sorted() {
        let tree = five_points();
        let hits = tree.search(&[0.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits.iter().map(|n| n.id).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_coincident_query_comes_first() {
        let tree = five_points();
        let hits = tree.search(&[5.0, 6.0], 3).unwrap();
        assert_eq!(hits[0].id, 3);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_invalid_queries() {
        let tree = five_points();
        assert!(matches!(tree.search(&[0.0, 0.0], 0), Err(KdTreeError::InvalidQuery(_))));
        assert_eq!(
            tree.search(&[0.0, 0.0, 0.0], 1).unwrap_err(),
            KdTreeError::DimensionMismatch { expected: 2, found: 3 }
        );
        assert!(matches!(
            tree.search(&[f64::NAN, 0.0], 1),
            Err(KdTreeError::InvalidQuery(_))
        ));
        assert!(matches!(
            tree.search_with(&[0.0, 0.0], 1, &Metric::Cosine),
            Err(KdTreeError::UnsupportedMetric(_))
        ));
        assert!(matches!(
            tree.within_radius(&[0.0, 0.0], -1.0),
            Err(KdTreeError::InvalidQuery(_))
        ));
        assert!(matches!(
            tree.within_radius(&[0.0, 0.0], f64::INFINITY),
            Err(KdTreeError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_search_matches_brute_force_for_every_metric() {
        let mut rng = StdRng::seed_from_u64(7);
        let records = RecordMatrix::from_rows(random_rows(&mut rng, 500, 3)).unwrap();
        let tree = KdTree::build(records.clone(), 4).unwrap();

        for metric in [
            Metric::Euclidean,
            Metric::Manhattan,
            Metric::Chebyshev,
            Metric::Minkowski { p: 3.0 },
        ] {
            for _ in 0..25 {
                let query: Vec<f64> = (0..3).map(|_| rng.gen_range(-60.0..60.0)).collect();
                for k in [1, 5, 17] {
                    let expected = brute_force(&records, &query, k, &metric).unwrap();
                    let actual = tree.search_with(&query, k, &metric).unwrap();
                    assert_eq!(
                        actual.iter().map(|n| n.id).collect::<Vec<_>>(),
                        expected.iter().map(|n| n.id).collect::<Vec<_>>(),
                        "{metric:?}, k = {k}, query {query:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_within_radius_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(11);
        let records = RecordMatrix::from_rows(random_rows(&mut rng, 300, 2)).unwrap();
        let tree = KdTree::build(records.clone(), 6).unwrap();

        for radius in [0.0, 3.0, 12.5, 40.0] {
            let query = [rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0)];
            let expected = brute_force_within(&records, &query, radius, &Metric::Euclidean).unwrap();
            let actual = tree.within_radius(&query, radius).unwrap();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_within_radius_inclusive_boundary() {
        let tree = KdTree::from_rows(vec![vec![0.0, 0.0], vec![3.0, 4.0], vec![6.0, 8.0]], 1).unwrap();
        let hits = tree.within_radius(&[0.0, 0.0], 5.0).unwrap();
        assert_eq!(hits.iter().map(|n| n.id).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_duplicate_heavy_data_ties_use_ids() {
        let mut rows = vec![vec![1.0, 1.0]; 40];
        rows.extend(vec![vec![3.0, 3.0]; 40]);
        let records = RecordMatrix::from_rows(rows)
            .unwrap()
            .with_ids((0..80).rev().collect())
            .unwrap();
        let tree = KdTree::build(records, 3).unwrap();

        let hits = tree.search(&[1.0, 1.0], 4).unwrap();
        // Rows 0..40 carry ids 79..40; the four lowest are 40..43.
        assert_eq!(hits.iter().map(|n| n.id).collect::<Vec<_>>(), vec![40, 41, 42, 43]);
        assert!(hits.iter().all(|n| n.distance == 0.0));
    }

    #[test]
    fn test_search_batch() {
        let tree = five_points();
        let results = tree
            .search_batch(&[vec![0.0, 0.0], vec![5.0, 7.0]], 1)
            .unwrap();
        assert_eq!(results[0][0].id, 0);
        assert_eq!(results[1][0].id, 4);

        assert!(tree.search_batch(&[vec![0.0]], 1).is_err());
    }

    #[test]
    fn test_default_metric_comes_from_params() {
        let records = RecordMatrix::from_rows(vec![vec![0.0, 0.0], vec![3.0, 4.0]]).unwrap();
        let params = KdTreeParams::default()
            .with_bucket_size(1)
            .with_metric(Metric::Manhattan);
        let tree = KdTree::with_params(records, params).unwrap();
        let hits = tree.search(&[0.0, 0.0], 2).unwrap();
        assert_relative_eq!(hits[1].distance, 7.0);
    }

    fn grid(side: usize, bucket_size: usize) -> KdTree<f64> {
        let rows = (0..side)
            .flat_map(|x| (0..side).map(move |y| vec![x as f64, y as f64]))
            .collect();
        KdTree::from_rows(rows, bucket_size).unwrap()
    }

    #[test]
    fn test_search_prunes_and_stops_early_inside_the_data() {
        let tree = grid(64, 4);
        assert_eq!(tree.nodes.len(), 2047);
        let query = [10.25, 20.75];

        let mut search = NearestSearch::new(&tree, &query, &Metric::Euclidean, 3);
        assert!(search.visit(0));
        assert!(search.pruned > 0);
        assert!(
            search.visited < tree.nodes.len() / 20,
            "visited {} of {} nodes",
            search.visited,
            tree.nodes.len()
        );

        let (hits, stats) = tree.search_with_stats(&query, 3, &Metric::Euclidean).unwrap();
        assert_eq!(
            stats,
            SearchStats {
                visited: search.visited,
                pruned: search.pruned,
                stopped_early: true,
            }
        );
        // (10, 21) first, then the tie at sqrt(0.625) between (10, 20) and (11, 21).
        assert_eq!(hits.iter().map(|n| n.id).collect::<Vec<_>>(), vec![661, 660, 725]);
        assert_eq!(hits, brute_force(&tree.records, &query, 3, &Metric::Euclidean).unwrap());
    }

    #[test]
    fn test_ball_never_within_bounds_for_outside_query() {
        let tree = grid(16, 4);
        let query = [-10.0, -10.0];

        let mut search = NearestSearch::new(&tree, &query, &Metric::Euclidean, 3);
        assert!(!search.visit(0));
        assert!(search.ball.is_full());
        assert!((0..tree.nodes.len()).all(|id| !search.ball_within_bounds(id)));
        assert!(search.pruned > 0);

        let (hits, stats) = tree.search_with_stats(&query, 3, &Metric::Euclidean).unwrap();
        assert!(!stats.stopped_early);
        assert_eq!(hits, brute_force(&tree.records, &query, 3, &Metric::Euclidean).unwrap());
    }

    #[test]
    fn test_ball_within_bounds_needs_a_full_ball() {
        let tree = five_points();
        let query = [2.0, 3.0];

        let mut search = NearestSearch::new(&tree, &query, &Metric::Euclidean, 10);
        assert!(!search.visit(0));
        assert!(!search.ball.is_full());
        assert_eq!(search.visited, tree.nodes.len());
        assert_eq!(search.pruned, 0);
    }
}
