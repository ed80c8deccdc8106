//! Distance metrics, result types and the exhaustive reference search.

pub mod bounds;
pub mod heap_utils;
pub mod kd_tree;
pub mod search;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ordered_float::OrderedFloat;

use crate::common_types::{Coordinate, RecordId, RecordMatrix};
use crate::error::{KdTreeError, Result};
use search::{check_k, check_query, check_radius};

/// A coordinate-wise dissimilarity usable for bounds pruning.
///
/// Distances are computed in a "reduced" space: each axis contributes
/// `coordinate_distance(|a_i - b_i|)`, contributions are folded with `accumulate`, and
/// `dissimilarity` maps the folded value to the reported distance. For the tree's pruning
/// to stay exact the implementation must satisfy:
///
/// - `coordinate_distance` is non-negative and non-decreasing in `|delta|`, zero at zero;
/// - `accumulate(partial, term) >= max(partial, term)` and is non-decreasing in both;
/// - `dissimilarity` is strictly increasing, and `reduce` is its inverse.
pub trait Dissimilarity: Sync {
    fn coordinate_distance(&self, delta: f64) -> f64;

    fn accumulate(&self, partial: f64, term: f64) -> f64 {
        partial + term
    }

    fn dissimilarity(&self, reduced: f64) -> f64;

    fn reduce(&self, distance: f64) -> f64;

    /// Rejects configurations under which the contract above does not hold.
    fn check_pruning_contract(&self) -> Result<()> {
        Ok(())
    }

    fn reduced_distance<F: Coordinate>(&self, a: &[F], b: &[F]) -> f64
    where
        Self: Sized,
    {
        a.iter().zip(b.iter()).fold(0.0, |acc, (&x, &y)| {
            let delta: f64 = (x - y).as_();
            self.accumulate(acc, self.coordinate_distance(delta.abs()))
        })
    }

    fn distance<F: Coordinate>(&self, a: &[F], b: &[F]) -> f64
    where
        Self: Sized,
    {
        self.dissimilarity(self.reduced_distance(a, b))
    }
}

/// Built-in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Metric {
    #[default]
    Euclidean,
    Manhattan,
    Chebyshev,
    Minkowski { p: f64 }, // p is the order, must be >= 1
    /// Accepted as a selector but always rejected: cosine distance is not monotone in
    /// per-coordinate differences.
    Cosine,
}

impl Metric {
    /// Picks a metric from a named selector or a Minkowski order `p`, at most one of them.
    ///
    /// Neither gives the default metric.
    pub fn select(named: Option<Metric>, p: Option<f64>) -> Result<Metric> {
        match (named, p) {
            (Some(named), Some(p)) => Err(KdTreeError::InvalidConfiguration(format!(
                "give either a metric ({named:?}) or a Minkowski order ({p}), not both"
            ))),
            (Some(named), None) => Ok(named),
            (None, Some(p)) => Ok(Metric::Minkowski { p }),
            (None, None) => Ok(Metric::default()),
        }
    }
}

impl Dissimilarity for Metric {
    fn coordinate_distance(&self, delta: f64) -> f64 {
        match *self {
            Metric::Euclidean => delta * delta,
            Metric::Manhattan | Metric::Chebyshev | Metric::Cosine => delta.abs(),
            Metric::Minkowski { p } => delta.abs().powf(p),
        }
    }

    fn accumulate(&self, partial: f64, term: f64) -> f64 {
        match self {
            Metric::Chebyshev => partial.max(term),
            _ => partial + term,
        }
    }

    fn dissimilarity(&self, reduced: f64) -> f64 {
        match *self {
            Metric::Euclidean => reduced.sqrt(),
            Metric::Minkowski { p } => reduced.powf(p.recip()),
            Metric::Manhattan | Metric::Chebyshev | Metric::Cosine => reduced,
        }
    }

    fn reduce(&self, distance: f64) -> f64 {
        match *self {
            Metric::Euclidean => distance * distance,
            Metric::Minkowski { p } => distance.powf(p),
            Metric::Manhattan | Metric::Chebyshev | Metric::Cosine => distance,
        }
    }

    fn check_pruning_contract(&self) -> Result<()> {
        match *self {
            Metric::Cosine => Err(KdTreeError::UnsupportedMetric(
                "cosine distance is not monotone in coordinate differences".to_string(),
            )),
            Metric::Minkowski { p } if !p.is_finite() || p < 1.0 => {
                Err(KdTreeError::UnsupportedMetric(format!(
                    "Minkowski order must be finite and >= 1, got {p}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Neighbor {
    pub id: RecordId,
    /// Row of the record in the tree's [`RecordMatrix`].
    pub row: usize,
    pub distance: f64,
}

/// Exact k nearest neighbors by scanning every record.
///
/// Same ordering rules as the tree search: ascending distance, then lowest id.
pub fn brute_force<F: Coordinate, D: Dissimilarity>(
    records: &RecordMatrix<F>,
    query: &[F],
    k: usize,
    metric: &D,
) -> Result<Vec<Neighbor>> {
    check_k(k)?;
    check_query(records.columns(), query)?;
    metric.check_pruning_contract()?;

    let mut scored = scan(records, query, metric, |_| true);
    scored.truncate(k);
    Ok(finish(scored, metric))
}

/// Every record within `radius` of `query`, by scanning every record.
pub fn brute_force_within<F: Coordinate, D: Dissimilarity>(
    records: &RecordMatrix<F>,
    query: &[F],
    radius: f64,
    metric: &D,
) -> Result<Vec<Neighbor>> {
    check_radius(radius)?;
    check_query(records.columns(), query)?;
    metric.check_pruning_contract()?;

    let reduced_radius = metric.reduce(radius);
    let scored = scan(records, query, metric, |reduced| reduced <= reduced_radius);
    Ok(finish(scored, metric))
}

fn scan<F: Coordinate, D: Dissimilarity>(
    records: &RecordMatrix<F>,
    query: &[F],
    metric: &D,
    keep: impl Fn(f64) -> bool,
) -> Vec<(OrderedFloat<f64>, RecordId, usize)> {
    let mut scored: Vec<_> = records
        .iter_rows()
        .enumerate()
        .map(|(row, point)| (metric.reduced_distance(query, point), row))
        .filter(|&(reduced, _)| keep(reduced))
        .map(|(reduced, row)| (OrderedFloat(reduced), records.id(row), row))
        .collect();
    scored.sort_unstable();
    scored
}

fn finish<D: Dissimilarity>(
    scored: Vec<(OrderedFloat<f64>, RecordId, usize)>,
    metric: &D,
) -> Vec<Neighbor> {
    scored
        .into_iter()
        .map(|(reduced, id, row)| Neighbor {
            id,
            row,
            distance: metric.dissimilarity(reduced.0),
        })
        .collect()
}
