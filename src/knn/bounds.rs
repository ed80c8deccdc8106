
use super::Dissimilarity;
use crate::common_types::{Coordinate, RecordMatrix};

/// Tight axis-aligned box around a set of records.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox<F> {
    min: Vec<F>,
    max: Vec<F>,
}

impl<F: Coordinate> BoundingBox<F> {
    pub fn new(min: Vec<F>, max: Vec<F>) -> Self {
        debug_assert_eq!(min.len(), max.len());
        Self { min, max }
    }

    /// Box around the given rows of `records`. `rows` must not be empty.
    pub(crate) fn of_rows(records: &RecordMatrix<F>, rows: &[usize]) -> Self {
        let mut min = vec![F::infinity(); records.columns()];
        let mut max = vec![F::neg_infinity(); records.columns()];
        for &row in rows {
            for (axis, &v) in records.row(row).iter().enumerate() {
                if v < min[axis] {
                    min[axis] = v;
                }
                if v > max[axis] {
                    max[axis] = v;
                }
            }
        }
        Self { min, max }
    }

    pub fn min(&self) -> &[F] {
        &self.min
    }

    pub fn max(&self) -> &[F] {
        &self.max
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    pub fn spread(&self, axis: usize) -> F {
        self.max[axis] - self.min[axis]
    }

    /// The axis of greatest spread and that spread. Lowest axis wins ties.
    pub fn widest_axis(&self) -> (usize, F) {
        (0..self.dimensions()).fold((0, self.spread(0)), |(best, widest), axis| {
            let spread = self.spread(axis);
            if spread > widest { (axis, spread) } else { (best, widest) }
        })
    }

    pub fn contains(&self, point: &[F]) -> bool {
        point
            .iter()
            .zip(self.min.iter().zip(self.max.iter()))
            .all(|(&v, (&lo, &hi))| lo <= v && v <= hi)
    }

    /// Reduced distance from `query` to the nearest point of the box; zero inside it.
    ///
    /// A lower bound on the reduced distance from `query` to every record in the box.
    pub fn reduced_distance_to<D: Dissimilarity>(&self, query: &[F], metric: &D) -> f64 {
        let mut acc = 0.0;
        for (axis, &q) in query.iter().enumerate() {
            let (lo, hi) = (self.min[axis], self.max[axis]);
            let gap: f64 = if q < lo {
                (lo - q).as_()
            } else if q > hi {
                (q - hi).as_()
            } else {
                continue;
            };
            acc = metric.accumulate(acc, metric.coordinate_distance(gap));
        }
        acc
    }

    /// Whether the ball of reduced radius `reduced_radius` around `query` lies strictly
    /// inside the box, so that every point outside the box is farther than the radius.
    pub fn encloses_ball<D: Dissimilarity>(
        &self,
        query: &[F],
        reduced_radius: f64,
        metric: &D,
    ) -> bool {
        if !reduced_radius.is_finite() {
            return false;
        }
        query.iter().enumerate().all(|(axis, &q)| {
            let below: f64 = (q - self.min[axis]).as_();
            let above: f64 = (self.max[axis] - q).as_();
            below > 0.0
                && above > 0.0
                && metric.coordinate_distance(below) > reduced_radius
                && metric.coordinate_distance(above) > reduced_radius
        })
    }
}
