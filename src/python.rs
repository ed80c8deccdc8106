//! Python bindings (cargo feature `python`).

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::common_types::RecordMatrix;
use crate::error::KdTreeError;
use crate::knn::kd_tree::{KdTree, KdTreeParams};
use crate::knn::{Metric, Neighbor};

fn to_py_err(err: KdTreeError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

fn to_pairs(hits: Vec<Neighbor>) -> Vec<(u64, f64)> {
    hits.into_iter().map(|n| (n.id, n.distance)).collect()
}

/// Python-friendly representation of Metric. Minkowski is selected through `p`; passing
/// both `metric` and `p` raises `ValueError`.
#[pyclass(name = "Metric")]
#[derive(Clone)]
enum PyMetric {
    Euclidean,
    Manhattan,
    Chebyshev,
    Cosine,
}

impl From<PyMetric> for Metric {
    fn from(val: PyMetric) -> Self {
        match val {
            PyMetric::Euclidean => Metric::Euclidean,
            PyMetric::Manhattan => Metric::Manhattan,
            PyMetric::Chebyshev => Metric::Chebyshev,
            PyMetric::Cosine => Metric::Cosine,
        }
    }
}

#[pyclass(name = "KdTree")]
struct PyKdTree {
    tree: KdTree<f64>,
}

#[pymethods]
impl PyKdTree {
    #[new]
    #[pyo3(signature = (rows, bucket_size = KdTreeParams::DEFAULT_BUCKET_SIZE, metric = None, p = None, ids = None))]
    fn new(
        rows: Vec<Vec<f64>>,
        bucket_size: usize,
        metric: Option<PyMetric>,
        p: Option<f64>,
        ids: Option<Vec<u64>>,
    ) -> PyResult<Self> {
        let metric = Metric::select(metric.map(Metric::from), p).map_err(to_py_err)?;
        let mut records = RecordMatrix::from_rows(rows).map_err(to_py_err)?;
        if let Some(ids) = ids {
            records = records.with_ids(ids).map_err(to_py_err)?;
        }
        let params = KdTreeParams::default()
            .with_bucket_size(bucket_size)
            .with_metric(metric);
        let tree = KdTree::with_params(records, params).map_err(to_py_err)?;
        Ok(PyKdTree { tree })
    }

    /// Returns `[(id, distance), ...]` for the `k` nearest records.
    fn search(&self, query: Vec<f64>, k: usize) -> PyResult<Vec<(u64, f64)>> {
        self.tree.search(&query, k).map(to_pairs).map_err(to_py_err)
    }

    fn within_radius(&self, query: Vec<f64>, radius: f64) -> PyResult<Vec<(u64, f64)>> {
        self.tree
            .within_radius(&query, radius)
            .map(to_pairs)
            .map_err(to_py_err)
    }

    #[getter]
    fn dimensions(&self) -> usize {
        self.tree.dimensions()
    }

    #[getter]
    fn depth(&self) -> usize {
        self.tree.depth()
    }

    fn __len__(&self) -> usize {
        self.tree.len()
    }
}

/// The name of this function must match the `lib.name` in `Cargo.toml`.
#[pymodule]
fn kdbucket(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyMetric>()?;
    m.add_class::<PyKdTree>()?;
    Ok(())
}
