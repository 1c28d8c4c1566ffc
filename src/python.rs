use pyo3::prelude::*;
use pyo3::types::{IntoPyDict, PyDict, PyList};

use crate::consumed::ConsumptionIndex;
use crate::similarities::{self, SimMode, SimType};
use crate::sparse::CsrMatrix;

/// Build user_consumed and item_consumed with consecutive duplicates removed.
///
/// Example: [10, 10, 20, 10, 30, 30] -> [10, 20, 10, 30]
#[pyfunction]
#[pyo3(name = "build_consumed_unique")]
pub fn build_consumed<'py>(
    py: Python<'py>,
    user_indices: &Bound<'py, PyList>,
    item_indices: &Bound<'py, PyList>,
) -> PyResult<(Bound<'py, PyDict>, Bound<'py, PyDict>)> {
    let user_indices: Vec<u32> = user_indices.extract()?;
    let item_indices: Vec<u32> = item_indices.extract()?;
    let mut consumption = ConsumptionIndex::build(&user_indices, &item_indices)?;
    consumption.dedup_consecutive();

    let (user_consumed, item_consumed) = consumption.into_parts();
    Ok((user_consumed.into_py_dict(py)?, item_consumed.into_py_dict(py)?))
}

/// Similarity matrix of the rows of `primary`, returned as
/// `(indices, indptr, data)`.
///
/// Both matrices are objects exposing `sparse_indices`, `sparse_indptr`
/// and `sparse_data`.
#[allow(clippy::too_many_arguments)]
#[pyfunction]
#[pyo3(signature = (
    primary,
    transpose,
    n_primary,
    n_secondary,
    sim_type,
    mode = "invert",
    num_threads = 1,
    min_common = 1,
    block_size = None,
))]
pub fn compute_similarity(
    primary: &Bound<'_, PyAny>,
    transpose: &Bound<'_, PyAny>,
    n_primary: usize,
    n_secondary: usize,
    sim_type: &str,
    mode: &str,
    num_threads: usize,
    min_common: u32,
    block_size: Option<usize>,
) -> PyResult<(Vec<u32>, Vec<usize>, Vec<f32>)> {
    let primary: CsrMatrix<u32, f32> = primary.extract()?;
    let transpose: CsrMatrix<u32, f32> = transpose.extract()?;
    let sim_type: SimType = sim_type.parse()?;
    let mode: SimMode = mode.parse()?;
    let sim_matrix = similarities::compute_similarity(
        &primary,
        &transpose,
        n_primary,
        n_secondary,
        sim_type,
        mode,
        block_size,
        num_threads,
        min_common,
    )?;
    Ok((sim_matrix.indices, sim_matrix.indptr, sim_matrix.data))
}

/// The `k_sim` most similar neighbors of every row as `(id, sim)` pairs.
#[pyfunction]
#[pyo3(signature = (sim_matrix, k_sim, num_threads = 1))]
pub fn compute_top_k(
    sim_matrix: &Bound<'_, PyAny>,
    k_sim: usize,
    num_threads: usize,
) -> PyResult<Vec<Vec<(u32, f32)>>> {
    let sim_matrix: CsrMatrix<u32, f32> = sim_matrix.extract()?;
    let top_k = similarities::compute_top_k(&sim_matrix, k_sim, num_threads)?;
    let top_k = top_k
        .into_iter()
        .map(|nbs| nbs.into_iter().map(|n| (n.id, n.sim)).collect())
        .collect();
    Ok(top_k)
}

/// The name of this function must match the `lib.name` setting in the
/// `Cargo.toml`, else Python will not be able to import the module.
#[pymodule]
fn recfarm(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(build_consumed, m)?)?;
    m.add_function(wrap_pyfunction!(compute_similarity, m)?)?;
    m.add_function(wrap_pyfunction!(compute_top_k, m)?)?;
    m.add("__version__", crate::VERSION)?;
    Ok(())
}
