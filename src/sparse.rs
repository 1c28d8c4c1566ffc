use std::hash::Hash;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};

/// Analogy of `scipy.sparse.csr_matrix`
/// https://docs.scipy.org/doc/scipy/reference/generated/scipy.sparse.csr_matrix.html
#[cfg_attr(feature = "python", derive(pyo3::FromPyObject))]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CsrMatrix<T, U> {
    #[cfg_attr(feature = "python", pyo3(attribute("sparse_indices")))]
    pub indices: Vec<T>,
    #[cfg_attr(feature = "python", pyo3(attribute("sparse_indptr")))]
    pub indptr: Vec<usize>,
    #[cfg_attr(feature = "python", pyo3(attribute("sparse_data")))]
    pub data: Vec<U>,
}

impl<T: Copy + Eq + Hash + Ord, U: Copy> CsrMatrix<T, U> {
    pub fn new(indices: Vec<T>, indptr: Vec<usize>, data: Vec<U>) -> Result<Self> {
        if indptr.first().copied() != Some(0) {
            return Err(RecError::InvalidArgument(
                "indptr must start with 0".to_string(),
            ));
        }
        if indices.len() != data.len() || indptr.last().copied() != Some(indices.len()) {
            return Err(RecError::InvalidArgument(format!(
                "inconsistent csr layout: {} indices, {} values, last indptr {:?}",
                indices.len(),
                data.len(),
                indptr.last()
            )));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(RecError::InvalidArgument(
                "indptr must be non-decreasing".to_string(),
            ));
        }
        Ok(Self {
            indices,
            indptr,
            data,
        })
    }

    /// Matrix with `n_rows` empty rows.
    pub fn empty(n_rows: usize) -> Self {
        Self {
            indices: Vec::new(),
            indptr: vec![0; n_rows + 1],
            data: Vec::new(),
        }
    }

    /// Assembles rows whose entries are already sorted by column.
    pub fn from_sorted_rows(rows: Vec<Vec<(T, U)>>) -> Self {
        let nnz = rows.iter().map(Vec::len).sum();
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        indptr.push(0);
        for row in rows {
            for (idx, dat) in row {
                indices.push(idx);
                data.push(dat);
            }
            indptr.push(indices.len());
        }
        Self {
            indices,
            indptr,
            data,
        }
    }

    pub fn values(&self) -> (&[T], &[usize], &[U]) {
        (&self.indices, &self.indptr, &self.data)
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.indptr.len().saturating_sub(1)
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Column indices and values of row `i`, empty slices when out of range.
    #[inline]
    pub fn row(&self, i: usize) -> (&[T], &[U]) {
        if i >= self.n_rows() {
            return (&[], &[]);
        }
        let start = self.indptr[i];
        let end = self.indptr[i + 1];
        (&self.indices[start..end], &self.data[start..end])
    }

    #[inline]
    pub fn row_nnz(&self, i: usize) -> usize {
        if i >= self.n_rows() {
            0
        } else {
            self.indptr[i + 1] - self.indptr[i]
        }
    }

    /// Binary search in row `i`, relies on sorted column indices.
    pub fn get(&self, i: usize, j: T) -> Option<U> {
        let (indices, data) = self.row(i);
        indices.binary_search(&j).ok().map(|pos| data[pos])
    }

    pub fn has_sorted_indices(&self) -> bool {
        (0..self.n_rows()).all(|i| self.row(i).0.windows(2).all(|w| w[0] < w[1]))
    }
}

impl<U: Copy + Default + std::ops::AddAssign> CsrMatrix<u32, U> {
    /// Builds a matrix from coordinate triplets, summing duplicated entries.
    pub fn from_triplets(rows: &[u32], cols: &[u32], data: &[U], n_rows: usize) -> Result<Self> {
        if rows.len() != cols.len() || rows.len() != data.len() {
            return Err(RecError::InvalidArgument(format!(
                "triplet lengths differ: rows {}, cols {}, data {}",
                rows.len(),
                cols.len(),
                data.len()
            )));
        }
        let mut dok: DokMatrix<u32, U> = DokMatrix::new(n_rows);
        for ((&r, &c), &d) in rows.iter().zip(cols).zip(data) {
            dok.add(r as usize, c, d)?;
        }
        Ok(dok.to_csr())
    }

    /// Transposed matrix with `n_cols` rows, column indices stay sorted.
    pub fn transpose(&self, n_cols: usize) -> Result<Self> {
        let mut counts = vec![0usize; n_cols + 1];
        for &j in &self.indices {
            let j = j as usize;
            if j >= n_cols {
                return Err(RecError::InvalidArgument(format!(
                    "column index {j} out of range for {n_cols} columns"
                )));
            }
            counts[j + 1] += 1;
        }
        for j in 0..n_cols {
            counts[j + 1] += counts[j];
        }
        let indptr = counts.clone();
        let mut next = counts;
        let mut indices = vec![0u32; self.nnz()];
        let mut data = vec![U::default(); self.nnz()];
        // rows are visited in ascending order, so every output row ends up sorted
        for i in 0..self.n_rows() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                let pos = next[j as usize];
                indices[pos] = i as u32;
                data[pos] = v;
                next[j as usize] += 1;
            }
        }
        Ok(Self {
            indices,
            indptr,
            data,
        })
    }
}

/// Analogy of `scipy.sparse.dok_matrix`
/// https://docs.scipy.org/doc/scipy/reference/generated/scipy.sparse.dok_matrix.html
pub(crate) struct DokMatrix<T = u32, U = f32> {
    data: Vec<FxHashMap<T, U>>,
}

impl<T, U> DokMatrix<T, U>
where
    T: Copy + Eq + Hash + Ord,
    U: Copy + std::ops::AddAssign,
{
    fn new(n_rows: usize) -> Self {
        Self {
            data: vec![FxHashMap::default(); n_rows],
        }
    }

    fn add(&mut self, i: usize, j: T, value: U) -> Result<()> {
        let n_rows = self.data.len();
        let row = self.data.get_mut(i).ok_or_else(|| {
            RecError::InvalidArgument(format!("row index {i} out of range for {n_rows} rows"))
        })?;
        row.entry(j).and_modify(|v| *v += value).or_insert(value);
        Ok(())
    }

    fn to_csr(&self) -> CsrMatrix<T, U> {
        let mut indices: Vec<T> = Vec::new();
        let mut indptr: Vec<usize> = vec![0];
        let mut data: Vec<U> = Vec::new();
        for d in &self.data {
            if !d.is_empty() {
                let mut mapping: Vec<(&T, &U)> = d.iter().collect();
                mapping.sort_unstable_by_key(|(i, _)| *i);
                let (idx, dat): (Vec<T>, Vec<U>) = mapping.into_iter().unzip();
                indices.extend(idx);
                data.extend(dat);
            }
            // keep empty rows so row index == inner id
            indptr.push(indices.len());
        }
        CsrMatrix {
            indices,
            indptr,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_triplets_sums_duplicates() -> Result<()> {
        // [
        //   [0, 3, 0],
        //   [],
        //   [1, 0, 2],
        // ]
        let rows = vec![0, 2, 0, 2, 0];
        let cols = vec![1, 2, 1, 0, 1];
        let data = vec![1.0, 2.0, 1.0, 1.0, 1.0];
        let matrix: CsrMatrix<u32, f32> = CsrMatrix::from_triplets(&rows, &cols, &data, 3)?;
        assert_eq!(matrix.indptr, vec![0, 1, 1, 3]);
        assert_eq!(matrix.indices, vec![1, 0, 2]);
        assert_eq!(matrix.data, vec![3.0, 1.0, 2.0]);
        assert!(matrix.has_sorted_indices());
        Ok(())
    }

    #[test]
    fn test_from_triplets_out_of_range() {
        let res: Result<CsrMatrix<u32, f32>> = CsrMatrix::from_triplets(&[3], &[0], &[1.0], 2);
        assert!(matches!(res, Err(RecError::InvalidArgument(_))));
    }

    #[test]
    fn test_transpose() -> Result<()> {
        // [
        //   [0, 2, 0, 0],
        //   [0, 0, 0, 3],
        //   [4, 5, 0, 0],
        // ]
        let matrix: CsrMatrix<u32, i32> =
            CsrMatrix::new(vec![1, 3, 0, 1], vec![0, 1, 2, 4], vec![2, 3, 4, 5])?;
        let t = matrix.transpose(4)?;
        assert_eq!(t.indptr, vec![0, 1, 3, 3, 4]);
        assert_eq!(t.indices, vec![2, 0, 2, 1]);
        assert_eq!(t.data, vec![4, 2, 5, 3]);
        assert!(t.has_sorted_indices());
        assert_eq!(t.transpose(3)?, matrix);
        Ok(())
    }

    #[test]
    fn test_row_access() -> Result<()> {
        let matrix: CsrMatrix<u32, f32> =
            CsrMatrix::new(vec![0, 2], vec![0, 2, 2], vec![1.0, 5.0])?;
        assert_eq!(matrix.n_rows(), 2);
        assert_eq!(matrix.get(0, 2), Some(5.0));
        assert_eq!(matrix.get(0, 1), None);
        assert_eq!(matrix.row_nnz(1), 0);
        assert_eq!(matrix.row(0), (&[0u32, 2][..], &[1.0f32, 5.0][..]));
        assert!(matrix.row(1).0.is_empty());
        assert!(matrix.row(7).0.is_empty());
        Ok(())
    }

    #[test]
    fn test_invalid_layout() {
        let res: Result<CsrMatrix<u32, f32>> =
            CsrMatrix::new(vec![0, 1], vec![0, 1], vec![1.0, 1.0]);
        assert!(res.is_err());
        let res: Result<CsrMatrix<u32, f32>> = CsrMatrix::new(vec![0], vec![1, 1], vec![1.0]);
        assert!(res.is_err());
    }

    #[test]
    fn test_unsorted_detection() {
        let matrix: CsrMatrix<u32, f32> = CsrMatrix {
            indices: vec![2, 1],
            indptr: vec![0, 2],
            data: vec![1.0, 1.0],
        };
        assert!(!matrix.has_sorted_indices());
        let sorted = CsrMatrix::from_sorted_rows(vec![vec![(1u32, 1.0f32), (2, 1.0)], vec![]]);
        assert!(sorted.has_sorted_indices());
        assert_eq!(sorted.indptr, vec![0, 2, 2]);
    }
}
