use serde::{Deserialize, Serialize};

use crate::error::{RecError, Result};
use crate::utils::InnerId;

/// Row selector for the unique feature matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureRow {
    Known(InnerId),
    OutOfVocabulary,
}

/// Row-major per-entity feature matrix: one row per inner id plus a
/// trailing oov row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FeatureMatrixParts<T>")]
pub struct FeatureMatrix<T> {
    n_cols: usize,
    data: Vec<T>,
}

/// Deserialized fields, checked before they become a [`FeatureMatrix`].
#[derive(Deserialize)]
struct FeatureMatrixParts<T> {
    n_cols: usize,
    data: Vec<T>,
}

impl<T> TryFrom<FeatureMatrixParts<T>> for FeatureMatrix<T> {
    type Error = RecError;

    fn try_from(parts: FeatureMatrixParts<T>) -> Result<Self> {
        let FeatureMatrixParts { n_cols, data } = parts;
        if n_cols == 0 || data.is_empty() || data.len() % n_cols != 0 {
            return Err(RecError::Schema(format!(
                "feature matrix of {} values can't have {n_cols} columns and an oov row",
                data.len()
            )));
        }
        Ok(Self { n_cols, data })
    }
}

impl<T: Copy> FeatureMatrix<T> {
    /// `n_entities` rows filled with `fill`, followed by `oov_row`.
    pub fn new(n_entities: usize, fill: &[T], oov_row: &[T]) -> Result<Self> {
        if fill.len() != oov_row.len() || fill.is_empty() {
            return Err(RecError::Schema(format!(
                "feature row widths differ or are empty: {} vs {}",
                fill.len(),
                oov_row.len()
            )));
        }
        let n_cols = fill.len();
        let mut data = Vec::with_capacity((n_entities + 1) * n_cols);
        for _ in 0..n_entities {
            data.extend_from_slice(fill);
        }
        data.extend_from_slice(oov_row);
        Ok(Self { n_cols, data })
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Row count, the oov row included.
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.data.len() / self.n_cols
    }

    #[inline]
    pub fn n_entities(&self) -> usize {
        self.n_rows() - 1
    }

    pub fn row(&self, i: usize) -> Option<&[T]> {
        (i < self.n_rows()).then(|| &self.data[i * self.n_cols..(i + 1) * self.n_cols])
    }

    pub fn oov_row(&self) -> &[T] {
        let start = self.n_entities() * self.n_cols;
        &self.data[start..]
    }

    /// Known ids past the entity count fall back to the oov row.
    pub fn lookup(&self, row: FeatureRow) -> &[T] {
        match row {
            FeatureRow::Known(i) if (i as usize) < self.n_entities() => {
                let start = i as usize * self.n_cols;
                &self.data[start..start + self.n_cols]
            }
            _ => self.oov_row(),
        }
    }

    pub fn get(&self, i: usize, j: usize) -> Option<T> {
        self.row(i).and_then(|r| r.get(j).copied())
    }

    /// Writes a real entity row cell; the oov row is only set through
    /// `set_oov_row`.
    pub fn set(&mut self, i: usize, j: usize, value: T) -> Result<()> {
        if i >= self.n_entities() || j >= self.n_cols {
            return Err(RecError::InvalidArgument(format!(
                "cell ({i}, {j}) out of range for {} entities and {} columns",
                self.n_entities(),
                self.n_cols
            )));
        }
        self.data[i * self.n_cols + j] = value;
        Ok(())
    }

    pub fn set_oov_row(&mut self, values: &[T]) -> Result<()> {
        if values.len() != self.n_cols {
            return Err(RecError::Schema(format!(
                "oov row has {} values, expected {}",
                values.len(),
                self.n_cols
            )));
        }
        let start = self.n_entities() * self.n_cols;
        self.data[start..].copy_from_slice(values);
        Ok(())
    }

    /// Inserts `count` rows of `fill` right before the oov row.
    pub fn extend_entities(&mut self, count: usize, fill: &[T]) -> Result<()> {
        if fill.len() != self.n_cols {
            return Err(RecError::Schema(format!(
                "new rows have {} values, expected {}",
                fill.len(),
                self.n_cols
            )));
        }
        let oov: Vec<T> = self.oov_row().to_vec();
        let start = self.n_entities() * self.n_cols;
        self.data.truncate(start);
        for _ in 0..count {
            self.data.extend_from_slice(fill);
        }
        self.data.extend_from_slice(&oov);
        Ok(())
    }

    /// Applies `f(column, value)` to every cell, the oov row included.
    pub fn try_map_in_place<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, T) -> Result<T>,
    {
        let n_cols = self.n_cols;
        for (pos, cell) in self.data.iter_mut().enumerate() {
            *cell = f(pos % n_cols, *cell)?;
        }
        Ok(())
    }
}

impl FeatureMatrix<f32> {
    /// Per-column mean over the real entity rows.
    pub fn column_means(&self) -> Vec<f32> {
        let n = self.n_entities();
        let mut sums = vec![0.0f64; self.n_cols];
        for i in 0..n {
            let row = &self.data[i * self.n_cols..(i + 1) * self.n_cols];
            for (s, &v) in sums.iter_mut().zip(row) {
                *s += f64::from(v);
            }
        }
        if n == 0 {
            return vec![0.0; self.n_cols];
        }
        sums.into_iter().map(|s| (s / n as f64) as f32).collect()
    }

    pub fn refresh_oov_mean(&mut self) -> Result<()> {
        let means = self.column_means();
        self.set_oov_row(&means)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_lookup() -> Result<()> {
        let mut m = FeatureMatrix::new(2, &[0usize, 0], &[5, 9])?;
        assert_eq!(m.n_rows(), 3);
        m.set(1, 0, 3)?;
        assert_eq!(m.lookup(FeatureRow::Known(1)), &[3, 0]);
        assert_eq!(m.lookup(FeatureRow::OutOfVocabulary), &[5, 9]);
        assert_eq!(m.lookup(FeatureRow::Known(2)), &[5, 9]);
        assert!(m.set(2, 0, 1).is_err());
        Ok(())
    }

    #[test]
    fn test_extend_inserts_before_oov() -> Result<()> {
        let mut m = FeatureMatrix::new(1, &[1usize], &[7])?;
        m.extend_entities(2, &[4])?;
        assert_eq!(m.n_entities(), 3);
        assert_eq!(m.row(0), Some(&[1usize][..]));
        assert_eq!(m.row(2), Some(&[4usize][..]));
        assert_eq!(m.oov_row(), &[7]);
        Ok(())
    }

    #[test]
    fn test_deserialize_checks_shape() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let m = FeatureMatrix::new(2, &[1usize, 2], &[3, 4])?;
        let restored: FeatureMatrix<usize> = bincode::deserialize(&bincode::serialize(&m)?)?;
        assert_eq!(restored, m);

        for (n_cols, data) in [(0usize, vec![1usize, 2]), (2, vec![]), (2, vec![1, 2, 3])] {
            let bytes = bincode::serialize(&(n_cols, data))?;
            assert!(bincode::deserialize::<FeatureMatrix<usize>>(&bytes).is_err());
        }
        Ok(())
    }

    #[test]
    fn test_dense_mean() -> Result<()> {
        let mut m = FeatureMatrix::new(2, &[0.0f32, 0.0], &[0.0, 0.0])?;
        m.set(0, 0, 1.0)?;
        m.set(1, 0, 3.0)?;
        m.set(1, 1, 4.0)?;
        m.refresh_oov_mean()?;
        assert_eq!(m.oov_row(), &[2.0, 2.0]);
        Ok(())
    }
}
