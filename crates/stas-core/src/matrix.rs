//! Dense row-major matrices for trait algebra
//!
//! Allocation matrices (`M x N`), team-trait matrices (`N x T`) and
//! desired-trait matrices (`M x T`) are small and dense, so a flat
//! `Vec<f32>` with row-major indexing covers everything the engine needs.

use serde::{Deserialize, Serialize};

/// A dense row-major matrix of `f32`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Create a matrix filled with zeros
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Create a matrix filled with ones
    pub fn ones(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![1.0; rows * cols],
        }
    }

    /// Build a matrix from a slice of rows.
    ///
    /// Returns `None` when the rows are ragged.
    pub fn from_rows(rows: &[Vec<f32>]) -> Option<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return None;
        }
        let mut data = Vec::with_capacity(height * width);
        for row in rows {
            data.extend_from_slice(row);
        }
        Some(Self {
            rows: height,
            cols: width,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col] = value;
    }

    /// Borrow one row as a slice
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Overwrite one row from a slice of matching width
    pub fn set_row(&mut self, row: usize, values: &[f32]) {
        debug_assert_eq!(values.len(), self.cols);
        let start = row * self.cols;
        self.data[start..start + self.cols].copy_from_slice(values);
    }

    /// Matrix product `self * rhs`
    ///
    /// Returns `None` on dimension mismatch.
    pub fn matmul(&self, rhs: &Self) -> Option<Self> {
        if self.cols != rhs.rows {
            return None;
        }
        let mut out = Self::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.get(i, k);
                if a == 0.0 {
                    continue;
                }
                for j in 0..rhs.cols {
                    out.data[i * rhs.cols + j] += a * rhs.get(k, j);
                }
            }
        }
        Some(out)
    }

    /// Element-wise subtraction `self - rhs`
    pub fn sub(&self, rhs: &Self) -> Option<Self> {
        if self.rows != rhs.rows || self.cols != rhs.cols {
            return None;
        }
        let data = self
            .data
            .iter()
            .zip(&rhs.data)
            .map(|(a, b)| a - b)
            .collect();
        Some(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// Element-wise `max(x, 0)`
    pub fn positive_part(&self) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|x| x.max(0.0)).collect(),
        }
    }

    /// Sum of all entries
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Whether every entry is exactly zero
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&x| x == 0.0)
    }

    /// Whether any entry is strictly positive
    pub fn any_positive(&self) -> bool {
        self.data.iter().any(|&x| x > 0.0)
    }

    /// Iterate entries in row-major order as `(row, col, value)`
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        let cols = self.cols;
        self.data
            .iter()
            .enumerate()
            .map(move |(idx, &v)| (idx / cols, idx % cols, v))
    }

    /// Flat access to the underlying buffer (row-major)
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
