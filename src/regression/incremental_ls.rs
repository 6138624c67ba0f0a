//! Incremental least squares
//!
//! Regression is solved from sufficient statistics: `X'X` and `X'Y` add up
//! across any partition of the rows, so workers compute them for their own
//! block and the driver only sums and solves once.
//!
//! Partial statistics are sparse (a continuous job touches a narrow band of
//! columns); the global accumulator is dense.

use crate::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Coordinate-format sparse matrix. Entries at the same coordinate add up.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseBlock {
    rows: usize,
    cols: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl SparseBlock {
    /// Create an all-zero `rows × cols` block.
    #[must_use]
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            entries: Vec::new(),
        }
    }

    /// Add `value` at `(row, col)`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the coordinate is outside the block.
    pub fn push(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(Error::shape(
                format!("coordinate inside {}×{}", self.rows, self.cols),
                format!("({row}, {col})"),
            ));
        }
        self.entries.push((row, col, value));
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub const fn nrows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn ncols(&self) -> usize {
        self.cols
    }

    /// Number of stored entries (duplicates included).
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Dense copy, mainly for testing.
    #[must_use]
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for &(i, j, v) in &self.entries {
            dense[[i, j]] += v;
        }
        dense
    }
}

/// Regressor rows handed to the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum RegressorBlock {
    /// Dense `rows × width` matrix
    Dense(Array2<f64>),
    /// Sparse `rows × width` matrix
    Sparse(SparseBlock),
}

impl RegressorBlock {
    /// Number of rows.
    #[must_use]
    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(x) => x.nrows(),
            Self::Sparse(x) => x.nrows(),
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(x) => x.ncols(),
            Self::Sparse(x) => x.ncols(),
        }
    }

    /// Non-zero entries of every row, by ascending column, duplicates summed.
    fn row_entries(&self) -> Vec<Vec<(usize, f64)>> {
        match self {
            Self::Dense(x) => x
                .rows()
                .into_iter()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .filter(|(_, v)| **v != 0.0)
                        .map(|(j, v)| (j, *v))
                        .collect()
                })
                .collect(),
            Self::Sparse(x) => {
                let mut rows: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); x.rows];
                for &(i, j, v) in &x.entries {
                    *rows[i].entry(j).or_insert(0.0) += v;
                }
                rows.into_iter()
                    .map(|row| row.into_iter().filter(|(_, v)| *v != 0.0).collect())
                    .collect()
            }
        }
    }
}

/// Sufficient statistic of one block of rows.
///
/// Only the upper triangle of `X'X` is kept. Entries are sorted by
/// coordinate, which makes merging and absorbing deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialStatistic {
    width: usize,
    outputs: usize,
    rows: usize,
    xtx: Vec<((usize, usize), f64)>,
    xty: Vec<(usize, Array1<f64>)>,
}

impl PartialStatistic {
    /// Empty statistic for `width` regressors and `outputs` response columns.
    #[must_use]
    pub const fn empty(width: usize, outputs: usize) -> Self {
        Self {
            width,
            outputs,
            rows: 0,
            xtx: Vec::new(),
            xty: Vec::new(),
        }
    }

    /// Compute `X'X` and `X'Y` for one block.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `x` and `y` disagree on the row count.
    pub fn from_block(x: &RegressorBlock, y: ArrayView2<'_, f64>) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(Error::shape(
                format!("{} response rows", x.nrows()),
                format!("{} response rows", y.nrows()),
            ));
        }
        let outputs = y.ncols();
        let mut xtx: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut xty: BTreeMap<usize, Array1<f64>> = BTreeMap::new();

        for (i, entries) in x.row_entries().into_iter().enumerate() {
            let response = y.row(i);
            for (k, &(a, va)) in entries.iter().enumerate() {
                for &(b, vb) in &entries[k..] {
                    *xtx.entry((a, b)).or_insert(0.0) += va * vb;
                }
                xty.entry(a)
                    .or_insert_with(|| Array1::zeros(outputs))
                    .scaled_add(va, &response);
            }
        }

        Ok(Self {
            width: x.ncols(),
            outputs,
            rows: x.nrows(),
            xtx: xtx.into_iter().collect(),
            xty: xty.into_iter().collect(),
        })
    }

    /// Regressor width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Response width.
    #[must_use]
    pub const fn outputs(&self) -> usize {
        self.outputs
    }

    /// Rows absorbed so far.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Combine two statistics over disjoint rows.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the two statistics have different shapes.
    pub fn merge(self, other: Self) -> Result<Self> {
        check_shape((self.width, self.outputs), (other.width, other.outputs))?;
        Ok(Self {
            width: self.width,
            outputs: self.outputs,
            rows: self.rows + other.rows,
            xtx: merge_sorted(self.xtx, other.xtx, |a, b| a + b),
            xty: merge_sorted(self.xty, other.xty, |a, b| a + b),
        })
    }
}

fn check_shape(expected: (usize, usize), actual: (usize, usize)) -> Result<()> {
    if expected != actual {
        return Err(Error::shape(
            format!("{} regressors × {} outputs", expected.0, expected.1),
            format!("{} regressors × {} outputs", actual.0, actual.1),
        ));
    }
    Ok(())
}

fn merge_sorted<K: Ord, V>(a: Vec<(K, V)>, b: Vec<(K, V)>, add: impl Fn(V, V) -> V) -> Vec<(K, V)> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    loop {
        let order = match (a.peek(), b.peek()) {
            (Some((ka, _)), Some((kb, _))) => ka.cmp(kb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Less => out.extend(a.next()),
            Ordering::Greater => out.extend(b.next()),
            Ordering::Equal => {
                if let (Some((k, va)), Some((_, vb))) = (a.next(), b.next()) {
                    out.push((k, add(va, vb)));
                }
            }
        }
    }
    out
}

/// Least-squares solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// `width × outputs` coefficients; dropped columns are zero
    pub coefficients: Array2<f64>,
    /// Columns the data could not identify
    pub dropped_columns: Vec<usize>,
}

/// Dense running `X'X` / `X'Y`.
#[derive(Debug, Clone, PartialEq)]
pub struct XtXAccumulator {
    xtx: Array2<f64>,
    xty: Array2<f64>,
    rows: usize,
}

impl XtXAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new(width: usize, outputs: usize) -> Self {
        Self {
            xtx: Array2::zeros((width, width)),
            xty: Array2::zeros((width, outputs)),
            rows: 0,
        }
    }

    /// Regressor width.
    #[must_use]
    pub fn width(&self) -> usize {
        self.xtx.nrows()
    }

    /// Response width.
    #[must_use]
    pub fn outputs(&self) -> usize {
        self.xty.ncols()
    }

    /// Rows absorbed so far.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Add a partial statistic.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the partial has a different shape.
    pub fn absorb(&mut self, partial: &PartialStatistic) -> Result<()> {
        check_shape((self.width(), self.outputs()), (partial.width, partial.outputs))?;
        for &((a, b), v) in &partial.xtx {
            self.xtx[[a, b]] += v;
        }
        for (a, row) in &partial.xty {
            let mut target = self.xty.row_mut(*a);
            target += row;
        }
        self.rows += partial.rows;
        Ok(())
    }

    /// Add another accumulator.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the shapes differ.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        check_shape((self.width(), self.outputs()), (other.width(), other.outputs()))?;
        self.xtx += &other.xtx;
        self.xty += &other.xty;
        self.rows += other.rows;
        Ok(())
    }

    /// Solve the normal equations by Cholesky factorization.
    ///
    /// A column whose pivot falls below `rank_tolerance` times the largest
    /// diagonal entry is linearly dependent on earlier columns (or never
    /// observed); it is dropped and its coefficients are zero.
    #[must_use]
    pub fn solve(&self, rank_tolerance: f64) -> Solution {
        let n = self.width();
        let outputs = self.outputs();
        let max_diag = (0..n).map(|i| self.xtx[[i, i]]).fold(0.0_f64, f64::max);
        let threshold = rank_tolerance * max_diag;

        // Only the upper triangle is populated; read it symmetrically.
        let a = |i: usize, j: usize| {
            if i <= j {
                self.xtx[[i, j]]
            } else {
                self.xtx[[j, i]]
            }
        };

        let mut l = Array2::<f64>::zeros((n, n));
        let mut kept = Vec::with_capacity(n);
        let mut dropped_columns = Vec::new();
        for j in 0..n {
            let pivot = a(j, j) - kept.iter().map(|&k| l[[j, k]] * l[[j, k]]).sum::<f64>();
            if max_diag <= 0.0 || pivot <= threshold {
                dropped_columns.push(j);
                continue;
            }
            let d = pivot.sqrt();
            l[[j, j]] = d;
            for i in (j + 1)..n {
                let dot: f64 = kept.iter().map(|&k| l[[i, k]] * l[[j, k]]).sum();
                l[[i, j]] = (a(i, j) - dot) / d;
            }
            kept.push(j);
        }

        // L z = X'Y, then L' beta = z, over kept columns only.
        let mut z = Array2::<f64>::zeros((n, outputs));
        for (pos, &i) in kept.iter().enumerate() {
            let mut row = self.xty.row(i).to_owned();
            for &k in &kept[..pos] {
                row.scaled_add(-l[[i, k]], &z.row(k));
            }
            row /= l[[i, i]];
            z.row_mut(i).assign(&row);
        }
        let mut coefficients = Array2::<f64>::zeros((n, outputs));
        for (pos, &i) in kept.iter().enumerate().rev() {
            let mut row = z.row(i).to_owned();
            for &k in &kept[pos + 1..] {
                row.scaled_add(-l[[k, i]], &coefficients.row(k));
            }
            row /= l[[i, i]];
            coefficients.row_mut(i).assign(&row);
        }

        Solution {
            coefficients,
            dropped_columns,
        }
    }
}
