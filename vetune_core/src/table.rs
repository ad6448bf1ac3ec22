//! Calibration table data model.
//!
//! A `TableGrid` is two strictly monotonic axes plus a dense, row-major value
//! arena addressed by `CellIndex`. Rows follow the y axis, columns the x axis.
//! Every constructor and mutator keeps the grid finite and rectangular; values
//! are only changed through explicit operations on a grid the caller owns.

use serde::Serialize;

use crate::error::{Axis, Result, TuneError, ValidationError};
use crate::util::nearest_index;

/// Position of a cell, `row` along the y axis and `col` along the x axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CellIndex {
    pub row: usize,
    pub col: usize,
}

impl CellIndex {
    #[inline]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl From<(usize, usize)> for CellIndex {
    fn from((row, col): (usize, usize)) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for CellIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Sorted, de-duplicated set of cells targeted by a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    cells: Vec<CellIndex>,
}

impl Selection {
    pub fn new<I, C>(cells: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CellIndex>,
    {
        let mut cells: Vec<CellIndex> = cells.into_iter().map(Into::into).collect();
        cells.sort_unstable();
        cells.dedup();
        Self { cells }
    }

    /// Inclusive rectangle spanned by two corners, in any order.
    pub fn rect(a: CellIndex, b: CellIndex) -> Self {
        let (r0, r1) = (a.row.min(b.row), a.row.max(b.row));
        let (c0, c1) = (a.col.min(b.col), a.col.max(b.col));
        Self::new((r0..=r1).flat_map(|r| (c0..=c1).map(move |c| CellIndex::new(r, c))))
    }

    /// Every cell of a `rows` x `cols` table.
    pub fn all(rows: usize, cols: usize) -> Self {
        if rows == 0 || cols == 0 {
            return Self::default();
        }
        Self::rect(CellIndex::new(0, 0), CellIndex::new(rows - 1, cols - 1))
    }

    pub fn cells(&self) -> &[CellIndex] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, cell: CellIndex) -> bool {
        self.cells.binary_search(&cell).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = CellIndex> + '_ {
        self.cells.iter().copied()
    }

    /// Reject empty selections and any index outside `rows` x `cols`.
    pub fn validate(&self, rows: usize, cols: usize) -> Result<(), ValidationError> {
        if self.cells.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        if let Some(bad) = self.cells.iter().find(|c| c.row >= rows || c.col >= cols) {
            return Err(ValidationError::CellOutOfBounds {
                row: bad.row,
                col: bad.col,
                rows,
                cols,
            });
        }
        Ok(())
    }

    /// `(min corner, max corner)` of the selection, `None` when empty.
    pub fn bounding_box(&self) -> Option<(CellIndex, CellIndex)> {
        let first = self.cells.first()?;
        let mut lo = *first;
        let mut hi = *first;
        for c in &self.cells {
            lo.row = lo.row.min(c.row);
            lo.col = lo.col.min(c.col);
            hi.row = hi.row.max(c.row);
            hi.col = hi.col.max(c.col);
        }
        Some((lo, hi))
    }
}

impl FromIterator<CellIndex> for Selection {
    fn from_iter<T: IntoIterator<Item = CellIndex>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Check that an axis is non-empty, finite and strictly monotonic in either direction.
pub fn validate_axis(axis: Axis, bins: &[f64]) -> Result<(), ValidationError> {
    if bins.is_empty() {
        return Err(ValidationError::EmptyAxis { axis });
    }
    if let Some(i) = bins.iter().position(|b| !b.is_finite()) {
        return Err(ValidationError::InvalidParameter(format!(
            "{axis} bin {i} is not finite"
        )));
    }
    let mut dir = 0i8;
    for (i, w) in bins.windows(2).enumerate() {
        let step = if w[1] > w[0] {
            1
        } else if w[1] < w[0] {
            -1
        } else {
            0
        };
        if step == 0 || (dir != 0 && step != dir) {
            return Err(ValidationError::NonMonotonicAxis {
                axis,
                index: i,
                next: i + 1,
            });
        }
        dir = step;
    }
    Ok(())
}

/// 2D calibration table: axes plus a dense row-major value arena.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGrid {
    x_bins: Vec<f64>,
    y_bins: Vec<f64>,
    values: Vec<f64>,
}

impl TableGrid {
    /// Build a grid from `values[row][col]`, validating every invariant.
    pub fn new(
        x_bins: Vec<f64>,
        y_bins: Vec<f64>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self, ValidationError> {
        validate_axis(Axis::X, &x_bins)?;
        validate_axis(Axis::Y, &y_bins)?;
        if values.len() != y_bins.len() {
            return Err(ValidationError::DimensionMismatch(format!(
                "{} rows for {} y bins",
                values.len(),
                y_bins.len()
            )));
        }
        let cols = x_bins.len();
        let mut flat = Vec::with_capacity(values.len() * cols);
        for (row, r) in values.into_iter().enumerate() {
            if r.len() != cols {
                return Err(ValidationError::DimensionMismatch(format!(
                    "row {row} has {} values for {cols} x bins",
                    r.len()
                )));
            }
            if let Some(col) = r.iter().position(|v| !v.is_finite()) {
                return Err(ValidationError::NonFiniteValue { row, col });
            }
            flat.extend(r);
        }
        Ok(Self {
            x_bins,
            y_bins,
            values: flat,
        })
    }

    /// Grid with every cell set to `value`.
    pub fn uniform(x_bins: Vec<f64>, y_bins: Vec<f64>, value: f64) -> Result<Self, ValidationError> {
        let rows = vec![vec![value; x_bins.len()]; y_bins.len()];
        Self::new(x_bins, y_bins, rows)
    }

    pub fn x_bins(&self) -> &[f64] {
        &self.x_bins
    }

    pub fn y_bins(&self) -> &[f64] {
        &self.y_bins
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.y_bins.len()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.x_bins.len()
    }

    /// Number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flat row-major view of the values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Copy of the values as `[row][col]`.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values
            .chunks(self.cols())
            .map(<[f64]>::to_vec)
            .collect()
    }

    #[inline]
    pub fn contains(&self, cell: CellIndex) -> bool {
        cell.row < self.rows() && cell.col < self.cols()
    }

    /// Row-major arena offset of `cell`, `None` when out of bounds.
    #[inline]
    pub fn offset(&self, cell: CellIndex) -> Option<usize> {
        self.contains(cell).then(|| cell.row * self.cols() + cell.col)
    }

    pub fn value(&self, cell: CellIndex) -> Option<f64> {
        self.offset(cell).map(|i| self.values[i])
    }

    /// Unchecked read for indices already validated by the caller.
    #[inline]
    pub(crate) fn at(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols() + col]
    }

    #[inline]
    pub(crate) fn at_mut(&mut self, row: usize, col: usize) -> &mut f64 {
        let cols = self.cols();
        &mut self.values[row * cols + col]
    }

    pub fn set(&mut self, cell: CellIndex, value: f64) -> Result<(), ValidationError> {
        let i = self.offset(cell).ok_or(ValidationError::CellOutOfBounds {
            row: cell.row,
            col: cell.col,
            rows: self.rows(),
            cols: self.cols(),
        })?;
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                row: cell.row,
                col: cell.col,
            });
        }
        self.values[i] = value;
        Ok(())
    }

    /// Axis coordinates `(x, y)` of a cell.
    pub fn cell_coords(&self, cell: CellIndex) -> Option<(f64, f64)> {
        self.contains(cell)
            .then(|| (self.x_bins[cell.col], self.y_bins[cell.row]))
    }

    /// Cell whose bins are closest to `(x, y)`; out-of-range points land on the edge.
    pub fn nearest_cell(&self, x: f64, y: f64) -> CellIndex {
        CellIndex::new(nearest_index(&self.y_bins, y), nearest_index(&self.x_bins, x))
    }

    /// `(min, max)` over all values. A plain O(n) pass; tables stay small
    /// (typically <= 32x32), so display scaling recomputes this per request.
    pub fn min_max(&self) -> (f64, f64) {
        self.values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            })
    }

    /// Multiply every selected cell by `factor`.
    pub fn scale(&mut self, selection: &Selection, factor: f64) -> Result<()> {
        selection.validate(self.rows(), self.cols())?;
        if !factor.is_finite() {
            return Err(ValidationError::InvalidParameter(format!(
                "scale factor must be finite, got {factor}"
            ))
            .into());
        }
        // Check the whole selection first so a failure leaves the grid untouched.
        for c in selection.iter() {
            if !(self.at(c.row, c.col) * factor).is_finite() {
                return Err(ValidationError::NonFiniteValue {
                    row: c.row,
                    col: c.col,
                }
                .into());
            }
        }
        for c in selection.iter() {
            *self.at_mut(c.row, c.col) *= factor;
        }
        Ok(())
    }

    /// Assign the arithmetic mean of the selected cells to each of them.
    /// Returns the mean.
    pub fn set_equal(&mut self, selection: &Selection) -> Result<f64> {
        selection.validate(self.rows(), self.cols())?;
        let sum: f64 = selection.iter().map(|c| self.at(c.row, c.col)).sum();
        let mean = sum / selection.len() as f64;
        if !mean.is_finite() {
            return Err(TuneError::Numerical(crate::error::NumericalError::Overflow(
                "set_equal mean",
            )));
        }
        for c in selection.iter() {
            *self.at_mut(c.row, c.col) = mean;
        }
        Ok(mean)
    }
}
