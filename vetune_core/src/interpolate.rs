//! Bilinear interpolation, corner interpolation and axis rebinning.
//!
//! Every primitive here is strict: queries outside an axis fail with
//! `TuneError::OutOfRange`, and a zero-width bracket fails with
//! `NumericalError::ZeroWidthBracket`. Edge clamping is an explicit opt-in
//! (`interpolate_clamped`, `interpolate_1d_clamped`) used by rebinning, target
//! lookups and the delay curve.

use crate::error::{Axis, NumericalError, Result, TuneError, ValidationError};
use crate::table::{Selection, TableGrid, validate_axis};
use crate::util::lerp;

/// Bracketing bin pair and the fractional position between them.
/// An exact bin hit is `lo == hi` with `t == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Bracket {
    pub lo: usize,
    pub hi: usize,
    pub t: f64,
}

impl Bracket {
    const fn exact(i: usize) -> Self {
        Self { lo: i, hi: i, t: 0.0 }
    }
}

/// `(min, max)` of a monotonic axis regardless of its direction.
#[inline]
fn span(bins: &[f64]) -> (f64, f64) {
    let (a, b) = (bins[0], bins[bins.len() - 1]);
    (a.min(b), a.max(b))
}

/// Locate `q` on a monotonic axis. A single-bin axis always resolves to bin 0.
pub(crate) fn locate(axis: Axis, bins: &[f64], q: f64) -> Result<Bracket> {
    if bins.is_empty() {
        return Err(ValidationError::EmptyAxis { axis }.into());
    }
    if bins.len() == 1 {
        return Ok(Bracket::exact(0));
    }
    let (min, max) = span(bins);
    if !(q >= min && q <= max) {
        return Err(TuneError::OutOfRange {
            axis,
            value: q,
            min,
            max,
        });
    }

    let ascending = bins[bins.len() - 1] > bins[0];
    let i = if ascending {
        bins.partition_point(|b| *b < q)
    } else {
        bins.partition_point(|b| *b > q)
    };
    let i = i.min(bins.len() - 1);
    if bins[i] == q {
        return Ok(Bracket::exact(i));
    }
    // q is strictly inside the axis and not a bin, so i >= 1.
    let lo = i.saturating_sub(1);
    let (b0, b1) = (bins[lo], bins[i]);
    let width = b1 - b0;
    if width == 0.0 {
        return Err(NumericalError::ZeroWidthBracket { axis, at: q }.into());
    }
    Ok(Bracket {
        lo,
        hi: i,
        t: (q - b0) / width,
    })
}

/// Linear interpolation of `values` over `bins` at `q`.
///
/// `bins` must be monotonic; duplicate neighbours surface as a zero-width
/// bracket rather than a division by zero.
pub fn interpolate_1d(bins: &[f64], values: &[f64], q: f64) -> Result<f64> {
    if bins.len() != values.len() {
        return Err(ValidationError::DimensionMismatch(format!(
            "{} bins for {} values",
            bins.len(),
            values.len()
        ))
        .into());
    }
    let b = locate(Axis::X, bins, q)?;
    Ok(lerp(values[b.lo], values[b.hi], b.t))
}

/// `interpolate_1d` with `q` clamped into the axis range first.
pub fn interpolate_1d_clamped(bins: &[f64], values: &[f64], q: f64) -> Result<f64> {
    if bins.is_empty() {
        return Err(ValidationError::EmptyAxis { axis: Axis::X }.into());
    }
    let (min, max) = span(bins);
    interpolate_1d(bins, values, clamp_query(q, min, max))
}

#[inline]
fn clamp_query(q: f64, min: f64, max: f64) -> f64 {
    if q.is_nan() { min } else { q.clamp(min, max) }
}

impl TableGrid {
    /// Bilinear interpolation at `(x, y)`. Blends along x first, then y.
    pub fn interpolate(&self, x: f64, y: f64) -> Result<f64> {
        let bx = locate(Axis::X, self.x_bins(), x)?;
        let by = locate(Axis::Y, self.y_bins(), y)?;
        let v11 = self.at(by.lo, bx.lo);
        let v12 = self.at(by.lo, bx.hi);
        let v21 = self.at(by.hi, bx.lo);
        let v22 = self.at(by.hi, bx.hi);
        Ok(lerp(lerp(v11, v12, bx.t), lerp(v21, v22, bx.t), by.t))
    }

    /// Interpolate after clamping the query to the table's axis ranges.
    pub fn interpolate_clamped(&self, x: f64, y: f64) -> Result<f64> {
        let (x0, x1) = span(self.x_bins());
        let (y0, y1) = span(self.y_bins());
        self.interpolate(clamp_query(x, x0, x1), clamp_query(y, y0, y1))
    }

    /// Overwrite every selected cell with the bilinear blend of the four
    /// corners of the selection's bounding box.
    pub fn interpolate_cells(&mut self, selection: &Selection) -> Result<()> {
        selection.validate(self.rows(), self.cols())?;
        let Some((lo, hi)) = selection.bounding_box() else {
            return Err(ValidationError::EmptySelection.into());
        };
        let v11 = self.at(lo.row, lo.col);
        let v12 = self.at(lo.row, hi.col);
        let v21 = self.at(hi.row, lo.col);
        let v22 = self.at(hi.row, hi.col);

        let frac = |i: usize, a: usize, b: usize| {
            if b == a {
                0.0
            } else {
                (i - a) as f64 / (b - a) as f64
            }
        };
        let updates: Vec<(usize, usize, f64)> = selection
            .iter()
            .map(|c| {
                let tx = frac(c.col, lo.col, hi.col);
                let ty = frac(c.row, lo.row, hi.row);
                (c.row, c.col, lerp(lerp(v11, v12, tx), lerp(v21, v22, tx), ty))
            })
            .collect();
        for (r, c, v) in updates {
            *self.at_mut(r, c) = v;
        }
        Ok(())
    }

    /// Resample onto new axes. Points outside the old axis range take the
    /// edge-clamped value, so the result is always fully populated.
    pub fn rebin(&self, new_x: Vec<f64>, new_y: Vec<f64>) -> Result<TableGrid> {
        validate_axis(Axis::X, &new_x)?;
        validate_axis(Axis::Y, &new_y)?;
        let mut rows = Vec::with_capacity(new_y.len());
        for &y in &new_y {
            let mut row = Vec::with_capacity(new_x.len());
            for &x in &new_x {
                let v = match self.interpolate(x, y) {
                    Ok(v) => v,
                    Err(TuneError::OutOfRange { .. } | TuneError::Numerical(_)) => {
                        self.interpolate_clamped(x, y)?
                    }
                    Err(e) => return Err(e),
                };
                row.push(v);
            }
            rows.push(row);
        }
        Ok(TableGrid::new(new_x, new_y, rows)?)
    }
}
