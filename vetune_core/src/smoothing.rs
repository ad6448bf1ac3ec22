//! Gaussian-weighted neighbour smoothing.
use crate::error::{Result, ValidationError};
use crate::table::{Selection, TableGrid};

/// Precomputed offsets and weights for a circular Gaussian neighbourhood.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    radius: usize,
    sigma: f64,
    taps: Vec<(isize, isize, f64)>,
}

impl GaussianKernel {
    /// Kernel of Euclidean `radius` cells. `sigma` defaults to `radius / 2`.
    ///
    /// Radius 0 is the identity kernel.
    pub fn new(radius: usize, sigma: Option<f64>) -> Result<Self, ValidationError> {
        Self::within(radius, sigma, radius)
    }

    /// Same neighbourhood as `new`, but only taps up to `reach` cells away on
    /// either axis are built. Offsets past `reach` can never land on a grid
    /// whose larger side is `reach + 1` cells.
    pub fn within(
        radius: usize,
        sigma: Option<f64>,
        reach: usize,
    ) -> Result<Self, ValidationError> {
        let sigma = sigma.unwrap_or(radius as f64 / 2.0);
        if radius == 0 {
            return Ok(Self {
                radius,
                sigma,
                taps: vec![(0, 0, 1.0)],
            });
        }
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(ValidationError::InvalidKernel(format!(
                "sigma must be finite and > 0, got {sigma}"
            )));
        }
        let bound = radius.min(reach);
        let r = isize::try_from(bound)
            .map_err(|_| ValidationError::InvalidKernel(format!("radius {radius} too large")))?;
        let r2 = (radius as f64).powi(2);
        let two_s2 = 2.0 * sigma * sigma;
        let mut taps = Vec::new();
        for dr in -r..=r {
            for dc in -r..=r {
                let d2 = (dr * dr + dc * dc) as f64;
                if d2 <= r2 {
                    taps.push((dr, dc, (-d2 / two_s2).exp()));
                }
            }
        }
        Ok(Self {
            radius,
            sigma,
            taps,
        })
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl TableGrid {
    /// Smooth the selected cells with the default sigma (`kernel_size / 2`).
    pub fn smooth(&mut self, selection: &Selection, kernel_size: usize) -> Result<()> {
        let kernel = GaussianKernel::within(kernel_size, None, self.reach())?;
        self.smooth_with_kernel(selection, &kernel)
    }

    pub fn smooth_with_sigma(
        &mut self,
        selection: &Selection,
        kernel_size: usize,
        sigma: f64,
    ) -> Result<()> {
        let kernel = GaussianKernel::within(kernel_size, Some(sigma), self.reach())?;
        self.smooth_with_kernel(selection, &kernel)
    }

    /// Largest row or column offset between two cells of this grid.
    fn reach(&self) -> usize {
        self.rows().max(self.cols()).saturating_sub(1)
    }

    /// Every neighbour is read from the grid as it was before the pass, so
    /// the order cells are visited in does not matter. Neighbours outside
    /// the grid are skipped.
    pub fn smooth_with_kernel(&mut self, selection: &Selection, kernel: &GaussianKernel) -> Result<()> {
        selection.validate(self.rows(), self.cols())?;
        let snapshot = self.clone();
        let (rows, cols) = (self.rows(), self.cols());
        for cell in selection.iter() {
            let center = snapshot.at(cell.row, cell.col);
            let mut num = 0.0;
            let mut den = 0.0;
            for &(dr, dc, w) in &kernel.taps {
                let (Some(r), Some(c)) = (
                    cell.row.checked_add_signed(dr),
                    cell.col.checked_add_signed(dc),
                ) else {
                    continue;
                };
                if r >= rows || c >= cols {
                    continue;
                }
                // Deviation form: a flat neighbourhood reproduces `center` exactly.
                num += w * (snapshot.at(r, c) - center);
                den += w;
            }
            *self.at_mut(cell.row, cell.col) = center + num / den;
        }
        Ok(())
    }
}
