//! Per-cell weighted statistics.
//!
//! One `Mutex<CellStats>` per cell in a dense row-major arena. A record is
//! a single critical section on one cell, so readers never see a torn
//! `(hit_count, weight_total, weighted_sum)` triple and different cells never
//! contend.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::error::{Result, ValidationError};
use crate::table::CellIndex;

/// Online statistics for one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CellStats {
    pub hit_count: u32,
    pub weight_total: f64,
    pub weighted_sum: f64,
}

impl CellStats {
    /// Weighted mean, `None` when the cell has never been hit.
    pub fn average(&self) -> Option<f64> {
        (self.hit_count > 0 && self.weight_total > 0.0)
            .then(|| self.weighted_sum / self.weight_total)
    }

    fn add(&mut self, value: f64, weight: f64) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.weight_total += weight;
        self.weighted_sum += value * weight;
    }
}

/// How much an admitted sample counts toward its cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SampleWeighting {
    /// Weight 1 per sample.
    #[default]
    Uniform,
    /// Weight = ms since the previous sample, capped at `max_ms`; the first
    /// sample of a stream gets the cap.
    Dwell { max_ms: u64 },
}

impl SampleWeighting {
    pub fn weight(self, gap_ms: Option<u64>) -> f64 {
        match self {
            Self::Uniform => 1.0,
            Self::Dwell { max_ms } => gap_ms.unwrap_or(max_ms).min(max_ms).max(1) as f64,
        }
    }
}

#[derive(Debug)]
pub struct CellAccumulator {
    rows: usize,
    cols: usize,
    cells: Vec<Mutex<CellStats>>,
}

impl CellAccumulator {
    pub fn new(rows: usize, cols: usize) -> Self {
        let cells = (0..rows * cols).map(|_| Mutex::new(CellStats::default())).collect();
        Self { rows, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn slot(&self, cell: CellIndex) -> Result<&Mutex<CellStats>, ValidationError> {
        if cell.row >= self.rows || cell.col >= self.cols {
            return Err(ValidationError::CellOutOfBounds {
                row: cell.row,
                col: cell.col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(&self.cells[cell.row * self.cols + cell.col])
    }

    /// Add one weighted measurement to `cell`.
    pub fn record(&self, cell: CellIndex, value: f64, weight: f64) -> Result<()> {
        if !(value.is_finite() && weight.is_finite() && weight > 0.0) {
            return Err(ValidationError::InvalidParameter(format!(
                "sample value {value} / weight {weight} rejected"
            ))
            .into());
        }
        let slot = self.slot(cell)?;
        slot.lock().unwrap_or_else(PoisonError::into_inner).add(value, weight);
        Ok(())
    }

    pub fn get(&self, cell: CellIndex) -> Option<CellStats> {
        self.slot(cell)
            .ok()
            .map(|m| *m.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Copy of every cell, row-major. Each cell is read consistently; the
    /// grid as a whole is not a single point-in-time view.
    pub fn snapshot(&self) -> Vec<CellStats> {
        self.cells
            .iter()
            .map(|m| *m.lock().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }

    pub fn reset(&self) {
        for m in &self.cells {
            *m.lock().unwrap_or_else(PoisonError::into_inner) = CellStats::default();
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.snapshot().iter().map(|c| u64::from(c.hit_count)).sum()
    }
}
