//! `TableWriter` that stands in for a controller: cells land in an in-memory
//! copy of the table and `burn` writes it out as CSV.

use std::path::PathBuf;

use vetune_core::{CellIndex, TableGrid};
use vetune_traits::TableWriter;

type BoxErr = Box<dyn std::error::Error + Send + Sync>;

pub struct CsvTableWriter {
    path: PathBuf,
    grid: TableGrid,
    written: usize,
}

impl CsvTableWriter {
    /// `grid` is the working table the written cells are applied to.
    pub fn new(path: PathBuf, grid: TableGrid) -> Self {
        Self {
            path,
            grid,
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl TableWriter for CsvTableWriter {
    fn write_cells(&mut self, cells: &[(usize, usize, f64)]) -> Result<(), BoxErr> {
        for &(row, col, value) in cells {
            self.grid.set(CellIndex::new(row, col), value)?;
        }
        self.written += cells.len();
        Ok(())
    }

    fn burn(&mut self) -> Result<(), BoxErr> {
        let csv = vetune_config::TableCsv::from(&self.grid);
        vetune_config::write_table_csv(&self.path, &csv)?;
        tracing::info!(path = %self.path.display(), cells = self.written, "table written");
        Ok(())
    }
}
