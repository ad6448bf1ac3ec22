//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

use vetune_core::{CellIndex, Selection};

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "vetune", version, about = "Calibration table autotune")]
pub struct Cli {
    /// Path to config TOML; built-in defaults apply when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Emit results and errors as JSON on stdout/stderr
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a telemetry log through a tuning session and report corrections
    Analyze {
        /// Table to tune (CSV, `y\x` header)
        #[arg(long, value_name = "FILE")]
        table: PathBuf,
        /// Recorded telemetry (CSV)
        #[arg(long, value_name = "FILE")]
        log: PathBuf,
        /// Write the corrected table here
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Target AFR table; overrides `[target]` in the config
        #[arg(long, value_name = "FILE")]
        target_table: Option<PathBuf>,
        /// Keep a cell at its starting value (repeatable)
        #[arg(long = "lock", value_name = "ROW,COL", value_parser = parse_cell)]
        locks: Vec<CellIndex>,
        /// Replay speed relative to the log timestamps; 0 replays unpaced
        #[arg(long, value_name = "FACTOR", default_value_t = 0.0)]
        speed: f64,
        /// Print every cell, not just those with a recommendation
        #[arg(long, action = ArgAction::SetTrue)]
        all_cells: bool,
    },
    /// Edit a table file with the math library
    Table {
        #[command(subcommand)]
        op: TableOp,
    },
    /// Run a synthetic session end to end and verify the result
    SelfCheck,
}

#[derive(Subcommand, Debug)]
pub enum TableOp {
    /// Gaussian-smooth the selected cells
    Smooth {
        #[command(flatten)]
        io: TableIo,
        #[command(flatten)]
        cells: CellsArg,
        /// Neighbourhood radius in cells; defaults to `[smoothing]` in the config
        #[arg(long, value_name = "N")]
        kernel: Option<usize>,
        /// Gaussian sigma; defaults to kernel / 2
        #[arg(long, value_name = "SIGMA")]
        sigma: Option<f64>,
    },
    /// Multiply the selected cells by a factor
    Scale {
        #[command(flatten)]
        io: TableIo,
        #[command(flatten)]
        cells: CellsArg,
        #[arg(long, value_name = "FACTOR", allow_hyphen_values = true)]
        factor: f64,
    },
    /// Set the selected cells to their mean
    SetEqual {
        #[command(flatten)]
        io: TableIo,
        #[command(flatten)]
        cells: CellsArg,
    },
    /// Fill the selection from the corners of its bounding box
    Interpolate {
        #[command(flatten)]
        io: TableIo,
        #[command(flatten)]
        cells: CellsArg,
    },
    /// Resample the table onto new axes
    Rebin {
        #[command(flatten)]
        io: TableIo,
        /// New x bins, comma separated
        #[arg(long, value_name = "BINS", value_delimiter = ',', num_args = 1.., allow_hyphen_values = true)]
        x_bins: Vec<f64>,
        /// New y bins, comma separated
        #[arg(long, value_name = "BINS", value_delimiter = ',', num_args = 1.., allow_hyphen_values = true)]
        y_bins: Vec<f64>,
    },
    /// Bilinear lookup at an operating point
    Lookup {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        x: f64,
        #[arg(long, allow_hyphen_values = true)]
        y: f64,
        /// Clamp queries outside the axes to the edge instead of failing
        #[arg(long, action = ArgAction::SetTrue)]
        clamp: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct TableIo {
    /// Table to read (CSV)
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,
    /// Where to write the result; stdout when omitted
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct CellsArg {
    /// `all`, a rectangle `R0,C0:R1,C1`, or a list `R,C;R,C;...`
    #[arg(long, value_name = "CELLS", default_value = "all")]
    pub cells: String,
}

impl CellsArg {
    /// Resolve against the table's shape; `all` needs it.
    pub fn resolve(&self, rows: usize, cols: usize) -> eyre::Result<Selection> {
        parse_selection(&self.cells, rows, cols)
    }
}

/// `"3,4"` -> `CellIndex { row: 3, col: 4 }`.
pub fn parse_cell(s: &str) -> Result<CellIndex, String> {
    let (r, c) = s
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got {s:?}"))?;
    let row = r
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid row {r:?}: {e}"))?;
    let col = c
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid col {c:?}: {e}"))?;
    Ok(CellIndex::new(row, col))
}

pub fn parse_selection(s: &str, rows: usize, cols: usize) -> eyre::Result<Selection> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("all") {
        return Ok(Selection::all(rows, cols));
    }
    if let Some((a, b)) = s.split_once(':') {
        let a = parse_cell(a).map_err(|e| eyre::eyre!(e))?;
        let b = parse_cell(b).map_err(|e| eyre::eyre!(e))?;
        return Ok(Selection::rect(a, b));
    }
    s.split(';')
        .filter(|p| !p.trim().is_empty())
        .map(|p| parse_cell(p).map_err(|e| eyre::eyre!(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_forms() {
        assert_eq!(parse_selection("all", 2, 3).unwrap().len(), 6);
        assert_eq!(parse_selection("0,0:1,1", 4, 4).unwrap().len(), 4);
        let list = parse_selection("0,1; 2,2;0,1", 4, 4).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.contains(CellIndex::new(2, 2)));
        assert!(parse_selection("1;2", 4, 4).is_err());
    }

    #[test]
    fn cell_parser_rejects_garbage() {
        assert_eq!(parse_cell(" 3 , 4").unwrap(), CellIndex::new(3, 4));
        assert!(parse_cell("3").is_err());
        assert!(parse_cell("a,1").is_err());
    }
}
