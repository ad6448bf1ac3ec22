//! `table` sub-commands: one library operation per invocation.

use std::path::Path;

use vetune_core::{TableGrid, ValidationError};

use crate::analyze::load_grid;
use crate::cli::{TableIo, TableOp};

fn emit(grid: &TableGrid, output: Option<&Path>) -> eyre::Result<()> {
    let csv = vetune_config::TableCsv::from(grid);
    match output {
        Some(path) => vetune_config::write_table_csv(path, &csv),
        None => vetune_config::write_table_csv_to(std::io::stdout().lock(), &csv),
    }
}

fn edit(
    io: &TableIo,
    op: impl FnOnce(&mut TableGrid) -> eyre::Result<()>,
) -> eyre::Result<()> {
    let mut grid = load_grid(&io.input)?;
    op(&mut grid)?;
    emit(&grid, io.output.as_deref())
}

pub fn run_table(cfg: &vetune_config::Config, op: &TableOp, json: bool) -> eyre::Result<()> {
    match op {
        TableOp::Smooth {
            io,
            cells,
            kernel,
            sigma,
        } => edit(io, |g| {
            let sel = cells.resolve(g.rows(), g.cols())?;
            let k = kernel.unwrap_or(cfg.smoothing.kernel_size);
            if k > vetune_config::MAX_KERNEL_SIZE {
                return Err(ValidationError::InvalidKernel(format!(
                    "--kernel {k} exceeds the maximum of {}",
                    vetune_config::MAX_KERNEL_SIZE
                ))
                .into());
            }
            match sigma.or(cfg.smoothing.sigma) {
                Some(s) => g.smooth_with_sigma(&sel, k, s)?,
                None => g.smooth(&sel, k)?,
            }
            tracing::debug!(cells = sel.len(), kernel = k, "smoothed");
            Ok(())
        }),
        TableOp::Scale { io, cells, factor } => edit(io, |g| {
            let sel = cells.resolve(g.rows(), g.cols())?;
            g.scale(&sel, *factor)?;
            Ok(())
        }),
        TableOp::SetEqual { io, cells } => edit(io, |g| {
            let sel = cells.resolve(g.rows(), g.cols())?;
            let mean = g.set_equal(&sel)?;
            tracing::debug!(cells = sel.len(), mean, "set equal");
            Ok(())
        }),
        TableOp::Interpolate { io, cells } => edit(io, |g| {
            let sel = cells.resolve(g.rows(), g.cols())?;
            g.interpolate_cells(&sel)?;
            Ok(())
        }),
        TableOp::Rebin { io, x_bins, y_bins } => {
            let grid = load_grid(&io.input)?;
            let rebinned = grid.rebin(x_bins.clone(), y_bins.clone())?;
            emit(&rebinned, io.output.as_deref())
        }
        TableOp::Lookup { input, x, y, clamp } => {
            let grid = load_grid(input)?;
            let v = if *clamp {
                grid.interpolate_clamped(*x, *y)?
            } else {
                grid.interpolate(*x, *y)?
            };
            if json {
                println!("{}", serde_json::json!({ "x": x, "y": y, "value": v }));
            } else {
                println!("{v}");
            }
            Ok(())
        }
    }
}
