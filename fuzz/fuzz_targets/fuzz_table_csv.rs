#![no_main]
use libfuzzer_sys::fuzz_target;
use vetune_core::{Selection, TableGrid};

fuzz_target!(|data: &[u8]| {
    let Ok(csv) = vetune_config::parse_table_csv(data) else {
        return;
    };
    let Ok(mut grid) = TableGrid::try_from(csv) else {
        return;
    };
    let (x0, y0) = (grid.x_bins()[0], grid.y_bins()[0]);
    let _ = grid.interpolate_clamped(x0 * 1.5 + 1.0, y0 - 1.0);
    let all = Selection::all(grid.rows(), grid.cols());
    let _ = grid.smooth(&all, 1);
    let _ = grid.interpolate_cells(&all);
});
