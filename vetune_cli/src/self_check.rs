//! Synthetic end-to-end run: no files, no hardware.

use vetune_core::config::DelayCfg;
use vetune_core::{
    AuthorityLimits, CellIndex, CellOutcome, Selection, TableGrid, TargetSource, Tuner,
};
use vetune_traits::TelemetrySample;

fn check(cond: bool, what: &str) -> eyre::Result<String> {
    if cond {
        Ok(what.to_string())
    } else {
        eyre::bail!("self-check failed: {what}")
    }
}

pub fn run() -> eyre::Result<Vec<String>> {
    let mut passed = Vec::new();

    let grid = TableGrid::uniform(vec![1000.0, 3000.0, 5000.0], vec![30.0, 60.0, 90.0], 70.0)?;
    let mut flat = grid.clone();
    flat.smooth(&Selection::all(3, 3), 2)?;
    passed.push(check(flat == grid, "smoothing keeps a flat table flat")?);
    passed.push(check(
        (grid.interpolate(2000.0, 45.0)? - 70.0).abs() < 1e-9,
        "bilinear lookup inside the grid",
    )?);

    let tuner = Tuner::builder()
        .table(grid)
        .authority(AuthorityLimits::new(Some(5.0), Some(0.10))?)
        .target(TargetSource::Fixed(14.7))
        .delay(DelayCfg {
            enabled: false,
            ..DelayCfg::default()
        })
        .try_build()?;
    let locked = CellIndex::new(0, 0);
    tuner.lock(locked)?;
    tuner.start()?;
    for i in 0..20u64 {
        for (rpm, load) in [(3000.0, 60.0), (1000.0, 30.0)] {
            tuner.ingest(&TelemetrySample {
                timestamp_ms: i * 50,
                rpm,
                load,
                afr: 16.0,
                clt: 90.0,
                tps: 20.0,
                tps_rate: Some(0.0),
                ..TelemetrySample::default()
            });
        }
    }
    let summary = tuner.stop()?;
    passed.push(check(summary.counters.admitted == 40, "all synthetic samples admitted")?);

    let set = tuner.recommendations()?;
    let lean = set
        .get(CellIndex::new(1, 1))
        .ok_or_else(|| eyre::eyre!("missing centre cell"))?;
    passed.push(check(
        lean.outcome == CellOutcome::Recommended && lean.recommended_value > lean.beginning_value,
        "lean cell is enriched",
    )?);
    passed.push(check(
        (lean.recommended_value - 75.0).abs() < 1e-9,
        "authority limit caps the change",
    )?);
    passed.push(check(
        set.get(locked).is_some_and(|r| r.outcome == CellOutcome::Locked && r.change() == 0.0),
        "locked cell keeps its value",
    )?);
    Ok(passed)
}

#[cfg(test)]
mod tests {
    #[test]
    fn self_check_passes() {
        let lines = super::run().unwrap();
        assert_eq!(lines.len(), 6);
    }
}
