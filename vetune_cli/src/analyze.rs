//! `analyze`: replay a telemetry log through a tuning session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use vetune_core::{
    CellIndex, CellOutcome, IngestExit, Ingestor, LoadAxis, RecommendationSet, ReplaySource,
    SessionSummary, TableGrid, TargetSource, Tuner, TunerCfg, select_load_axis,
};
use vetune_traits::TableWriter;
use vetune_traits::clock::MonotonicClock;

use crate::writer::CsvTableWriter;

pub struct AnalyzeArgs {
    pub table: PathBuf,
    pub log: PathBuf,
    pub output: Option<PathBuf>,
    pub target_table: Option<PathBuf>,
    pub locks: Vec<CellIndex>,
    pub speed: f64,
}

pub struct AnalyzeReport {
    pub summary: SessionSummary,
    pub recommendations: RecommendationSet,
    pub load_axis: LoadAxis,
    pub interrupted: bool,
    pub source_errors: u64,
    /// Log rows dropped by the CSV loader.
    pub skipped_rows: usize,
    pub written: Option<(PathBuf, usize)>,
}

pub fn load_grid(path: &Path) -> eyre::Result<TableGrid> {
    let csv = vetune_config::load_table_csv(path)?;
    TableGrid::try_from(csv).wrap_err_with(|| format!("table {}", path.display()))
}

fn resolve_target(cfg: &vetune_config::Config, cli: Option<&Path>) -> eyre::Result<TargetSource> {
    match cli.or(cfg.target.table.as_deref()) {
        Some(path) => Ok(TargetSource::Table(
            load_grid(path).wrap_err("loading target table")?,
        )),
        None => Ok(TargetSource::Fixed(cfg.target.afr)),
    }
}

pub fn run_analyze(
    cfg: &vetune_config::Config,
    args: &AnalyzeArgs,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<AnalyzeReport> {
    let grid = load_grid(&args.table)?;
    let log = vetune_config::load_telemetry_csv(&args.log)
        .wrap_err("loading telemetry for replay")?;
    let skipped_rows = log.skipped_rows;
    let source = if args.speed > 0.0 {
        ReplaySource::paced(log.samples, MonotonicClock::new(), args.speed)
            .with_channels(log.channels)
    } else {
        ReplaySource::from_log(log)
    };
    let channels = source.channel_names();
    let load_axis = select_load_axis(
        &cfg.axes.load_channel,
        channels.iter().map(String::as_str),
    );
    let target = resolve_target(cfg, args.target_table.as_deref())?;
    let tuner_cfg = TunerCfg::from_config(cfg, target, load_axis.clone())?;

    let tuner = Arc::new(Tuner::builder().table(grid).config(tuner_cfg).try_build()?);
    for &cell in &args.locks {
        tuner.lock(cell)?;
    }
    let id = tuner.start()?;
    tracing::info!(
        session = id,
        samples = source.remaining(),
        axis = %load_axis.mode(),
        "replay started"
    );

    let mut ingestor = Ingestor::spawn(
        tuner.clone(),
        source,
        Duration::from_millis(cfg.session.sample_timeout_ms),
        MonotonicClock::new(),
    );
    let tick = Duration::from_millis(cfg.session.recommend_interval_ms);
    let mut interrupted = false;
    let exit = loop {
        if let Some(exit) = ingestor.wait(tick) {
            break exit;
        }
        if shutdown.load(Ordering::Relaxed) && !interrupted {
            interrupted = true;
            ingestor.request_shutdown();
            continue;
        }
        // Periodic pull, as a live display would do.
        let snapshot = tuner.recommendations()?;
        let counters = tuner.counters();
        tracing::info!(
            frames = ingestor.frames(),
            admitted = counters.admitted,
            recommended = snapshot.count(CellOutcome::Recommended),
            stalled_ms = ingestor.stalled_for_now(),
            "replay progress"
        );
    };
    interrupted |= exit == IngestExit::Shutdown;
    let source_errors = ingestor.source_errors();
    drop(ingestor);

    let summary = tuner.stop()?;
    let recommendations = tuner.recommendations()?;

    let written = match &args.output {
        Some(path) => {
            let mut writer = CsvTableWriter::new(path.clone(), tuner.table());
            tuner.send_recommendations(&mut writer)?;
            writer
                .burn()
                .map_err(|e| eyre::eyre!("{e}"))
                .wrap_err_with(|| format!("writing {}", path.display()))?;
            Some((path.clone(), writer.written()))
        }
        None => None,
    };

    Ok(AnalyzeReport {
        summary,
        recommendations,
        load_axis,
        interrupted,
        source_errors,
        skipped_rows,
        written,
    })
}

pub fn print_human(report: &AnalyzeReport, all_cells: bool) {
    let s = &report.summary;
    let set = &report.recommendations;
    println!(
        "session {}: {} samples, {} admitted, {} rejected, {} malformed{}",
        s.id,
        s.counters.seen,
        s.counters.admitted,
        s.counters.rejected,
        s.counters.malformed,
        if report.interrupted { " (interrupted)" } else { "" }
    );
    println!(
        "load axis: {}; cells hit: {}/{}; recommended: {}; locked: {}",
        report.load_axis.mode(),
        s.cells_hit,
        set.rows * set.cols,
        set.count(CellOutcome::Recommended),
        set.count(CellOutcome::Locked),
    );
    println!(
        "{:>4} {:>4} {:>9} {:>9} {:>9} {:>9} {:>7} {:>6}  outcome",
        "row", "col", "x", "y", "begin", "recommend", "afr", "hits"
    );
    for r in set.iter() {
        if !all_cells && r.outcome == CellOutcome::NoData {
            continue;
        }
        let afr = r
            .measured_avg
            .map_or_else(|| "-".to_string(), |v| format!("{v:.2}"));
        println!(
            "{:>4} {:>4} {:>9.1} {:>9.1} {:>9.2} {:>9.2} {:>7} {:>6}  {:?}",
            r.row, r.col, r.x, r.y, r.beginning_value, r.recommended_value, afr, r.hit_count, r.outcome
        );
    }
    if report.skipped_rows > 0 {
        println!("skipped {} unparseable log rows", report.skipped_rows);
    }
    if let Some((path, n)) = &report.written {
        println!("wrote {n} cells to {}", path.display());
    }
}

pub fn to_json(report: &AnalyzeReport) -> serde_json::Value {
    serde_json::json!({
        "summary": report.summary,
        "interrupted": report.interrupted,
        "source_errors": report.source_errors,
        "skipped_rows": report.skipped_rows,
        "load_axis": report.load_axis.mode().to_string(),
        "recommended": report.recommendations.count(CellOutcome::Recommended),
        "recommendations": report.recommendations,
        "coverage": report.recommendations.coverage(),
        "change_magnitude": report.recommendations.change_magnitude(),
        "written": report.written.as_ref().map(|(p, n)| serde_json::json!({
            "path": p.display().to_string(),
            "cells": n,
        })),
    })
}
