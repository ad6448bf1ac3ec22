use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use vetune_core::config::{DelayCfg, FilterCfg};
use vetune_core::{
    AuthorityLimits, CellIndex, CellOutcome, IngestOutcome, LoadAxis, MalformedReason,
    RejectReason, SampleWeighting, Selection, SessionState, TableGrid, TargetSource, TuneError,
    Tuner, ValidationError,
};
use vetune_traits::{TableWriter, TelemetrySample};

fn ve_table(value: f64) -> TableGrid {
    TableGrid::uniform(
        vec![1000.0, 2000.0, 3000.0, 4000.0],
        vec![20.0, 60.0, 100.0],
        value,
    )
    .unwrap()
}

fn sample(ts: u64, rpm: f64, load: f64, afr: f64) -> TelemetrySample {
    TelemetrySample {
        timestamp_ms: ts,
        rpm,
        load,
        afr,
        clt: 88.0,
        tps: 25.0,
        tps_rate: None,
        channels: Default::default(),
    }
}

fn tuner(value: f64) -> Tuner {
    Tuner::builder()
        .table(ve_table(value))
        .authority(AuthorityLimits::unlimited())
        .target(TargetSource::Fixed(14.7))
        .build()
        .unwrap()
}

fn tuner_without_delay(value: f64) -> Tuner {
    Tuner::builder()
        .table(ve_table(value))
        .authority(AuthorityLimits::unlimited())
        .delay(DelayCfg {
            enabled: false,
            ..DelayCfg::default()
        })
        .build()
        .unwrap()
}

#[test]
fn end_to_end_lean_cell_is_raised() {
    let t = tuner(75.0);
    t.start().unwrap();
    for i in 0..10 {
        let out = t.ingest(&sample(i * 100, 2000.0, 60.0, 15.5));
        assert!(matches!(out, IngestOutcome::Accumulated { .. }), "{out:?}");
    }
    let set = t.recommendations().unwrap();
    let r = set.get(CellIndex::new(1, 1)).unwrap();
    assert_eq!(r.outcome, CellOutcome::Recommended);
    assert_eq!(r.hit_count, 10);
    // 15.5 is ~5.4 % lean of 14.7
    assert!((r.recommended_value - 75.0 * 1.054).abs() < 0.05);
    assert!((r.recommended_value - 75.0 * 15.5 / 14.7).abs() < 1e-9);
    assert_eq!(set.count(CellOutcome::NoData), 11);
}

#[test]
fn transient_sample_never_counts() {
    let t = tuner(75.0);
    t.start().unwrap();
    let mut s = sample(0, 2000.0, 60.0, 15.5);
    s.tps_rate = Some(40.0);
    assert_eq!(
        t.ingest(&s),
        IngestOutcome::Rejected(RejectReason::ThrottleTransient)
    );
    for row in 0..3 {
        for col in 0..4 {
            assert_eq!(t.cell_stats(CellIndex::new(row, col)).unwrap().hit_count, 0);
        }
    }
    assert_eq!(t.counters().rejected, 1);
}

#[test]
fn locked_cell_reports_beginning_value() {
    let t = tuner(75.0);
    t.lock(CellIndex::new(1, 1)).unwrap();
    t.start().unwrap();
    for i in 0..10 {
        t.ingest(&sample(i * 100, 2000.0, 60.0, 16.5));
    }
    let r = t.recommendations().unwrap();
    let r = r.get(CellIndex::new(1, 1)).unwrap();
    assert_eq!(r.outcome, CellOutcome::Locked);
    assert_eq!(r.recommended_value, 75.0);
    // statistics still accumulate for diagnostics
    assert_eq!(r.hit_count, 10);
    assert!(t.materialize().unwrap().is_empty());

    // unlocking takes effect on the very next pull
    t.unlock(CellIndex::new(1, 1)).unwrap();
    assert_eq!(t.materialize().unwrap().len(), 1);
}

#[test]
fn state_machine_transitions() {
    let t = tuner(50.0);
    assert_eq!(t.state(), SessionState::Idle);
    assert!(matches!(t.recommendations(), Err(TuneError::State(_))));
    assert!(matches!(t.stop(), Err(TuneError::State(_))));
    assert_eq!(t.ingest(&sample(0, 2000.0, 60.0, 14.7)), IngestOutcome::Idle);
    assert_eq!(t.session_id(), None);

    let first = t.start().unwrap();
    assert_eq!(t.session_id(), Some(first));
    assert!(matches!(t.start(), Err(TuneError::State(_))));
    t.ingest(&sample(0, 2000.0, 60.0, 14.0));
    let summary = t.stop().unwrap();
    assert_eq!(summary.id, first);
    assert_eq!(t.session_id(), Some(first));
    assert_eq!(summary.cells_hit, 1);
    assert_eq!(summary.counters.admitted, 1);

    // stopped sessions stay inspectable and ignore new samples
    assert_eq!(t.ingest(&sample(100, 2000.0, 60.0, 14.0)), IngestOutcome::Idle);
    assert_eq!(t.cell_stats(CellIndex::new(1, 1)).unwrap().hit_count, 1);

    let second = t.start().unwrap();
    assert!(second > first);
    assert_eq!(t.cell_stats(CellIndex::new(1, 1)).unwrap().hit_count, 0);
}

#[test]
fn baseline_is_captured_at_start() {
    let t = tuner(80.0);
    t.start().unwrap();
    t.scale(&Selection::new([(1, 1)]), 2.0).unwrap();
    for i in 0..3 {
        t.ingest(&sample(i * 100, 2000.0, 60.0, 14.7));
    }
    let set = t.recommendations().unwrap();
    let r = set.get(CellIndex::new(1, 1)).unwrap();
    assert_eq!(r.beginning_value, 80.0);
    assert_eq!(t.table().value(CellIndex::new(1, 1)), Some(160.0));
}

#[test]
fn authority_limits_bound_recommendation() {
    let t = Tuner::builder()
        .table(ve_table(100.0))
        .authority(AuthorityLimits::new(Some(30.0), Some(0.20)).unwrap())
        .build()
        .unwrap();
    t.start().unwrap();
    for i in 0..5 {
        t.ingest(&sample(i * 100, 2000.0, 60.0, 14.7 * 1.6));
    }
    let set = t.recommendations().unwrap();
    let r = set.get(CellIndex::new(1, 1)).unwrap();
    assert!((r.recommended_value - 120.0).abs() < 1e-9);
}

#[test]
fn apply_writes_live_table_and_skips_locks() {
    let t = tuner_without_delay(75.0);
    t.start().unwrap();
    for i in 0..5 {
        t.ingest(&sample(i * 100, 2000.0, 60.0, 15.5));
        t.ingest(&sample(i * 100 + 50, 1000.0, 20.0, 13.0));
    }
    t.lock(CellIndex::new(0, 0)).unwrap();
    t.stop().unwrap();
    assert_eq!(t.apply_recommendations().unwrap(), 1);
    let live = t.table();
    assert!(live.value(CellIndex::new(1, 1)).unwrap() > 75.0);
    assert_eq!(live.value(CellIndex::new(0, 0)), Some(75.0));
    // re-applying from the same baseline is idempotent
    t.apply_recommendations().unwrap();
    assert_eq!(t.table(), live);
}

#[derive(Default)]
struct RecordingWriter {
    cells: Vec<(usize, usize, f64)>,
    fail: bool,
}

impl TableWriter for RecordingWriter {
    fn write_cells(
        &mut self,
        cells: &[(usize, usize, f64)],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err(Box::new(std::io::Error::other("link down")));
        }
        self.cells.extend_from_slice(cells);
        Ok(())
    }
}

#[test]
fn send_recommendations_reaches_writer() {
    let t = tuner(75.0);
    t.start().unwrap();
    t.ingest(&sample(0, 3000.0, 100.0, 14.0));
    let mut w = RecordingWriter::default();
    assert_eq!(t.send_recommendations(&mut w).unwrap(), 1);
    assert_eq!(w.cells.len(), 1);
    assert_eq!((w.cells[0].0, w.cells[0].1), (2, 2));
    assert!(w.cells[0].2 < 75.0);

    let mut broken = RecordingWriter {
        fail: true,
        ..Default::default()
    };
    assert!(matches!(
        t.send_recommendations(&mut broken),
        Err(TuneError::Writer(_))
    ));
}

#[test]
fn table_ops_reject_locked_cells() {
    let t = tuner(60.0);
    t.lock(CellIndex::new(0, 1)).unwrap();
    let sel = Selection::rect(CellIndex::new(0, 0), CellIndex::new(1, 1));
    for err in [
        t.scale(&sel, 1.1).unwrap_err(),
        t.set_equal(&sel).unwrap_err(),
        t.smooth(&sel).unwrap_err(),
        t.interpolate_cells(&sel).unwrap_err(),
    ] {
        assert_eq!(
            err,
            TuneError::Validation(ValidationError::LockedCell { row: 0, col: 1 })
        );
    }
    assert_eq!(t.table(), ve_table(60.0));
    t.scale(&Selection::new([(2, 3)]), 1.5).unwrap();
    assert_eq!(t.table().value(CellIndex::new(2, 3)), Some(90.0));
}

#[test]
fn rebin_rules() {
    let t = tuner(60.0);
    t.start().unwrap();
    assert!(matches!(
        t.rebin(vec![1000.0, 4000.0], vec![20.0, 100.0]),
        Err(TuneError::State(_))
    ));
    t.stop().unwrap();

    t.lock(CellIndex::new(0, 0)).unwrap();
    assert!(matches!(
        t.rebin(vec![1000.0, 4000.0], vec![20.0, 100.0]),
        Err(TuneError::Validation(ValidationError::LockedCell { .. }))
    ));
    t.unlock(CellIndex::new(0, 0)).unwrap();

    t.rebin(vec![500.0, 2500.0, 6000.0], vec![10.0, 200.0]).unwrap();
    let g = t.table();
    assert_eq!(g.rows(), 2);
    assert_eq!(g.cols(), 3);
    assert!(g.values().iter().all(|v| *v == 60.0));
    // the old session referred to the old cells
    assert!(t.baseline().is_none());
    assert!(t.lock(CellIndex::new(1, 2)).is_ok());
}

#[test]
fn malformed_samples_are_dropped_and_counted() {
    let t = tuner(75.0);
    t.start().unwrap();
    t.ingest(&sample(1000, 2000.0, 60.0, 14.7));
    assert_eq!(
        t.ingest(&sample(900, 2000.0, 60.0, 14.7)),
        IngestOutcome::Malformed(MalformedReason::TimestampRegression)
    );
    assert_eq!(
        t.ingest(&sample(1100, 2000.0, 60.0, f64::NAN)),
        IngestOutcome::Malformed(MalformedReason::NonFinite)
    );
    let mut s = sample(1200, 2000.0, 60.0, 14.7);
    s.tps_rate = Some(f64::INFINITY);
    assert_eq!(
        t.ingest(&s),
        IngestOutcome::Malformed(MalformedReason::NonFinite)
    );
    let c = t.counters();
    assert_eq!((c.seen, c.admitted, c.malformed), (4, 1, 3));
    // the stream keeps flowing
    assert!(matches!(
        t.ingest(&sample(1300, 2000.0, 60.0, 14.7)),
        IngestOutcome::Accumulated { .. }
    ));
}

#[test]
fn mass_flow_axis_requires_channel() {
    let t = Tuner::builder()
        .table(ve_table(75.0))
        .load_axis(LoadAxis::MassFlow {
            channel: "maf".to_string(),
        })
        .build()
        .unwrap();
    t.start().unwrap();
    assert_eq!(
        t.ingest(&sample(0, 2000.0, 60.0, 14.7)),
        IngestOutcome::Malformed(MalformedReason::MissingLoadChannel)
    );
    let mut s = sample(100, 2000.0, 0.0, 14.7);
    s.channels.insert("maf".to_string(), 95.0);
    assert_eq!(
        t.ingest(&s),
        IngestOutcome::Accumulated {
            cell: CellIndex::new(2, 1),
            weight: 1.0
        }
    );
}

#[test]
fn delay_attributes_to_previous_operating_point() {
    let t = Tuner::builder()
        .table(ve_table(75.0))
        .delay(DelayCfg {
            enabled: true,
            history_ms: 500,
            curve: vec![(1000.0, 200.0)],
        })
        .build()
        .unwrap();
    t.start().unwrap();
    // settle at (2000, 60) for a while, then move to (4000, 100)
    for i in 0..5 {
        t.ingest(&sample(i * 100, 2000.0, 60.0, 14.7));
    }
    let out = t.ingest(&sample(500, 4000.0, 100.0, 13.0));
    // 200 ms back lands on the previous steady cell
    assert_eq!(
        out,
        IngestOutcome::Accumulated {
            cell: CellIndex::new(1, 1),
            weight: 1.0
        }
    );
    assert_eq!(t.cell_stats(CellIndex::new(2, 3)).unwrap().hit_count, 0);
}

#[test]
fn dwell_weighting_uses_sample_gaps() {
    let t = Tuner::builder()
        .table(ve_table(75.0))
        .filter(FilterCfg {
            max_tps_rate: 1000.0,
            ..FilterCfg::default()
        })
        .weighting(SampleWeighting::Dwell { max_ms: 200 })
        .delay(DelayCfg {
            enabled: false,
            ..DelayCfg::default()
        })
        .build()
        .unwrap();
    t.start().unwrap();
    t.ingest(&sample(0, 2000.0, 60.0, 14.0));
    t.ingest(&sample(50, 2000.0, 60.0, 16.0));
    t.ingest(&sample(5000, 2000.0, 60.0, 15.0));
    let s = t.cell_stats(CellIndex::new(1, 1)).unwrap();
    // first sample gets the cap, then 50 ms, then the capped gap
    assert_eq!(s.weight_total, 450.0);
    assert_eq!(s.weighted_sum, 14.0 * 200.0 + 16.0 * 50.0 + 15.0 * 200.0);
}

#[test]
fn restart_is_atomic_with_respect_to_ingest() {
    let t = Arc::new(tuner(75.0));
    t.start().unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let feeder = {
        let t = Arc::clone(&t);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut ts = 0;
            while !stop.load(Ordering::Relaxed) {
                t.ingest(&sample(ts, 2000.0, 60.0, 15.0));
                ts += 10;
            }
        })
    };
    let reader = {
        let t = Arc::clone(&t);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if let Ok(set) = t.recommendations() {
                    for r in set.iter() {
                        // uniform weights: the triple must agree exactly
                        assert_eq!(r.weight_total, f64::from(r.hit_count));
                        if let Some(avg) = r.measured_avg {
                            assert_eq!(avg, 15.0);
                        }
                    }
                }
            }
        })
    };
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(2));
        t.stop().unwrap();
        t.start().unwrap();
    }
    std::thread::sleep(std::time::Duration::from_millis(5));
    let summary = t.stop().unwrap();
    stop.store(true, Ordering::Relaxed);
    feeder.join().unwrap();
    reader.join().unwrap();

    let hits = t.cell_stats(CellIndex::new(1, 1)).unwrap().hit_count;
    assert_eq!(u64::from(hits), summary.counters.admitted);
}
