//! Ingest thread lifecycle: end of stream, shutdown on drop, error accounting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vetune_core::{IngestExit, Ingestor, ReplaySource, TableGrid, Tuner};
use vetune_traits::clock::MonotonicClock;
use vetune_traits::{TelemetrySample, TelemetrySource};

type BoxErr = Box<dyn std::error::Error + Send + Sync>;

fn tuner() -> Arc<Tuner> {
    let grid = TableGrid::uniform(vec![1000.0, 3000.0, 5000.0], vec![30.0, 90.0], 80.0).unwrap();
    Arc::new(Tuner::builder().table(grid).build().unwrap())
}

fn samples(n: u64) -> Vec<TelemetrySample> {
    (0..n)
        .map(|i| TelemetrySample {
            timestamp_ms: i * 20,
            rpm: 3000.0,
            load: 60.0,
            afr: 14.1,
            clt: 90.0,
            tps: 30.0,
            ..TelemetrySample::default()
        })
        .collect()
}

/// Never yields a frame; every read times out after the requested wait.
struct SilentLink;

impl TelemetrySource for SilentLink {
    fn next_sample(&mut self, timeout: Duration) -> Result<Option<TelemetrySample>, BoxErr> {
        std::thread::sleep(timeout);
        Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "no frame",
        )))
    }
}

/// Fails `n` times with a transport error, then ends the stream.
struct FlakyLink {
    failures: u32,
}

impl TelemetrySource for FlakyLink {
    fn next_sample(&mut self, _timeout: Duration) -> Result<Option<TelemetrySample>, BoxErr> {
        if self.failures == 0 {
            return Ok(None);
        }
        self.failures -= 1;
        Err("checksum mismatch".into())
    }
}

#[test]
fn replay_runs_to_end_of_stream() {
    let t = tuner();
    t.start().unwrap();
    let mut ing = Ingestor::spawn(
        t.clone(),
        ReplaySource::new(samples(40)),
        Duration::from_millis(20),
        MonotonicClock::new(),
    );
    assert_eq!(ing.wait(Duration::from_secs(5)), Some(IngestExit::EndOfStream));
    assert_eq!(ing.frames(), 40);
    assert_eq!(ing.source_errors(), 0);
    assert_eq!(t.counters().seen, 40);
    let summary = t.stop().unwrap();
    assert_eq!(summary.counters.seen, 40);
    assert!(summary.cells_hit >= 1);
}

#[test]
fn drop_joins_thread_blocked_on_timeouts() {
    let t = tuner();
    let ing = Ingestor::spawn(t, SilentLink, Duration::from_millis(20), MonotonicClock::new());
    std::thread::sleep(Duration::from_millis(60));
    let started = Instant::now();
    drop(ing);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn explicit_shutdown_reports_reason() {
    let t = tuner();
    let mut ing = Ingestor::spawn(t, SilentLink, Duration::from_millis(10), MonotonicClock::new());
    assert_eq!(ing.try_exit(), None);
    ing.request_shutdown();
    assert_eq!(ing.wait(Duration::from_secs(2)), Some(IngestExit::Shutdown));
    assert_eq!(ing.source_errors(), 0, "timeouts are not transport errors");
}

#[test]
fn transport_errors_are_counted_and_retried() {
    let t = tuner();
    let mut ing = Ingestor::spawn(
        t,
        FlakyLink { failures: 3 },
        Duration::from_millis(5),
        MonotonicClock::new(),
    );
    assert_eq!(ing.wait(Duration::from_secs(2)), Some(IngestExit::EndOfStream));
    assert_eq!(ing.source_errors(), 3);
    assert_eq!(ing.frames(), 0);
}

#[test]
fn frames_while_idle_are_seen_by_nobody() {
    let t = tuner();
    let mut ing = Ingestor::spawn(
        t.clone(),
        ReplaySource::new(samples(5)),
        Duration::from_millis(20),
        MonotonicClock::new(),
    );
    assert_eq!(ing.wait(Duration::from_secs(5)), Some(IngestExit::EndOfStream));
    assert_eq!(ing.frames(), 5);
    assert_eq!(t.counters().seen, 0);
}

#[test]
fn repeated_spawn_and_drop_does_not_hang() {
    let t = tuner();
    for _ in 0..10 {
        let ing = Ingestor::spawn(
            t.clone(),
            SilentLink,
            Duration::from_millis(5),
            MonotonicClock::new(),
        );
        std::thread::sleep(Duration::from_millis(5));
        drop(ing);
    }
}
