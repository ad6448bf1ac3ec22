//! Live tuning session: `Idle -> start() -> Running -> stop() -> Idle`.
//!
//! ## Locking
//!
//! - `slot: RwLock<SessionSlot>`: `ingest` holds the read side for the whole
//!   filter -> delay -> accumulate path; `start()`, `stop()` and `rebin()` take
//!   the write side. A sample racing a restart is therefore applied entirely
//!   to one session.
//! - `table: RwLock<LiveTable>`: the grid and its lock flags. Table mutations
//!   take the write side; renderers and recommendation pulls the read side.
//! - `pipeline: Mutex<Pipeline>`: stateful filter and delay history. Released
//!   before the accumulator record so cell updates do not serialise on it.
//!
//! Order: `slot` before `table` before `pipeline`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use vetune_traits::{TableWriter, TelemetrySample};

use crate::accumulator::{CellAccumulator, CellStats, SampleWeighting};
use crate::axes::LoadAxis;
use crate::delay::{DelayCompensator, OperatingPoint};
use crate::error::{Result, TuneError, ValidationError};
use crate::filter::{Admission, RejectReason, SampleFilter};
use crate::locks::LockMask;
use crate::recommend::{AuthorityLimits, RecommendationEngine, RecommendationSet, TargetSource};
use crate::smoothing::GaussianKernel;
use crate::table::{CellIndex, Selection, TableGrid};
use crate::util::RateLimitedLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// Why a sample was dropped before reaching the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    NonFinite,
    TimestampRegression,
    MissingLoadChannel,
}

impl MalformedReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonFinite => "non_finite",
            Self::TimestampRegression => "timestamp_regression",
            Self::MissingLoadChannel => "missing_load_channel",
        }
    }
}

/// What `Tuner::ingest` did with a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    Accumulated { cell: CellIndex, weight: f64 },
    Rejected(RejectReason),
    Malformed(MalformedReason),
    /// No session running; the sample was ignored.
    Idle,
}

/// Counters since the last `start()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounters {
    pub seen: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct AtomicCounters {
    seen: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
}

impl AtomicCounters {
    fn snapshot(&self) -> IngestCounters {
        IngestCounters {
            seen: self.seen.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for c in [&self.seen, &self.admitted, &self.rejected, &self.malformed] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Returned by `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: u64,
    pub cells_hit: usize,
    pub counters: IngestCounters,
}

struct Session {
    id: u64,
    baseline: TableGrid,
    accumulator: CellAccumulator,
}

struct SessionSlot {
    state: SessionState,
    session: Option<Session>,
    next_id: u64,
}

pub(crate) struct LiveTable {
    pub(crate) grid: TableGrid,
    pub(crate) locks: LockMask,
}

pub(crate) struct Pipeline {
    pub(crate) filter: SampleFilter,
    pub(crate) delay: DelayCompensator,
    pub(crate) last_ts: Option<u64>,
    pub(crate) malformed_log: RateLimitedLog,
}

impl Pipeline {
    fn reset(&mut self) {
        self.filter.reset();
        self.delay.reset();
        self.last_ts = None;
    }
}

/// Everything `TunerBuilder` resolves before construction.
pub(crate) struct TunerParts {
    pub grid: TableGrid,
    pub pipeline: Pipeline,
    pub target: TargetSource,
    pub limits: AuthorityLimits,
    pub kernel: GaussianKernel,
    pub load_axis: LoadAxis,
    pub weighting: SampleWeighting,
}

/// Closed-loop table tuner. `Send + Sync`; share it behind an `Arc`.
pub struct Tuner {
    slot: RwLock<SessionSlot>,
    table: RwLock<LiveTable>,
    pipeline: Mutex<Pipeline>,
    target: TargetSource,
    limits: AuthorityLimits,
    kernel: GaussianKernel,
    load_axis: LoadAxis,
    weighting: SampleWeighting,
    counters: AtomicCounters,
}

impl std::fmt::Debug for Tuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuner")
            .field("state", &self.state())
            .field("load_axis", &self.load_axis)
            .field("weighting", &self.weighting)
            .field("counters", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

impl Tuner {
    pub fn builder() -> crate::builder::TunerBuilder<crate::builder::Missing> {
        crate::builder::TunerBuilder::default()
    }

    pub(crate) fn from_parts(p: TunerParts) -> Self {
        let locks = LockMask::new(p.grid.rows(), p.grid.cols());
        Self {
            slot: RwLock::new(SessionSlot {
                state: SessionState::Idle,
                session: None,
                next_id: 1,
            }),
            table: RwLock::new(LiveTable {
                grid: p.grid,
                locks,
            }),
            pipeline: Mutex::new(p.pipeline),
            target: p.target,
            limits: p.limits,
            kernel: p.kernel,
            load_axis: p.load_axis,
            weighting: p.weighting,
            counters: AtomicCounters::default(),
        }
    }

    fn pipeline(&self) -> std::sync::MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── State machine ────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        read(&self.slot).state
    }

    /// Id of the current (or last stopped) session.
    pub fn session_id(&self) -> Option<u64> {
        read(&self.slot).session.as_ref().map(|s| s.id)
    }

    /// Snapshot the live table as the baseline and start from empty
    /// statistics. Any previous session is discarded.
    pub fn start(&self) -> Result<u64> {
        let mut slot = write(&self.slot);
        if slot.state == SessionState::Running {
            return Err(TuneError::State("session already running".into()));
        }
        let baseline = read(&self.table).grid.clone();
        let id = slot.next_id;
        slot.next_id += 1;
        slot.session = Some(Session {
            id,
            accumulator: CellAccumulator::new(baseline.rows(), baseline.cols()),
            baseline,
        });
        self.pipeline().reset();
        self.counters.reset();
        slot.state = SessionState::Running;
        tracing::debug!(session = id, "tuning session started");
        Ok(id)
    }

    /// Stop ingesting. Statistics stay readable until the next `start()`.
    pub fn stop(&self) -> Result<SessionSummary> {
        let mut slot = write(&self.slot);
        if slot.state != SessionState::Running {
            return Err(TuneError::State("no session running".into()));
        }
        slot.state = SessionState::Idle;
        let (id, cells_hit) = slot
            .session
            .as_ref()
            .map(|s| {
                let hit = s.accumulator.snapshot().iter().filter(|c| c.hit_count > 0).count();
                (s.id, hit)
            })
            .unwrap_or_default();
        let summary = SessionSummary {
            id,
            cells_hit,
            counters: self.counters.snapshot(),
        };
        tracing::info!(
            session = id,
            cells_hit,
            seen = summary.counters.seen,
            admitted = summary.counters.admitted,
            rejected = summary.counters.rejected,
            malformed = summary.counters.malformed,
            "tuning session stopped"
        );
        Ok(summary)
    }

    pub fn counters(&self) -> IngestCounters {
        self.counters.snapshot()
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Feed one telemetry sample. Never fails: bad input is counted and
    /// reported through the outcome and rate-limited warnings.
    pub fn ingest(&self, sample: &TelemetrySample) -> IngestOutcome {
        let slot = read(&self.slot);
        let session = match (&slot.state, &slot.session) {
            (SessionState::Running, Some(s)) => s,
            _ => return IngestOutcome::Idle,
        };
        self.counters.seen.fetch_add(1, Ordering::Relaxed);

        let (attribution, gap_ms) = {
            let mut p = self.pipeline();
            let y = match self.check_sample(&p, sample) {
                Ok(y) => y,
                Err(reason) => {
                    self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                    if let Some(suppressed) = p.malformed_log.hit(sample.timestamp_ms) {
                        tracing::warn!(
                            reason = reason.as_str(),
                            ts = sample.timestamp_ms,
                            suppressed,
                            "dropping malformed telemetry sample"
                        );
                    }
                    return IngestOutcome::Malformed(reason);
                }
            };
            let gap_ms = p.last_ts.map(|t| sample.timestamp_ms - t);
            p.last_ts = Some(sample.timestamp_ms);
            p.delay.record(OperatingPoint {
                timestamp_ms: sample.timestamp_ms,
                x: sample.rpm,
                y,
            });
            if let Admission::Rejected(why) = p.filter.check(sample) {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(ts = sample.timestamp_ms, reason = why.as_str(), "sample rejected");
                return IngestOutcome::Rejected(why);
            }
            match p.delay.attribute(sample.timestamp_ms, sample.rpm) {
                Some(a) => (a, gap_ms),
                // just recorded a point above, so the history is non-empty
                None => return IngestOutcome::Idle,
            }
        };

        let cell = session.baseline.nearest_cell(attribution.x, attribution.y);
        let weight = self.weighting.weight(gap_ms);
        if let Err(e) = session.accumulator.record(cell, sample.afr, weight) {
            // afr and weight are validated above; only a shape bug lands here
            tracing::warn!(error = %e, %cell, "accumulator rejected sample");
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            return IngestOutcome::Malformed(MalformedReason::NonFinite);
        }
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            ts = sample.timestamp_ms,
            %cell,
            delay_ms = attribution.delay_ms,
            afr = sample.afr,
            weight,
            "sample accumulated"
        );
        IngestOutcome::Accumulated { cell, weight }
    }

    /// Load-axis value of a well-formed sample.
    fn check_sample(&self, p: &Pipeline, s: &TelemetrySample) -> Result<f64, MalformedReason> {
        if p.last_ts.is_some_and(|t| s.timestamp_ms < t) {
            return Err(MalformedReason::TimestampRegression);
        }
        let y = self
            .load_axis
            .value(s)
            .ok_or(MalformedReason::MissingLoadChannel)?;
        let finite = [s.rpm, s.load, s.afr, s.clt, s.tps, y]
            .iter()
            .chain(s.tps_rate.as_ref())
            .all(|v| v.is_finite());
        if !finite {
            return Err(MalformedReason::NonFinite);
        }
        Ok(y)
    }

    // ── Locks ────────────────────────────────────────────────────────────────

    pub fn lock(&self, cell: CellIndex) -> Result<()> {
        read(&self.table).locks.lock(cell)?;
        tracing::debug!(%cell, "cell locked");
        Ok(())
    }

    pub fn unlock(&self, cell: CellIndex) -> Result<()> {
        read(&self.table).locks.unlock(cell)?;
        tracing::debug!(%cell, "cell unlocked");
        Ok(())
    }

    pub fn is_locked(&self, cell: CellIndex) -> bool {
        read(&self.table).locks.is_locked(cell)
    }

    pub fn locked_cells(&self) -> Vec<CellIndex> {
        read(&self.table).locks.locked_cells()
    }

    // ── Recommendations ─────────────────────────────────────────────────────

    /// Statistics of one cell in the current or last session.
    pub fn cell_stats(&self, cell: CellIndex) -> Option<CellStats> {
        read(&self.slot).session.as_ref()?.accumulator.get(cell)
    }

    /// Session-start snapshot of the table.
    pub fn baseline(&self) -> Option<TableGrid> {
        read(&self.slot).session.as_ref().map(|s| s.baseline.clone())
    }

    /// Compute recommendations from the current or last session.
    pub fn recommendations(&self) -> Result<RecommendationSet> {
        let slot = read(&self.slot);
        let session = slot
            .session
            .as_ref()
            .ok_or_else(|| TuneError::State("no session has been started".into()))?;
        let locks = read(&self.table).locks.snapshot();
        let stats = session.accumulator.snapshot();
        RecommendationEngine::new(&self.target, self.limits).compute(&session.baseline, &stats, &locks)
    }

    /// Final values for an external consumer, locked cells excluded.
    pub fn materialize(&self) -> Result<Vec<(CellIndex, f64)>> {
        Ok(self.recommendations()?.materialize())
    }

    /// Write the recommendations into the live table. Returns the number of
    /// cells written. Cells locked at apply time are skipped.
    pub fn apply_recommendations(&self) -> Result<usize> {
        let slot = read(&self.slot);
        let session = slot
            .session
            .as_ref()
            .ok_or_else(|| TuneError::State("no session has been started".into()))?;
        let mut table = write(&self.table);
        let stats = session.accumulator.snapshot();
        let locks = table.locks.snapshot();
        let set = RecommendationEngine::new(&self.target, self.limits)
            .compute(&session.baseline, &stats, &locks)?;
        let mut written = 0;
        for (cell, v) in set.materialize() {
            if table.locks.is_locked(cell) {
                continue;
            }
            table.grid.set(cell, v)?;
            written += 1;
        }
        tracing::info!(session = session.id, cells = written, "recommendations applied");
        Ok(written)
    }

    /// Hand the materialised values to a controller writer.
    pub fn send_recommendations(&self, writer: &mut dyn TableWriter) -> Result<usize> {
        let cells: Vec<(usize, usize, f64)> = self
            .materialize()?
            .into_iter()
            .map(|(c, v)| (c.row, c.col, v))
            .collect();
        writer
            .write_cells(&cells)
            .map_err(|e| TuneError::Writer(e.to_string()))?;
        tracing::info!(cells = cells.len(), "recommendations sent");
        Ok(cells.len())
    }

    // ── Table access and editing ────────────────────────────────────────────

    pub fn table(&self) -> TableGrid {
        read(&self.table).grid.clone()
    }

    /// Exclusive edit of the live table, refused if any selected cell is locked.
    fn edit<R>(
        &self,
        selection: &Selection,
        op: impl FnOnce(&mut TableGrid) -> Result<R>,
    ) -> Result<R> {
        let mut table = write(&self.table);
        selection.validate(table.grid.rows(), table.grid.cols())?;
        table.locks.ensure_unlocked(selection)?;
        op(&mut table.grid)
    }

    /// Smooth with the configured kernel.
    pub fn smooth(&self, selection: &Selection) -> Result<()> {
        self.edit(selection, |g| g.smooth_with_kernel(selection, &self.kernel))
    }

    pub fn scale(&self, selection: &Selection, factor: f64) -> Result<()> {
        self.edit(selection, |g| g.scale(selection, factor))
    }

    pub fn set_equal(&self, selection: &Selection) -> Result<f64> {
        self.edit(selection, |g| g.set_equal(selection))
    }

    pub fn interpolate_cells(&self, selection: &Selection) -> Result<()> {
        self.edit(selection, |g| g.interpolate_cells(selection))
    }

    /// Replace the live table with a rebinned copy. Refused while a session
    /// runs or while any cell is locked; discards a stopped session, whose
    /// statistics refer to the old cells.
    pub fn rebin(&self, new_x: Vec<f64>, new_y: Vec<f64>) -> Result<()> {
        let mut slot = write(&self.slot);
        if slot.state == SessionState::Running {
            return Err(TuneError::State("cannot rebin while a session is running".into()));
        }
        let mut table = write(&self.table);
        if let Some(c) = table.locks.locked_cells().first() {
            return Err(ValidationError::LockedCell {
                row: c.row,
                col: c.col,
            }
            .into());
        }
        let grid = table.grid.rebin(new_x, new_y)?;
        table.locks = LockMask::new(grid.rows(), grid.cols());
        tracing::debug!(rows = grid.rows(), cols = grid.cols(), "table rebinned");
        table.grid = grid;
        slot.session = None;
        Ok(())
    }
}
