//! Correction recommendations.
//!
//! A pure function of the accumulator snapshot, the session baseline, the
//! target, the authority limits and the lock flags. Nothing here touches
//! the live table.
//!
//! Per cell with data:
//!
//! ```text
//! error = (measured_avg - target) / target
//! raw   = beginning * (1 + error)
//! final = clamp(raw, [b - abs, b + abs] ∩ [b * (1 - pct), b * (1 + pct)])
//! ```
//!
//! Running lean of target (measured above it) raises the cell. Locked cells
//! always report their beginning value.

use serde::Serialize;

use crate::accumulator::CellStats;
use crate::error::{Result, ValidationError};
use crate::table::{CellIndex, TableGrid};

/// Per-pass safety bounds, anchored at the session-start value.
/// `None` leaves that side unconstrained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthorityLimits {
    max_abs_change: Option<f64>,
    max_pct_change: Option<f64>,
}

impl Default for AuthorityLimits {
    fn default() -> Self {
        Self {
            max_abs_change: Some(10.0),
            max_pct_change: Some(0.20),
        }
    }
}

impl AuthorityLimits {
    /// `max_pct_change` is a fraction: `0.2` allows ±20 %.
    pub fn new(
        max_abs_change: Option<f64>,
        max_pct_change: Option<f64>,
    ) -> Result<Self, ValidationError> {
        for (name, v) in [
            ("authority max_abs_change", max_abs_change),
            ("authority max_pct_change", max_pct_change),
        ] {
            if let Some(v) = v {
                if !v.is_finite() {
                    return Err(ValidationError::InvalidParameter(format!(
                        "{name} must be finite"
                    )));
                }
                if v < 0.0 {
                    return Err(ValidationError::NegativeLimit(name));
                }
            }
        }
        Ok(Self {
            max_abs_change,
            max_pct_change,
        })
    }

    pub const fn unlimited() -> Self {
        Self {
            max_abs_change: None,
            max_pct_change: None,
        }
    }

    pub fn max_abs_change(&self) -> Option<f64> {
        self.max_abs_change
    }

    pub fn max_pct_change(&self) -> Option<f64> {
        self.max_pct_change
    }

    /// Allowed `[lo, hi]` around `beginning`. Always contains `beginning`.
    pub fn bounds(&self, beginning: f64) -> (f64, f64) {
        let mut lo = f64::NEG_INFINITY;
        let mut hi = f64::INFINITY;
        if let Some(abs) = self.max_abs_change {
            lo = lo.max(beginning - abs);
            hi = hi.min(beginning + abs);
        }
        if let Some(pct) = self.max_pct_change {
            // Ordered so a negative beginning value still yields lo <= hi.
            let a = beginning * (1.0 - pct);
            let b = beginning * (1.0 + pct);
            lo = lo.max(a.min(b));
            hi = hi.min(a.max(b));
        }
        (lo, hi)
    }

    pub fn clamp(&self, beginning: f64, raw: f64) -> f64 {
        let (lo, hi) = self.bounds(beginning);
        raw.max(lo).min(hi)
    }
}

/// Target value for the measured channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSource {
    Fixed(f64),
    /// Interpolated at each cell's axis coordinates, edge-clamped.
    Table(TableGrid),
}

impl Default for TargetSource {
    fn default() -> Self {
        Self::Fixed(14.7)
    }
}

impl TargetSource {
    /// Target at `(x, y)`; `None` when it is not a usable divisor.
    pub fn lookup(&self, x: f64, y: f64) -> Option<f64> {
        let t = match self {
            Self::Fixed(v) => *v,
            Self::Table(g) => g.interpolate_clamped(x, y).ok()?,
        };
        (t.is_finite() && t > 0.0).then_some(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellOutcome {
    Recommended,
    Locked,
    /// No admitted samples; not an error.
    NoData,
    /// Target not finite or `<= 0` at this cell.
    InvalidTarget,
}

/// Read-only view of one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    pub beginning_value: f64,
    /// Equals `beginning_value` unless `outcome` is `Recommended`.
    pub recommended_value: f64,
    pub measured_avg: Option<f64>,
    pub target_value: Option<f64>,
    pub hit_count: u32,
    pub weight_total: f64,
    /// `weight_total` relative to the best-covered cell, in percent.
    pub hit_percentage: f64,
    pub locked: bool,
    pub outcome: CellOutcome,
}

impl Recommendation {
    pub fn cell(&self) -> CellIndex {
        CellIndex::new(self.row, self.col)
    }

    pub fn change(&self) -> f64 {
        self.recommended_value - self.beginning_value
    }
}

/// Recommendations for a whole table, row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationSet {
    pub rows: usize,
    pub cols: usize,
    pub records: Vec<Recommendation>,
}

impl RecommendationSet {
    pub fn get(&self, cell: CellIndex) -> Option<&Recommendation> {
        if cell.row >= self.rows || cell.col >= self.cols {
            return None;
        }
        self.records.get(cell.row * self.cols + cell.col)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recommendation> {
        self.records.iter()
    }

    pub fn count(&self, outcome: CellOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    /// `weight_total` per cell scaled to `[0, 1]` by the grid maximum.
    pub fn coverage(&self) -> Vec<f64> {
        normalize(self.records.iter().map(|r| r.weight_total))
    }

    /// `|recommended - beginning|` per cell scaled to `[0, 1]` by the grid maximum.
    pub fn change_magnitude(&self) -> Vec<f64> {
        normalize(self.records.iter().map(|r| r.change().abs()))
    }

    /// Final values to write, keyed by cell. Only cells with an actual
    /// recommendation appear; locked cells never do.
    pub fn materialize(&self) -> Vec<(CellIndex, f64)> {
        self.records
            .iter()
            .filter(|r| r.outcome == CellOutcome::Recommended)
            .map(|r| (r.cell(), r.recommended_value))
            .collect()
    }
}

fn normalize(values: impl Iterator<Item = f64> + Clone) -> Vec<f64> {
    let max = values.clone().fold(0.0f64, f64::max);
    if max > 0.0 {
        values.map(|v| v / max).collect()
    } else {
        values.map(|_| 0.0).collect()
    }
}

/// Unclamped correction: `beginning * (1 + (measured - target) / target)`.
#[inline]
pub fn raw_correction(beginning: f64, measured: f64, target: f64) -> f64 {
    beginning * (1.0 + (measured - target) / target)
}

#[derive(Debug, Clone, Copy)]
pub struct RecommendationEngine<'a> {
    target: &'a TargetSource,
    limits: AuthorityLimits,
}

impl<'a> RecommendationEngine<'a> {
    pub fn new(target: &'a TargetSource, limits: AuthorityLimits) -> Self {
        Self { target, limits }
    }

    /// `stats` and `locks` are row-major and must match `baseline`'s shape.
    pub fn compute(
        &self,
        baseline: &TableGrid,
        stats: &[CellStats],
        locks: &[bool],
    ) -> Result<RecommendationSet> {
        if stats.len() != baseline.len() || locks.len() != baseline.len() {
            return Err(ValidationError::DimensionMismatch(format!(
                "{} stats / {} locks for a {}x{} baseline",
                stats.len(),
                locks.len(),
                baseline.rows(),
                baseline.cols()
            ))
            .into());
        }
        let max_weight = stats.iter().map(|s| s.weight_total).fold(0.0f64, f64::max);
        let cols = baseline.cols();
        let mut records = Vec::with_capacity(stats.len());
        let mut invalid_targets = 0usize;

        for (i, (s, &locked)) in stats.iter().zip(locks).enumerate() {
            let (row, col) = (i / cols, i % cols);
            let x = baseline.x_bins()[col];
            let y = baseline.y_bins()[row];
            let beginning = baseline.values()[i];
            let measured_avg = s.average();
            let target_value = self.target.lookup(x, y);

            let (outcome, recommended_value) = match (measured_avg, target_value) {
                (None, _) => (CellOutcome::NoData, beginning),
                (Some(_), None) => {
                    invalid_targets += 1;
                    (CellOutcome::InvalidTarget, beginning)
                }
                (Some(_), Some(_)) if locked => (CellOutcome::Locked, beginning),
                (Some(m), Some(t)) => (
                    CellOutcome::Recommended,
                    self.limits.clamp(beginning, raw_correction(beginning, m, t)),
                ),
            };
            let hit_percentage = if max_weight > 0.0 {
                s.weight_total / max_weight * 100.0
            } else {
                0.0
            };
            records.push(Recommendation {
                row,
                col,
                x,
                y,
                beginning_value: beginning,
                recommended_value,
                measured_avg,
                target_value,
                hit_count: s.hit_count,
                weight_total: s.weight_total,
                hit_percentage,
                locked,
                outcome,
            });
        }

        if invalid_targets > 0 {
            tracing::warn!(
                cells = invalid_targets,
                "target not positive at some cells; no recommendation for them"
            );
        }
        Ok(RecommendationSet {
            rows: baseline.rows(),
            cols,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stats(hits: u32, avg: f64) -> CellStats {
        CellStats {
            hit_count: hits,
            weight_total: f64::from(hits),
            weighted_sum: avg * f64::from(hits),
        }
    }

    fn baseline() -> TableGrid {
        TableGrid::new(
            vec![1000.0, 2000.0],
            vec![30.0, 60.0],
            vec![vec![75.0, 80.0], vec![100.0, 100.0]],
        )
        .unwrap()
    }

    #[rstest]
    #[case::pct_binds(100.0, 160.0, Some(30.0), Some(0.20), 120.0)]
    #[case::abs_binds(100.0, 160.0, Some(5.0), Some(0.20), 105.0)]
    #[case::lower_bound(100.0, 40.0, Some(30.0), Some(0.20), 80.0)]
    #[case::inside(100.0, 104.0, Some(30.0), Some(0.20), 104.0)]
    #[case::unlimited(100.0, 160.0, None, None, 160.0)]
    #[case::zero_authority(100.0, 160.0, Some(0.0), None, 100.0)]
    #[case::negative_beginning(-10.0, 0.0, None, Some(0.5), -5.0)]
    fn authority_clamp(
        #[case] beginning: f64,
        #[case] raw: f64,
        #[case] abs: Option<f64>,
        #[case] pct: Option<f64>,
        #[case] want: f64,
    ) {
        let limits = AuthorityLimits::new(abs, pct).unwrap();
        assert!((limits.clamp(beginning, raw) - want).abs() < 1e-9);
    }

    #[test]
    fn negative_limits_rejected() {
        assert!(matches!(
            AuthorityLimits::new(Some(-1.0), None),
            Err(ValidationError::NegativeLimit(_))
        ));
        assert!(AuthorityLimits::new(None, Some(-0.1)).is_err());
    }

    #[test]
    fn limits_report_their_configuration() {
        let limits = AuthorityLimits::new(Some(8.0), None).unwrap();
        assert_eq!(limits.max_abs_change(), Some(8.0));
        assert_eq!(limits.max_pct_change(), None);
        let open = AuthorityLimits::unlimited();
        assert_eq!((open.max_abs_change(), open.max_pct_change()), (None, None));
        assert_eq!(open.bounds(70.0), (f64::NEG_INFINITY, f64::INFINITY));
    }

    #[test]
    fn lean_raises_rich_lowers() {
        assert!(raw_correction(75.0, 15.5, 14.7) > 75.0);
        assert!(raw_correction(75.0, 13.5, 14.7) < 75.0);
        assert_eq!(raw_correction(75.0, 14.7, 14.7), 75.0);
    }

    #[test]
    fn computes_outcomes_per_cell() {
        let target = TargetSource::Fixed(14.7);
        let engine = RecommendationEngine::new(&target, AuthorityLimits::unlimited());
        let s = [stats(10, 15.5), CellStats::default(), stats(3, 14.0), stats(1, 16.0)];
        let locks = [false, false, true, false];
        let set = engine.compute(&baseline(), &s, &locks).unwrap();

        let r = set.get(CellIndex::new(0, 0)).unwrap();
        assert_eq!(r.outcome, CellOutcome::Recommended);
        assert!((r.recommended_value - 75.0 * 15.5 / 14.7).abs() < 1e-9);
        assert_eq!((r.x, r.y), (1000.0, 30.0));
        assert_eq!(r.hit_percentage, 100.0);

        let r = set.get(CellIndex::new(0, 1)).unwrap();
        assert_eq!(r.outcome, CellOutcome::NoData);
        assert_eq!(r.measured_avg, None);
        assert_eq!(r.recommended_value, 80.0);

        let r = set.get(CellIndex::new(1, 0)).unwrap();
        assert_eq!(r.outcome, CellOutcome::Locked);
        assert_eq!(r.recommended_value, 100.0);
        assert_eq!(r.hit_count, 3);

        let m = set.materialize();
        assert_eq!(m.len(), 2);
        assert!(m.iter().all(|(c, _)| *c != CellIndex::new(1, 0)));
    }

    #[test]
    fn non_positive_target_yields_no_recommendation() {
        let target = TargetSource::Fixed(0.0);
        let engine = RecommendationEngine::new(&target, AuthorityLimits::unlimited());
        let s = [stats(5, 14.0); 4];
        let set = engine.compute(&baseline(), &s, &[false; 4]).unwrap();
        assert_eq!(set.count(CellOutcome::InvalidTarget), 4);
        assert!(set.materialize().is_empty());
    }

    #[test]
    fn target_table_is_interpolated_and_clamped() {
        let t = TableGrid::new(
            vec![500.0, 3000.0],
            vec![0.0, 100.0],
            vec![vec![14.0, 14.0], vec![12.0, 12.0]],
        )
        .unwrap();
        let target = TargetSource::Table(t);
        assert_eq!(target.lookup(1000.0, 50.0), Some(13.0));
        assert_eq!(target.lookup(9000.0, 150.0), Some(12.0));
    }

    #[test]
    fn coverage_and_change_are_normalised() {
        let target = TargetSource::Fixed(14.7);
        let engine = RecommendationEngine::new(&target, AuthorityLimits::unlimited());
        let s = [stats(4, 14.7), stats(2, 14.7), CellStats::default(), stats(1, 14.7)];
        let set = engine.compute(&baseline(), &s, &[false; 4]).unwrap();
        assert_eq!(set.coverage(), vec![1.0, 0.5, 0.0, 0.25]);
        // on-target everywhere: nothing changes
        assert_eq!(set.change_magnitude(), vec![0.0; 4]);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let target = TargetSource::default();
        let engine = RecommendationEngine::new(&target, AuthorityLimits::default());
        assert!(engine.compute(&baseline(), &[CellStats::default()], &[false]).is_err());
    }
}
