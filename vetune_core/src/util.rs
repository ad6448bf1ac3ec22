//! Small numeric and diagnostics helpers shared across the engine.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: f64 = 1_000.0;

/// Linear blend `a + (b - a) * t`. `t == 0` returns `a` exactly.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Index of the bin closest to `v`. Ties resolve to the lower index.
/// `bins` must be non-empty.
#[inline]
pub fn nearest_index(bins: &[f64], v: f64) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, b) in bins.iter().enumerate() {
        let d = (b - v).abs();
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

/// Gate for diagnostics emitted from hot paths.
///
/// `hit(now_ms)` returns `Some(suppressed)` when a message may be emitted,
/// carrying the number of events swallowed since the previous emission, and
/// `None` while inside the quiet interval.
#[derive(Debug, Clone)]
pub struct RateLimitedLog {
    interval_ms: u64,
    last_emit_ms: Option<u64>,
    suppressed: u64,
}

impl RateLimitedLog {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_emit_ms: None,
            suppressed: 0,
        }
    }

    pub fn hit(&mut self, now_ms: u64) -> Option<u64> {
        let due = match self.last_emit_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms || now_ms < last,
        };
        if due {
            self.last_emit_ms = Some(now_ms);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed = self.suppressed.saturating_add(1);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_endpoints_are_exact() {
        assert_eq!(lerp(3.25, 9.0, 0.0), 3.25);
        assert_eq!(lerp(3.0, 9.0, 0.5), 6.0);
        assert_eq!(lerp(3.0, 9.0, 1.0), 9.0);
    }

    #[test]
    fn nearest_index_handles_descending_bins() {
        let bins = [100.0, 80.0, 60.0, 40.0];
        assert_eq!(nearest_index(&bins, 79.0), 1);
        assert_eq!(nearest_index(&bins, 10.0), 3);
        assert_eq!(nearest_index(&bins, 500.0), 0);
        // tie between 80 and 60 resolves to the first seen
        assert_eq!(nearest_index(&bins, 70.0), 1);
    }

    #[test]
    fn rate_limited_log_counts_suppressed_events() {
        let mut log = RateLimitedLog::new(1000);
        assert_eq!(log.hit(0), Some(0));
        assert_eq!(log.hit(10), None);
        assert_eq!(log.hit(500), None);
        assert_eq!(log.hit(1000), Some(2));
        assert_eq!(log.hit(1001), None);
    }
}
