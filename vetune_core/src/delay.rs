//! Transport-delay compensation.
//!
//! The sensor reports the mixture of a combustion event that happened some
//! time earlier, and the lag shrinks as exhaust flow rises with rpm. Each
//! measurement is attributed to the operating point recorded `delay(rpm)` ms
//! before it arrived, looked up in a short rolling history.

use std::collections::VecDeque;

use crate::config::DelayCfg;
use crate::error::ValidationError;
use crate::interpolate::interpolate_1d_clamped;
use crate::util::lerp;

/// Table coordinates the engine sat at, stamped with the sample time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingPoint {
    pub timestamp_ms: u64,
    pub x: f64,
    pub y: f64,
}

/// Where a measurement should be attributed, and the delay applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attribution {
    pub x: f64,
    pub y: f64,
    pub delay_ms: f64,
}

/// Piecewise-linear `rpm -> delay_ms` reference curve, edge-clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayCurve {
    rpm: Vec<f64>,
    delay_ms: Vec<f64>,
}

impl DelayCurve {
    pub fn new(points: &[(f64, f64)]) -> Result<Self, ValidationError> {
        if points.is_empty() {
            return Err(ValidationError::InvalidParameter(
                "delay curve needs at least one point".to_string(),
            ));
        }
        for w in points.windows(2) {
            if w[1].0 <= w[0].0 {
                return Err(ValidationError::InvalidParameter(format!(
                    "delay curve rpm must be strictly increasing ({} then {})",
                    w[0].0, w[1].0
                )));
            }
        }
        if let Some((rpm, ms)) = points
            .iter()
            .find(|(rpm, ms)| !rpm.is_finite() || !ms.is_finite() || *ms < 0.0)
        {
            return Err(ValidationError::InvalidParameter(format!(
                "invalid delay curve point ({rpm}, {ms})"
            )));
        }
        Ok(Self {
            rpm: points.iter().map(|p| p.0).collect(),
            delay_ms: points.iter().map(|p| p.1).collect(),
        })
    }

    pub fn delay_ms(&self, rpm: f64) -> f64 {
        // Only fails on an invalid curve, which `new` rules out.
        interpolate_1d_clamped(&self.rpm, &self.delay_ms, rpm).unwrap_or(self.delay_ms[0])
    }

    pub fn max_delay_ms(&self) -> f64 {
        self.delay_ms.iter().copied().fold(0.0, f64::max)
    }
}

impl Default for DelayCurve {
    fn default() -> Self {
        Self {
            rpm: vec![800.0, 6000.0],
            delay_ms: vec![200.0, 50.0],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DelayCompensator {
    enabled: bool,
    curve: DelayCurve,
    history_ms: u64,
    history: VecDeque<OperatingPoint>,
}

impl DelayCompensator {
    pub fn new(cfg: &DelayCfg) -> Result<Self, ValidationError> {
        let curve = DelayCurve::new(&cfg.curve)?;
        if cfg.enabled && (cfg.history_ms as f64) < curve.max_delay_ms() {
            return Err(ValidationError::InvalidParameter(format!(
                "delay history ({} ms) shorter than the longest delay ({} ms)",
                cfg.history_ms,
                curve.max_delay_ms()
            )));
        }
        Ok(Self {
            enabled: cfg.enabled,
            curve,
            history_ms: cfg.history_ms,
            history: VecDeque::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Append an operating point. Timestamps must be non-decreasing.
    ///
    /// Points older than `history_ms` are pruned, except the newest of them,
    /// which is kept so a lookup at the window edge still has a bracket.
    pub fn record(&mut self, point: OperatingPoint) {
        self.history.push_back(point);
        let newest = point.timestamp_ms;
        while self.history.len() >= 2
            && self.history[1].timestamp_ms.saturating_add(self.history_ms) <= newest
        {
            self.history.pop_front();
        }
    }

    /// Operating point at `timestamp_ms - delay(rpm)`.
    ///
    /// Between two recorded points the coordinates are interpolated; before
    /// the oldest or after the newest the nearest endpoint is used. `None`
    /// only when nothing has been recorded.
    pub fn attribute(&self, timestamp_ms: u64, rpm: f64) -> Option<Attribution> {
        let newest = self.history.back()?;
        if !self.enabled {
            return Some(Attribution {
                x: newest.x,
                y: newest.y,
                delay_ms: 0.0,
            });
        }
        let delay_ms = self.curve.delay_ms(rpm);
        let t = timestamp_ms as f64 - delay_ms;
        let idx = self.history.partition_point(|p| (p.timestamp_ms as f64) < t);

        let at = |p: &OperatingPoint| Attribution {
            x: p.x,
            y: p.y,
            delay_ms,
        };
        if idx == 0 {
            return self.history.front().map(at);
        }
        if idx == self.history.len() {
            return Some(at(newest));
        }
        let (a, b) = (&self.history[idx - 1], &self.history[idx]);
        if b.timestamp_ms as f64 == t {
            return Some(at(b));
        }
        // a.ts < t < b.ts, so the span is positive.
        let frac = (t - a.timestamp_ms as f64) / (b.timestamp_ms - a.timestamp_ms) as f64;
        Some(Attribution {
            x: lerp(a.x, b.x, frac),
            y: lerp(a.y, b.y, frac),
            delay_ms,
        })
    }
}
