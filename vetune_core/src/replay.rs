//! Telemetry source backed by a recorded log.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use vetune_config::TelemetryLog;
use vetune_traits::clock::{Clock, MonotonicClock};
use vetune_traits::{TelemetrySample, TelemetrySource};

/// Replays recorded samples in order, optionally paced by their timestamps.
pub struct ReplaySource<C: Clock = MonotonicClock> {
    samples: VecDeque<TelemetrySample>,
    channels: BTreeSet<String>,
    pacing: Option<(C, f64)>,
    last_ts: Option<u64>,
}

fn channel_union(samples: &[TelemetrySample]) -> BTreeSet<String> {
    samples
        .iter()
        .flat_map(|s| s.channels.keys().cloned())
        .collect()
}

impl ReplaySource<MonotonicClock> {
    /// Deliver samples as fast as they are read.
    pub fn new(samples: Vec<TelemetrySample>) -> Self {
        Self {
            channels: channel_union(&samples),
            samples: samples.into(),
            pacing: None,
            last_ts: None,
        }
    }

    /// Replay a parsed CSV log; header columns count as channels even
    /// where every cell is blank.
    pub fn from_log(log: TelemetryLog) -> Self {
        Self::new(log.samples).with_channels(log.channels)
    }
}

impl<C: Clock> ReplaySource<C> {
    /// Sleep on `clock` between samples; `speed` 2.0 replays twice as fast.
    /// Non-positive speeds disable pacing.
    pub fn paced(samples: Vec<TelemetrySample>, clock: C, speed: f64) -> Self {
        let pacing = (speed.is_finite() && speed > 0.0).then_some((clock, speed));
        Self {
            channels: channel_union(&samples),
            samples: samples.into(),
            pacing,
            last_ts: None,
        }
    }

    /// Declare channels the log carries beyond those seen in its samples.
    pub fn with_channels(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.channels.extend(names);
        self
    }

    /// Every extra channel present anywhere in the log, sorted, for
    /// load-axis detection.
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().cloned().collect()
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl<C: Clock> TelemetrySource for ReplaySource<C> {
    fn next_sample(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<TelemetrySample>, Box<dyn std::error::Error + Send + Sync>> {
        let Some(sample) = self.samples.pop_front() else {
            return Ok(None);
        };
        if let (Some((clock, speed)), Some(prev)) = (&self.pacing, self.last_ts) {
            let gap_ms = sample.timestamp_ms.saturating_sub(prev) as f64 / speed;
            clock.sleep(Duration::from_micros((gap_ms * 1_000.0).round() as u64));
        }
        self.last_ts = Some(sample.timestamp_ms);
        Ok(Some(sample))
    }
}
