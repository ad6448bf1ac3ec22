pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::collections::BTreeMap;

/// One telemetry frame as delivered by the protocol layer.
///
/// `load` is the table's load-axis reading (MAP, TPS-load, ...). `afr` is the
/// measured value the engine is tuned against. `tps_rate` is reported by some
/// controllers directly (%/s); when absent it is derived from consecutive frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySample {
    pub timestamp_ms: u64,
    pub rpm: f64,
    pub load: f64,
    pub afr: f64,
    pub clt: f64,
    pub tps: f64,
    pub tps_rate: Option<f64>,
    /// Any further named channels (e.g. `maf`, `accel_enrich`, `iat`).
    pub channels: BTreeMap<String, f64>,
}

impl TelemetrySample {
    /// Look up a channel by name, including the fixed fields.
    pub fn channel(&self, name: &str) -> Option<f64> {
        match name {
            "rpm" => Some(self.rpm),
            "load" => Some(self.load),
            "afr" => Some(self.afr),
            "clt" => Some(self.clt),
            "tps" => Some(self.tps),
            "tps_rate" => self.tps_rate,
            other => self.channels.get(other).copied(),
        }
    }
}

/// Producer of telemetry frames.
///
/// `Ok(None)` signals the end of the stream (replayed log exhausted, link
/// closed). Errors are transport failures; the ingest loop logs and retries.
pub trait TelemetrySource {
    fn next_sample(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<TelemetrySample>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Consumer of materialised table values (working-table apply, burn).
pub trait TableWriter {
    /// Write `(row, col, value)` triples into the controller's working table.
    fn write_cells(
        &mut self,
        cells: &[(usize, usize, f64)],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Commit the working table to persistent memory. Default: no-op.
    fn burn(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_lookup_covers_fixed_and_extra_fields() {
        let mut s = TelemetrySample {
            rpm: 3000.0,
            afr: 14.2,
            ..TelemetrySample::default()
        };
        s.channels.insert("maf".to_string(), 42.0);
        assert_eq!(s.channel("rpm"), Some(3000.0));
        assert_eq!(s.channel("afr"), Some(14.2));
        assert_eq!(s.channel("maf"), Some(42.0));
        assert_eq!(s.channel("tps_rate"), None);
        assert_eq!(s.channel("iat"), None);
    }
}
