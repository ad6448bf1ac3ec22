#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and CSV loaders for the tuning workspace.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Table and telemetry CSV loaders enforce headers. Malformed table rows
//!   are rejected; malformed telemetry rows are skipped and counted.
//!   Geometric invariants (monotonic axes) are checked by the core when the
//!   grid is built.
use serde::Deserialize;
use serde::de::Deserializer;
use std::path::PathBuf;

mod csv_io;

pub use csv_io::{
    TABLE_CORNER_HEADER, TELEMETRY_REQUIRED_HEADERS, TableCsv, TelemetryLog, load_table_csv,
    load_telemetry_csv, parse_table_csv, parse_telemetry_csv, write_table_csv, write_table_csv_to,
};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FilterCfg {
    pub min_rpm: f64,
    pub max_rpm: f64,
    /// Minimum coolant temperature; excludes cold-engine enrichment.
    pub min_clt: f64,
    /// Throttle must be above this (%); excludes decel fuel cut.
    pub min_tps: f64,
    /// Max |TPS rate| in %/s before a sample counts as transient.
    pub max_tps_rate: f64,
    /// Optional boolean expression over channel names, e.g. `"iat < 60 && afr > 10"`.
    pub custom: Option<String>,
    /// Reject samples whose `accel_enrich` channel is non-zero.
    pub exclude_accel_enrich: bool,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            min_rpm: 1000.0,
            max_rpm: 7000.0,
            min_clt: 70.0,
            min_tps: 1.0,
            max_tps_rate: 10.0,
            custom: None,
            exclude_accel_enrich: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthorityCfg {
    /// When false, both limits are ignored.
    pub enabled: bool,
    /// Max absolute per-cell change from the session-start value.
    pub max_abs_change: Option<f64>,
    /// Max per-cell change as a fraction of the session-start value (0.2 = 20 %).
    pub max_pct_change: Option<f64>,
}

impl Default for AuthorityCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            max_abs_change: Some(10.0),
            max_pct_change: Some(0.20),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DelayCfg {
    pub enabled: bool,
    /// How much operating-point history to keep (ms). Must cover the longest delay.
    pub history_ms: u64,
    /// Reference curve of `(rpm, delay_ms)` points. Accepts either:
    /// - array of tuples: [[800.0, 200.0], [6000.0, 50.0]]
    /// - array of tables: [{ rpm = 800.0, delay_ms = 200.0 }, ...]
    #[serde(deserialize_with = "de_delay_curve")]
    pub curve: Vec<(f64, f64)>,
}

impl Default for DelayCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            history_ms: 500,
            curve: vec![(800.0, 200.0), (6000.0, 50.0)],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TargetCfg {
    /// Fixed target AFR used when no target table is configured.
    pub afr: f64,
    /// Optional target AFR table (CSV, same layout as the tuned table).
    pub table: Option<PathBuf>,
}

impl Default for TargetCfg {
    fn default() -> Self {
        Self {
            afr: 14.7,
            table: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AxesCfg {
    /// Channel name feeding the table's load axis (e.g. "map", "maf").
    pub load_channel: String,
}

impl Default for AxesCfg {
    fn default() -> Self {
        Self {
            load_channel: "map".to_string(),
        }
    }
}

/// Largest smoothing radius accepted from config or the command line.
pub const MAX_KERNEL_SIZE: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SmoothingCfg {
    /// Neighbourhood radius in cells.
    pub kernel_size: usize,
    /// Gaussian sigma; defaults to `kernel_size / 2`.
    pub sigma: Option<f64>,
}

impl Default for SmoothingCfg {
    fn default() -> Self {
        Self {
            kernel_size: 2,
            sigma: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// Every admitted sample weighs 1.
    #[default]
    Uniform,
    /// Weight by time spent at the operating point since the previous sample.
    Dwell,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionCfg {
    /// How often the CLI pulls a recommendation snapshot while replaying (ms).
    pub recommend_interval_ms: u64,
    pub weighting: Weighting,
    /// Cap for a single dwell weight (ms); larger gaps are treated as dropouts.
    pub max_dwell_ms: u64,
    /// Per-read timeout passed to the telemetry source (ms).
    pub sample_timeout_ms: u64,
    /// Minimum spacing between malformed-sample diagnostics (ms).
    pub diagnostic_interval_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            recommend_interval_ms: 2000,
            weighting: Weighting::Uniform,
            max_dwell_ms: 200,
            sample_timeout_ms: 100,
            diagnostic_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub filter: FilterCfg,
    #[serde(default)]
    pub authority: AuthorityCfg,
    #[serde(default)]
    pub delay: DelayCfg,
    #[serde(default)]
    pub target: TargetCfg,
    #[serde(default)]
    pub axes: AxesCfg,
    #[serde(default)]
    pub smoothing: SmoothingCfg,
    #[serde(default)]
    pub session: SessionCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurvePointToml {
    Tuple((f64, f64)),
    Table { rpm: f64, delay_ms: f64 },
}

fn de_delay_curve<'de, D>(deserializer: D) -> Result<Vec<(f64, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<CurvePointToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for p in items {
            match p {
                CurvePointToml::Tuple((rpm, ms)) => out.push((rpm, ms)),
                CurvePointToml::Table { rpm, delay_ms } => out.push((rpm, delay_ms)),
            }
        }
    }
    Ok(out)
}

fn ensure_finite(name: &str, v: f64) -> eyre::Result<()> {
    if !v.is_finite() {
        eyre::bail!("{name} must be finite");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Filter
        let f = &self.filter;
        for (name, v) in [
            ("filter.min_rpm", f.min_rpm),
            ("filter.max_rpm", f.max_rpm),
            ("filter.min_clt", f.min_clt),
            ("filter.min_tps", f.min_tps),
            ("filter.max_tps_rate", f.max_tps_rate),
        ] {
            ensure_finite(name, v)?;
        }
        if f.min_rpm > f.max_rpm {
            eyre::bail!("filter.min_rpm must be <= filter.max_rpm");
        }
        if f.max_tps_rate < 0.0 {
            eyre::bail!("filter.max_tps_rate must be >= 0");
        }
        if let Some(expr) = &f.custom
            && expr.trim().is_empty()
        {
            eyre::bail!("filter.custom must not be blank (omit it to disable)");
        }

        // Authority
        if let Some(abs) = self.authority.max_abs_change
            && !(abs.is_finite() && abs >= 0.0)
        {
            eyre::bail!("authority.max_abs_change must be >= 0");
        }
        if let Some(pct) = self.authority.max_pct_change
            && !(pct.is_finite() && pct >= 0.0)
        {
            eyre::bail!("authority.max_pct_change must be >= 0");
        }
        if let Some(pct) = self.authority.max_pct_change
            && pct > 10.0
        {
            eyre::bail!("authority.max_pct_change is a fraction (0.2 = 20%), got {pct}");
        }

        // Delay
        if self.delay.enabled {
            if self.delay.curve.is_empty() {
                eyre::bail!("delay.curve must have at least one point");
            }
            for w in self.delay.curve.windows(2) {
                if w[1].0 <= w[0].0 {
                    eyre::bail!("delay.curve rpm values must be strictly increasing");
                }
            }
            let mut max_delay = 0.0f64;
            for (rpm, ms) in &self.delay.curve {
                ensure_finite("delay.curve rpm", *rpm)?;
                if !(ms.is_finite() && *ms >= 0.0) {
                    eyre::bail!("delay.curve delay_ms must be >= 0");
                }
                max_delay = max_delay.max(*ms);
            }
            if (self.delay.history_ms as f64) < max_delay {
                eyre::bail!(
                    "delay.history_ms ({}) must cover the longest curve delay ({max_delay} ms)",
                    self.delay.history_ms
                );
            }
        }

        // Target
        if !(self.target.afr.is_finite() && self.target.afr > 0.0) {
            eyre::bail!("target.afr must be > 0");
        }

        // Axes
        if self.axes.load_channel.trim().is_empty() {
            eyre::bail!("axes.load_channel must not be empty");
        }

        // Smoothing
        if let Some(sigma) = self.smoothing.sigma
            && !(sigma.is_finite() && sigma > 0.0)
        {
            eyre::bail!("smoothing.sigma must be > 0");
        }
        if self.smoothing.kernel_size > MAX_KERNEL_SIZE {
            eyre::bail!("smoothing.kernel_size is unreasonably large (>{MAX_KERNEL_SIZE})");
        }

        // Session
        if self.session.recommend_interval_ms == 0 {
            eyre::bail!("session.recommend_interval_ms must be >= 1");
        }
        if self.session.sample_timeout_ms == 0 {
            eyre::bail!("session.sample_timeout_ms must be >= 1");
        }
        if self.session.weighting == Weighting::Dwell && self.session.max_dwell_ms == 0 {
            eyre::bail!("session.max_dwell_ms must be >= 1 when weighting = \"dwell\"");
        }

        Ok(())
    }
}
