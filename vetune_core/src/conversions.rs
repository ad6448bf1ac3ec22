//! Conversions from `vetune_config` schema types to runtime types.

use crate::accumulator::SampleWeighting;
use crate::axes::LoadAxis;
use crate::config::{DelayCfg, FilterCfg, SessionCfg, SmoothingCfg, TunerCfg};
use crate::error::ValidationError;
use crate::recommend::{AuthorityLimits, TargetSource};
use crate::table::TableGrid;

// ── FilterCfg ────────────────────────────────────────────────────────────────

impl From<&vetune_config::FilterCfg> for FilterCfg {
    fn from(c: &vetune_config::FilterCfg) -> Self {
        Self {
            min_rpm: c.min_rpm,
            max_rpm: c.max_rpm,
            min_clt: c.min_clt,
            min_tps: c.min_tps,
            max_tps_rate: c.max_tps_rate,
            custom: c.custom.clone(),
            exclude_accel_enrich: c.exclude_accel_enrich,
        }
    }
}

// ── AuthorityLimits ──────────────────────────────────────────────────────────

impl TryFrom<&vetune_config::AuthorityCfg> for AuthorityLimits {
    type Error = ValidationError;

    fn try_from(c: &vetune_config::AuthorityCfg) -> Result<Self, Self::Error> {
        if !c.enabled {
            return Ok(Self::unlimited());
        }
        Self::new(c.max_abs_change, c.max_pct_change)
    }
}

// ── DelayCfg ─────────────────────────────────────────────────────────────────

impl From<&vetune_config::DelayCfg> for DelayCfg {
    fn from(c: &vetune_config::DelayCfg) -> Self {
        Self {
            enabled: c.enabled,
            history_ms: c.history_ms,
            curve: c.curve.clone(),
        }
    }
}

// ── SmoothingCfg ─────────────────────────────────────────────────────────────

impl From<&vetune_config::SmoothingCfg> for SmoothingCfg {
    fn from(c: &vetune_config::SmoothingCfg) -> Self {
        Self {
            kernel_size: c.kernel_size,
            sigma: c.sigma,
        }
    }
}

// ── SessionCfg ───────────────────────────────────────────────────────────────

impl From<&vetune_config::SessionCfg> for SessionCfg {
    fn from(c: &vetune_config::SessionCfg) -> Self {
        let weighting = match c.weighting {
            vetune_config::Weighting::Uniform => SampleWeighting::Uniform,
            vetune_config::Weighting::Dwell => SampleWeighting::Dwell {
                max_ms: c.max_dwell_ms,
            },
        };
        Self {
            weighting,
            diagnostic_interval_ms: c.diagnostic_interval_ms,
        }
    }
}

// ── TunerCfg ─────────────────────────────────────────────────────────────────

impl TunerCfg {
    /// Runtime settings from a parsed config. The target table and load axis
    /// depend on files and stream contents, so the caller resolves them.
    pub fn from_config(
        cfg: &vetune_config::Config,
        target: TargetSource,
        load_axis: LoadAxis,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            filter: (&cfg.filter).into(),
            authority: (&cfg.authority).try_into()?,
            delay: (&cfg.delay).into(),
            smoothing: (&cfg.smoothing).into(),
            session: (&cfg.session).into(),
            target,
            load_axis,
        })
    }
}

// ── Tables ───────────────────────────────────────────────────────────────────

impl TryFrom<vetune_config::TableCsv> for TableGrid {
    type Error = ValidationError;

    fn try_from(t: vetune_config::TableCsv) -> Result<Self, Self::Error> {
        TableGrid::new(t.x_bins, t.y_bins, t.values)
    }
}

impl From<&TableGrid> for vetune_config::TableCsv {
    fn from(g: &TableGrid) -> Self {
        Self {
            x_bins: g.x_bins().to_vec(),
            y_bins: g.y_bins().to_vec(),
            values: g.to_rows(),
        }
    }
}
