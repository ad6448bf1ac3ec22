//! Runtime configuration for the tuning engine.
//!
//! These are separate from the TOML schema in `vetune_config`; see
//! `conversions` for the mapping.

use crate::accumulator::SampleWeighting;
use crate::axes::LoadAxis;
use crate::error::ValidationError;
use crate::recommend::{AuthorityLimits, TargetSource};

/// Sample admission thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCfg {
    pub min_rpm: f64,
    pub max_rpm: f64,
    pub min_clt: f64,
    /// Throttle must be strictly above this (%).
    pub min_tps: f64,
    /// Max |d tps / dt| in %/s.
    pub max_tps_rate: f64,
    /// Boolean expression over channel names.
    pub custom: Option<String>,
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

impl FilterCfg {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, v) in [
            ("min_rpm", self.min_rpm),
            ("max_rpm", self.max_rpm),
            ("min_clt", self.min_clt),
            ("min_tps", self.min_tps),
            ("max_tps_rate", self.max_tps_rate),
        ] {
            if !v.is_finite() {
                return Err(ValidationError::InvalidParameter(format!(
                    "filter {name} must be finite"
                )));
            }
        }
        if self.min_rpm > self.max_rpm {
            return Err(ValidationError::InvertedRange("filter rpm"));
        }
        if self.max_tps_rate < 0.0 {
            return Err(ValidationError::NegativeLimit("filter max_tps_rate"));
        }
        Ok(())
    }
}

/// Transport-delay compensation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayCfg {
    /// When false, samples are attributed to their own operating point.
    pub enabled: bool,
    pub history_ms: u64,
    /// `(rpm, delay_ms)` reference points, rpm strictly increasing.
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

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingCfg {
    pub kernel_size: usize,
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

#[derive(Debug, Clone, PartialEq)]
pub struct SessionCfg {
    pub weighting: SampleWeighting,
    /// Minimum spacing of malformed/predicate-failure warnings (ms).
    pub diagnostic_interval_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            weighting: SampleWeighting::Uniform,
            diagnostic_interval_ms: 5_000,
        }
    }
}

/// Everything a `Tuner` needs besides the table itself.
#[derive(Debug, Clone, Default)]
pub struct TunerCfg {
    pub filter: FilterCfg,
    pub authority: AuthorityLimits,
    pub delay: DelayCfg,
    pub smoothing: SmoothingCfg,
    pub session: SessionCfg,
    pub target: TargetSource,
    pub load_axis: LoadAxis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_valid() {
        assert_eq!(FilterCfg::default().validate(), Ok(()));
    }

    #[test]
    fn inverted_rpm_range_rejected() {
        let f = FilterCfg {
            min_rpm: 5000.0,
            max_rpm: 1000.0,
            ..FilterCfg::default()
        };
        assert_eq!(f.validate(), Err(ValidationError::InvertedRange("filter rpm")));
    }

    #[test]
    fn negative_rate_rejected() {
        let f = FilterCfg {
            max_tps_rate: -1.0,
            ..FilterCfg::default()
        };
        assert!(matches!(f.validate(), Err(ValidationError::NegativeLimit(_))));
    }
}
