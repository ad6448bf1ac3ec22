//! Load-axis source selection.
//!
//! A table's y axis is either the generic load reading carried on every
//! sample (MAP, TPS-load) or a mass-flow channel. The mode is picked from the
//! configured channel name, and falls back to `Load` when the stream has no
//! such channel.

use std::fmt;

use vetune_traits::TelemetrySample;

const MASS_FLOW_HINTS: [&str; 4] = ["maf", "mass_air", "massair", "massflow"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadAxisMode {
    #[default]
    Load,
    MassFlow,
}

impl LoadAxisMode {
    /// Classify a channel name by mass-flow naming hints.
    pub fn detect(channel: &str) -> Self {
        let name = channel.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        if MASS_FLOW_HINTS.iter().any(|h| name.contains(h)) {
            Self::MassFlow
        } else {
            Self::Load
        }
    }
}

impl fmt::Display for LoadAxisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::MassFlow => f.write_str("mass-flow"),
        }
    }
}

/// Resolved y-axis source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadAxis {
    /// `TelemetrySample::load`.
    #[default]
    Load,
    /// A named extra channel.
    MassFlow { channel: String },
}

impl LoadAxis {
    pub fn mode(&self) -> LoadAxisMode {
        match self {
            Self::Load => LoadAxisMode::Load,
            Self::MassFlow { .. } => LoadAxisMode::MassFlow,
        }
    }

    /// y-axis value for a sample; `None` when a mass-flow channel is absent.
    pub fn value(&self, sample: &TelemetrySample) -> Option<f64> {
        match self {
            Self::Load => Some(sample.load),
            Self::MassFlow { channel } => sample.channels.get(channel).copied(),
        }
    }
}

/// Pick the y-axis source for `configured`, given the channels the stream carries.
pub fn select_load_axis<'a, I>(configured: &str, available: I) -> LoadAxis
where
    I: IntoIterator<Item = &'a str>,
{
    if LoadAxisMode::detect(configured) == LoadAxisMode::Load {
        return LoadAxis::Load;
    }
    let channel = configured.trim();
    if available.into_iter().any(|c| c == channel) {
        tracing::debug!(channel, "using mass-flow load axis");
        LoadAxis::MassFlow {
            channel: channel.to_string(),
        }
    } else {
        tracing::warn!(
            channel,
            "no mass-flow channel in telemetry; falling back to load-based axis"
        );
        LoadAxis::Load
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("map", LoadAxisMode::Load)]
    #[case("tps_load", LoadAxisMode::Load)]
    #[case("maf", LoadAxisMode::MassFlow)]
    #[case("MAF_gps", LoadAxisMode::MassFlow)]
    #[case("Mass Air Flow", LoadAxisMode::MassFlow)]
    #[case("massFlow", LoadAxisMode::MassFlow)]
    fn detects_mode(#[case] name: &str, #[case] mode: LoadAxisMode) {
        assert_eq!(LoadAxisMode::detect(name), mode);
    }

    #[test]
    fn falls_back_when_channel_missing() {
        assert_eq!(select_load_axis("maf", ["iat", "map"]), LoadAxis::Load);
        assert_eq!(
            select_load_axis("maf", ["iat", "maf"]),
            LoadAxis::MassFlow {
                channel: "maf".to_string()
            }
        );
        assert_eq!(select_load_axis("map", ["maf"]), LoadAxis::Load);
    }

    #[test]
    fn value_reads_selected_source() {
        let mut s = TelemetrySample {
            load: 55.0,
            ..TelemetrySample::default()
        };
        s.channels.insert("maf".to_string(), 12.5);
        assert_eq!(LoadAxis::Load.value(&s), Some(55.0));
        let maf = LoadAxis::MassFlow {
            channel: "maf".to_string(),
        };
        assert_eq!(maf.value(&s), Some(12.5));
        s.channels.clear();
        assert_eq!(maf.value(&s), None);
    }
}
