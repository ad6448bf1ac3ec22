//! Sample admission gate.
//!
//! Each rule excludes one named source of measurement bias: cranking and
//! over-rev (rpm window), cold-engine enrichment (clt), decel fuel cut
//! (closed throttle) and throttle transients (tps rate, accel enrichment).
//! A rejected sample leaves no trace outside the filter's own rate tracking.

use evalexpr::{ContextWithMutableVariables, HashMapContext, Node, Value};
use vetune_traits::TelemetrySample;

use crate::config::FilterCfg;
use crate::error::ValidationError;
use crate::util::{MILLIS_PER_SEC, RateLimitedLog};

/// Channel consulted by `exclude_accel_enrich`.
pub const ACCEL_ENRICH_CHANNEL: &str = "accel_enrich";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    RpmOutOfRange,
    ColdEngine,
    ClosedThrottle,
    ThrottleTransient,
    AccelEnrichment,
    CustomPredicate,
    PredicateError,
}

impl RejectReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RpmOutOfRange => "rpm_out_of_range",
            Self::ColdEngine => "cold_engine",
            Self::ClosedThrottle => "closed_throttle",
            Self::ThrottleTransient => "throttle_transient",
            Self::AccelEnrichment => "accel_enrichment",
            Self::CustomPredicate => "custom_predicate",
            Self::PredicateError => "predicate_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(RejectReason),
}

impl Admission {
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Pre-parsed boolean expression over named channels.
///
/// Numeric results count as true when non-zero.
#[derive(Debug, Clone)]
pub struct CustomPredicate {
    source: String,
    tree: Node,
}

impl CustomPredicate {
    pub fn parse(expr: &str) -> Result<Self, ValidationError> {
        let source = expr.trim();
        if source.is_empty() {
            return Err(ValidationError::InvalidExpression(
                "expression is blank".to_string(),
            ));
        }
        let tree = evalexpr::build_operator_tree(source)
            .map_err(|e| ValidationError::InvalidExpression(format!("{source:?}: {e}")))?;
        Ok(Self {
            source: source.to_string(),
            tree,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a sample; `tps_rate` is the effective (reported or derived) rate.
    pub fn eval(&self, sample: &TelemetrySample, tps_rate: f64) -> Result<bool, String> {
        let mut ctx: HashMapContext = HashMapContext::new();
        let fixed = [
            ("rpm", sample.rpm),
            ("load", sample.load),
            ("afr", sample.afr),
            ("clt", sample.clt),
            ("tps", sample.tps),
            ("tps_rate", tps_rate),
        ];
        let extra = sample.channels.iter().map(|(k, v)| (k.as_str(), *v));
        for (name, v) in fixed.into_iter().chain(extra) {
            ctx.set_value(name.to_string(), Value::Float(v))
                .map_err(|e| format!("set {name}: {e}"))?;
        }
        match self.tree.eval_with_context(&ctx) {
            Ok(Value::Boolean(b)) => Ok(b),
            Ok(Value::Int(i)) => Ok(i != 0),
            Ok(Value::Float(f)) => Ok(f != 0.0),
            Ok(other) => Err(format!("expected boolean, got {other:?}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Stateful admission filter. Tracks the previous throttle reading to derive
/// `tps_rate` when the source does not report one.
#[derive(Debug, Clone)]
pub struct SampleFilter {
    cfg: FilterCfg,
    predicate: Option<CustomPredicate>,
    prev_tps: Option<(u64, f64)>,
    last_rate: f64,
    predicate_log: RateLimitedLog,
}

impl SampleFilter {
    pub fn new(cfg: FilterCfg, diagnostic_interval_ms: u64) -> Result<Self, ValidationError> {
        cfg.validate()?;
        let predicate = cfg.custom.as_deref().map(CustomPredicate::parse).transpose()?;
        Ok(Self {
            cfg,
            predicate,
            prev_tps: None,
            last_rate: 0.0,
            predicate_log: RateLimitedLog::new(diagnostic_interval_ms),
        })
    }

    pub fn config(&self) -> &FilterCfg {
        &self.cfg
    }

    /// Forget throttle history (new session).
    pub fn reset(&mut self) {
        self.prev_tps = None;
        self.last_rate = 0.0;
    }

    /// Effective throttle rate in %/s. Must be called once per sample, in order.
    fn tps_rate(&mut self, sample: &TelemetrySample) -> f64 {
        let derived = match self.prev_tps {
            Some((t0, tps0)) if sample.timestamp_ms > t0 => {
                let dt_s = (sample.timestamp_ms - t0) as f64 / MILLIS_PER_SEC;
                (sample.tps - tps0) / dt_s
            }
            // Same timestamp: keep the last rate rather than dividing by zero.
            Some(_) => self.last_rate,
            None => 0.0,
        };
        self.prev_tps = Some((sample.timestamp_ms, sample.tps));
        let rate = sample.tps_rate.unwrap_or(derived);
        self.last_rate = rate;
        rate
    }

    pub fn check(&mut self, sample: &TelemetrySample) -> Admission {
        use RejectReason as R;
        let tps_rate = self.tps_rate(sample);
        let c = &self.cfg;

        if sample.rpm < c.min_rpm || sample.rpm > c.max_rpm {
            return Admission::Rejected(R::RpmOutOfRange);
        }
        if sample.clt < c.min_clt {
            return Admission::Rejected(R::ColdEngine);
        }
        if sample.tps <= c.min_tps {
            return Admission::Rejected(R::ClosedThrottle);
        }
        if tps_rate.abs() > c.max_tps_rate {
            return Admission::Rejected(R::ThrottleTransient);
        }
        if c.exclude_accel_enrich
            && sample
                .channels
                .get(ACCEL_ENRICH_CHANNEL)
                .is_some_and(|v| *v != 0.0)
        {
            return Admission::Rejected(R::AccelEnrichment);
        }
        if let Some(pred) = &self.predicate {
            match pred.eval(sample, tps_rate) {
                Ok(true) => {}
                Ok(false) => return Admission::Rejected(R::CustomPredicate),
                Err(e) => {
                    if let Some(suppressed) = self.predicate_log.hit(sample.timestamp_ms) {
                        tracing::warn!(
                            expr = pred.source(),
                            error = %e,
                            suppressed,
                            "custom filter failed to evaluate; sample rejected"
                        );
                    }
                    return Admission::Rejected(R::PredicateError);
                }
            }
        }
        Admission::Admitted
    }
}
