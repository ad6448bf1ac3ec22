//! Type-state builder for `Tuner`.
//!
//! `build()` only exists once a table has been supplied; `try_build()` is
//! always available for dynamic callers.

use std::marker::PhantomData;

use crate::accumulator::SampleWeighting;
use crate::axes::LoadAxis;
use crate::config::{DelayCfg, FilterCfg, SessionCfg, SmoothingCfg, TunerCfg};
use crate::delay::DelayCompensator;
use crate::error::BuildError;
use crate::filter::SampleFilter;
use crate::recommend::{AuthorityLimits, TargetSource};
use crate::session::{Pipeline, Tuner, TunerParts};
use crate::smoothing::GaussianKernel;
use crate::table::TableGrid;
use crate::util::RateLimitedLog;

pub struct Missing;
pub struct Set;

pub struct TunerBuilder<T> {
    table: Option<TableGrid>,
    cfg: TunerCfg,
    _t: PhantomData<T>,
}

impl Default for TunerBuilder<Missing> {
    fn default() -> Self {
        Self {
            table: None,
            cfg: TunerCfg::default(),
            _t: PhantomData,
        }
    }
}

impl<T> TunerBuilder<T> {
    /// The live table to tune.
    pub fn table(self, grid: TableGrid) -> TunerBuilder<Set> {
        TunerBuilder {
            table: Some(grid),
            cfg: self.cfg,
            _t: PhantomData,
        }
    }

    /// Replace every setting at once.
    pub fn config(mut self, cfg: TunerCfg) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn filter(mut self, filter: FilterCfg) -> Self {
        self.cfg.filter = filter;
        self
    }

    pub fn authority(mut self, limits: AuthorityLimits) -> Self {
        self.cfg.authority = limits;
        self
    }

    pub fn delay(mut self, delay: DelayCfg) -> Self {
        self.cfg.delay = delay;
        self
    }

    pub fn smoothing(mut self, smoothing: SmoothingCfg) -> Self {
        self.cfg.smoothing = smoothing;
        self
    }

    pub fn session(mut self, session: SessionCfg) -> Self {
        self.cfg.session = session;
        self
    }

    pub fn weighting(mut self, weighting: SampleWeighting) -> Self {
        self.cfg.session.weighting = weighting;
        self
    }

    pub fn target(mut self, target: TargetSource) -> Self {
        self.cfg.target = target;
        self
    }

    pub fn load_axis(mut self, axis: LoadAxis) -> Self {
        self.cfg.load_axis = axis;
        self
    }

    /// Validate and construct, whether or not a table was set.
    pub fn try_build(self) -> Result<Tuner, BuildError> {
        let grid = self.table.ok_or(BuildError::MissingTable)?;
        let TunerCfg {
            filter,
            authority,
            delay,
            smoothing,
            session,
            target,
            load_axis,
        } = self.cfg;

        let interval = session.diagnostic_interval_ms;
        let pipeline = Pipeline {
            filter: SampleFilter::new(filter, interval)?,
            delay: DelayCompensator::new(&delay)?,
            last_ts: None,
            malformed_log: RateLimitedLog::new(interval),
        };
        let kernel = GaussianKernel::new(smoothing.kernel_size, smoothing.sigma)?;
        if let SampleWeighting::Dwell { max_ms: 0 } = session.weighting {
            return Err(BuildError::InvalidConfig(
                crate::error::ValidationError::InvalidParameter(
                    "dwell weighting needs max_ms >= 1".to_string(),
                ),
            ));
        }

        tracing::debug!(
            rows = grid.rows(),
            cols = grid.cols(),
            load_axis = %load_axis.mode(),
            "tuner built"
        );
        Ok(Tuner::from_parts(TunerParts {
            grid,
            pipeline,
            target,
            limits: authority,
            kernel,
            load_axis,
            weighting: session.weighting,
        }))
    }
}

impl TunerBuilder<Set> {
    pub fn build(self) -> Result<Tuner, BuildError> {
        self.try_build()
    }
}
