#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop calibration table tuning (transport-agnostic).
//!
//! Telemetry arrives through `vetune_traits::TelemetrySource`; corrected
//! values leave through `vetune_traits::TableWriter`. Everything in between
//! lives here.
//!
//! ## Architecture
//!
//! - **Table model**: `TableGrid`, `Selection`, `CellIndex` (`table`)
//! - **Math**: bilinear/corner interpolation and rebinning (`interpolate`),
//!   Gaussian smoothing (`smoothing`), scale and set-equal (`table`)
//! - **Admission**: `SampleFilter` with an optional expression predicate (`filter`)
//! - **Attribution**: rpm-dependent transport delay over a rolling history (`delay`)
//! - **Statistics**: per-cell weighted accumulators (`accumulator`)
//! - **Output**: authority-limited, lock-aware recommendations (`recommend`)
//! - **Session**: the `Tuner` state machine and its background `Ingestor`
//!
//! Data flow: sample -> filter -> delay -> accumulate -> (pull) recommend.

pub mod accumulator;
pub mod axes;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod delay;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod interpolate;
pub mod locks;
pub mod recommend;
pub mod replay;
pub mod session;
pub mod smoothing;
pub mod source_error;
pub mod table;
pub mod util;

pub use accumulator::{CellAccumulator, CellStats, SampleWeighting};
pub use axes::{LoadAxis, LoadAxisMode, select_load_axis};
pub use builder::TunerBuilder;
pub use config::TunerCfg;
pub use error::{Axis, BuildError, NumericalError, Result, TuneError, ValidationError};
pub use filter::{Admission, RejectReason, SampleFilter};
pub use ingest::{IngestExit, Ingestor};
pub use interpolate::{interpolate_1d, interpolate_1d_clamped};
pub use recommend::{
    AuthorityLimits, CellOutcome, Recommendation, RecommendationEngine, RecommendationSet,
    TargetSource,
};
pub use replay::ReplaySource;
pub use session::{IngestCounters, IngestOutcome, MalformedReason, SessionState, SessionSummary, Tuner};
pub use smoothing::GaussianKernel;
pub use table::{CellIndex, Selection, TableGrid};
