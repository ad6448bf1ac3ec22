use thiserror::Error;

/// Table axis, used to label interpolation and validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => f.write_str("x"),
            Axis::Y => f.write_str("y"),
        }
    }
}

/// Rejected before the operation runs; nothing has been mutated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("selection is empty")]
    EmptySelection,
    #[error("cell ({row}, {col}) is outside the {rows}x{cols} table")]
    CellOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("{axis} axis must not be empty")]
    EmptyAxis { axis: Axis },
    #[error("{axis} axis must be strictly monotonic (bins {index} and {next})")]
    NonMonotonicAxis {
        axis: Axis,
        index: usize,
        next: usize,
    },
    #[error("non-finite value at ({row}, {col})")]
    NonFiniteValue { row: usize, col: usize },
    #[error("{0}: min must be <= max")]
    InvertedRange(&'static str),
    #[error("{0} must be >= 0")]
    NegativeLimit(&'static str),
    #[error("cell ({row}, {col}) is locked")]
    LockedCell { row: usize, col: usize },
    #[error("invalid smoothing kernel: {0}")]
    InvalidKernel(String),
    #[error("invalid filter expression: {0}")]
    InvalidExpression(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NumericalError {
    #[error("zero-width interpolation bracket on {axis} axis at {at}")]
    ZeroWidthBracket { axis: Axis, at: f64 },
    #[error("division by zero: {0}")]
    DivisionByZero(&'static str),
    #[error("{0} overflowed to a non-finite value")]
    Overflow(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TuneError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("{axis} = {value} is outside the axis range [{min}, {max}]")]
    OutOfRange {
        axis: Axis,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("numerical error: {0}")]
    Numerical(#[from] NumericalError),
    #[error("invalid state: {0}")]
    State(String),
    #[error("telemetry source error: {0}")]
    Source(String),
    #[error("timeout waiting for telemetry")]
    Timeout,
    #[error("table writer error: {0}")]
    Writer(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing table")]
    MissingTable,
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),
}

pub type Result<T, E = TuneError> = std::result::Result<T, E>;
