//! Human-readable error descriptions and structured JSON error formatting.

use vetune_core::error::{BuildError, TuneError, ValidationError};

fn find_validation(err: &eyre::Report) -> Option<&ValidationError> {
    err.downcast_ref::<ValidationError>()
        .or_else(|| match err.downcast_ref::<TuneError>() {
            Some(TuneError::Validation(v)) => Some(v),
            _ => None,
        })
        .or_else(|| match err.downcast_ref::<BuildError>() {
            Some(BuildError::InvalidConfig(v)) => Some(v),
            _ => None,
        })
}

fn describe_validation(v: &ValidationError) -> String {
    match v {
        ValidationError::LockedCell { row, col } => format!(
            "What happened: Cell ({row}, {col}) is locked.\nLikely causes: The selection touches a cell held at its starting value.\nHow to fix: Unlock the cell or narrow the selection."
        ),
        ValidationError::EmptySelection | ValidationError::CellOutOfBounds { .. } => format!(
            "What happened: {v}.\nLikely causes: The --cells argument does not match the table shape.\nHow to fix: Use `all`, `R0,C0:R1,C1` or `R,C;R,C` with zero-based indices inside the table."
        ),
        ValidationError::NonMonotonicAxis { .. }
        | ValidationError::EmptyAxis { .. }
        | ValidationError::DimensionMismatch(_)
        | ValidationError::NonFiniteValue { .. } => format!(
            "What happened: The table is malformed ({v}).\nLikely causes: Axis bins out of order, a ragged row, or a NaN cell in the CSV.\nHow to fix: Axis bins must be strictly increasing or decreasing and every row must have one value per x bin."
        ),
        ValidationError::InvalidKernel(msg) => format!(
            "What happened: The smoothing kernel is invalid ({msg}).\nLikely causes: --kernel or --sigma out of range.\nHow to fix: Use a radius from 0 to {} and a positive sigma.",
            vetune_config::MAX_KERNEL_SIZE
        ),
        ValidationError::InvalidExpression(msg) => format!(
            "What happened: The custom filter expression could not be parsed ({msg}).\nLikely causes: A typo in [filter].custom.\nHow to fix: Write a boolean expression over channel names, e.g. \"iat < 60 && afr > 10\"."
        ),
        other => format!(
            "What happened: Invalid configuration ({other}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
        ),
    }
}

/// Map an `eyre::Report` to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(v) = find_validation(err) {
        return describe_validation(v);
    }
    if let Some(BuildError::MissingTable) = err.downcast_ref::<BuildError>() {
        return "What happened: No table was provided to the tuner.\nLikely causes: The table CSV failed to load.\nHow to fix: Pass --table with a CSV in `y\\x` layout.".to_string();
    }
    if let Some(te) = err.downcast_ref::<TuneError>() {
        return match te {
            TuneError::OutOfRange { axis, value, min, max } => format!(
                "What happened: {axis} = {value} lies outside the table ({min} to {max}).\nLikely causes: The operating point is beyond the axis bins.\nHow to fix: Query inside the axes or pass --clamp to use the edge value."
            ),
            TuneError::Numerical(n) => format!(
                "What happened: Numerical failure ({n}).\nLikely causes: Duplicate axis bins, or cell values too large to combine.\nHow to fix: Make the axis strictly monotonic and keep cell values in a sane range."
            ),
            TuneError::State(msg) => format!(
                "What happened: Operation not allowed right now ({msg}).\nLikely causes: A session is running or cells are locked.\nHow to fix: Stop the session or unlock cells first."
            ),
            TuneError::Timeout | TuneError::Source(_) => format!(
                "What happened: Telemetry could not be read ({te}).\nLikely causes: The link dropped or the log is unreadable.\nHow to fix: Check the source and rerun."
            ),
            TuneError::Writer(msg) => format!(
                "What happened: Writing the table failed ({msg}).\nLikely causes: The output path is not writable.\nHow to fix: Choose another --output location."
            ),
            TuneError::Validation(v) => describe_validation(v),
        };
    }

    // String-based heuristics for errors coming from loaders or config
    let msg = err.to_string();
    let chain = format!("{err:#}").to_ascii_lowercase();

    if chain.contains("telemetry csv must have headers") {
        return format!(
            "Invalid headers in telemetry CSV. Expected at least '{}'.",
            vetune_config::TELEMETRY_REQUIRED_HEADERS.join(",")
        );
    }
    if chain.contains("table csv") && chain.contains("header") {
        return format!(
            "Invalid table CSV header. Expected '{},<x bins...>'.",
            vetune_config::TABLE_CORNER_HEADER
        );
    }
    if chain.contains("toml") || chain.contains("config") {
        return format!(
            "What happened: Configuration is invalid or unreadable.\nLikely causes: {msg}.\nHow to fix: Edit the TOML config and try again."
        );
    }
    if chain.contains("no such file") || chain.contains("not found") {
        return format!(
            "What happened: A file could not be opened.\nLikely causes: Wrong path. Original: {err:#}\nHow to fix: Check the --table/--log/--config paths."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error family; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if find_validation(err).is_some() {
        return 3;
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return 3;
    }
    match err.downcast_ref::<TuneError>() {
        Some(TuneError::OutOfRange { .. }) => 4,
        Some(TuneError::Numerical(_)) => 5,
        Some(TuneError::State(_)) => 6,
        Some(TuneError::Source(_) | TuneError::Timeout) => 7,
        Some(TuneError::Writer(_)) => 8,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if find_validation(err).is_some() {
        return "Validation";
    }
    match err.downcast_ref::<TuneError>() {
        Some(TuneError::OutOfRange { .. }) => "OutOfRange",
        Some(TuneError::Numerical(_)) => "Numerical",
        Some(TuneError::State(_)) => "State",
        Some(TuneError::Source(_) | TuneError::Timeout) => "Source",
        Some(TuneError::Writer(_)) => "Writer",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({
        "reason": reason_name(err),
        "code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(TuneError::OutOfRange { axis, value, min, max }) = err.downcast_ref::<TuneError>() {
        obj["details"] = json!({ "axis": axis.to_string(), "value": value, "min": min, "max": max });
    }
    obj.to_string()
}
