//! Maps `Box<dyn Error>` from the telemetry seam to a typed `TuneError`.

use crate::error::TuneError;

/// Known error types are downcast first; anything else mentioning a
/// timeout becomes `Timeout`, the rest `Source`.
pub fn map_source_error(e: &(dyn std::error::Error + 'static)) -> TuneError {
    if let Some(t) = e.downcast_ref::<TuneError>() {
        return t.clone();
    }
    if let Some(io) = e.downcast_ref::<std::io::Error>()
        && matches!(
            io.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        )
    {
        return TuneError::Timeout;
    }
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        TuneError::Timeout
    } else {
        TuneError::Source(s)
    }
}
