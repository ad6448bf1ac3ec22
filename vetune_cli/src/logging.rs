//! Subscriber setup: console layer on stderr plus an optional JSON-lines file.

use eyre::WrapErr;
use std::path::Path;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::cli::FILE_GUARD;

/// Console filter: `RUST_LOG` wins over `--log-level`.
fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn file_appender(
    path: &Path,
    rotation: Option<&str>,
) -> eyre::Result<tracing_appender::rolling::RollingFileAppender> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| eyre::eyre!("logging.file {:?} has no file name", path))?;
    std::fs::create_dir_all(dir).wrap_err_with(|| format!("create log dir {}", dir.display()))?;
    Ok(match rotation.map(str::to_ascii_lowercase).as_deref() {
        Some("daily") => tracing_appender::rolling::daily(dir, name),
        Some("hourly") => tracing_appender::rolling::hourly(dir, name),
        Some("never") | None => tracing_appender::rolling::never(dir, name),
        Some(other) => eyre::bail!("logging.rotation must be never|daily|hourly, got {other:?}"),
    })
}

pub fn init_tracing(json: bool, level: &str, cfg: &vetune_config::Logging) -> eyre::Result<()> {
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter(level))
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(console_filter(level))
            .boxed()
    };

    let file = match cfg.file.as_deref() {
        Some(path) => {
            let appender = file_appender(Path::new(path), cfg.rotation.as_deref())?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Set once per process; a second init keeps the first sink.
            let _ = FILE_GUARD.set(guard);
            let file_level = cfg.level.as_deref().unwrap_or("info");
            let filter = EnvFilter::try_new(file_level)
                .wrap_err_with(|| format!("invalid logging.level {file_level:?}"))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}
