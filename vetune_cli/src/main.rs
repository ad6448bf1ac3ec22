#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod analyze;
mod cli;
mod error_fmt;
mod logging;
mod self_check;
mod table_cmd;
mod writer;

use clap::Parser;
use eyre::WrapErr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cli::{Cli, Commands, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};

fn load_config(path: Option<&Path>) -> eyre::Result<vetune_config::Config> {
    let cfg = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .wrap_err_with(|| format!("read config {}", p.display()))?;
            toml::from_str::<vetune_config::Config>(&text)
                .wrap_err_with(|| format!("parse config {}", p.display()))?
        }
        None => vetune_config::Config::default(),
    };
    cfg.validate().wrap_err("invalid config")?;
    Ok(cfg)
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    logging::init_tracing(cli.json, &cli.log_level, &cfg.logging)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    match cli.cmd {
        Commands::Analyze {
            table,
            log,
            output,
            target_table,
            locks,
            speed,
            all_cells,
        } => {
            let args = analyze::AnalyzeArgs {
                table,
                log,
                output,
                target_table,
                locks,
                speed,
            };
            let report = analyze::run_analyze(&cfg, &args, &shutdown)?;
            if cli.json {
                println!("{}", analyze::to_json(&report));
            } else {
                analyze::print_human(&report, all_cells);
            }
            Ok(())
        }
        Commands::Table { op } => table_cmd::run_table(&cfg, &op, cli.json),
        Commands::SelfCheck => {
            let report = self_check::run()?;
            if cli.json {
                println!("{}", serde_json::json!({ "status": "ok", "checks": report }));
            } else {
                for line in &report {
                    println!("ok  {line}");
                }
                println!("self-check passed");
            }
            Ok(())
        }
    }
}

fn main() {
    // Panic/backtrace hooks only; reports are rendered by error_fmt.
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}
