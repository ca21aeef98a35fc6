//! Per-run logging context.
//!
//! Console output follows the `-v` count; a dated log file under the log
//! directory receives INFO and above. The subscriber is installed as the
//! thread default and removed again when [`RunLogging`] is dropped.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub struct RunLogging {
    log_file: PathBuf,
    _guard: DefaultGuard,
}

impl RunLogging {
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

fn console_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "asset_chart=info,warn",
        1 => "asset_chart=debug,info",
        _ => "trace",
    }
}

pub fn init(verbose: u8, log_dir: &Path) -> Result<RunLogging> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Could not create log dir {:?}", log_dir))?;

    let log_file = log_dir.join(format!("assetprice_{}.log", Local::now().format("%Y%m%d")));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Could not open log file {:?}", log_file))?;

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_filter(EnvFilter::new(console_filter(verbose))),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::INFO),
        );

    let guard = tracing::subscriber::set_default(subscriber);

    Ok(RunLogging {
        log_file,
        _guard: guard,
    })
}
