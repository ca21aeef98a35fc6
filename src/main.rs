mod alert;
mod config;
mod fetcher;
mod loader;
mod models;
mod pipeline;
mod preprocess;
mod report;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::fetcher::YahooSource;
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "asset-chart", about = "Indexed asset price history workbook", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: config/config.yml)
    #[arg(short, long, global = true, env = "ASSETCHART_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Download price history, then build the workbook
    Run,

    /// Download one CSV per search term into the raw CSV folder
    Fetch,

    /// Build the workbook from the CSVs already on disk
    Report,

    /// Run the price threshold check only
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let logging = utils::logging::init(cli.verbose, &config.paths.log_dir)?;
    debug!("Logging to {:?}", logging.log_file());
    debug!("{:?}", config);

    let pipeline = Pipeline::new(config);

    match cli.command {
        Command::Run => {
            let _t = utils::Timer::start("Full run");
            let source = YahooSource::new(&pipeline.config().fetcher)?;
            let stats = pipeline.run(&source).await?;
            info!(
                "Done: {} files downloaded, {} assets charted, workbook at {:?}",
                stats.files_downloaded, stats.assets, stats.workbook
            );
        }

        Command::Fetch => {
            let source = YahooSource::new(&pipeline.config().fetcher)?;
            let files = pipeline.fetch(&source).await?;
            info!("Done: {} files downloaded", files.len());
        }

        Command::Report => {
            let stats = pipeline.build()?;
            info!("Done: workbook at {:?}", stats.workbook);
        }

        Command::Check => {
            let processed = pipeline.process()?;
            let breaches = pipeline.check(&processed.chart);
            if breaches.is_empty() {
                println!(
                    "No value under the {} threshold.",
                    pipeline.config().price_threshold
                );
            } else {
                for b in &breaches {
                    println!(
                        "  {:<30} {} dates, lowest {:.2}",
                        b.column,
                        b.dates.len(),
                        b.values.iter().copied().fold(f64::INFINITY, f64::min)
                    );
                }
            }
        }
    }

    Ok(())
}
