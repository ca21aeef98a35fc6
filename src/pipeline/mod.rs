//! Pipeline orchestrator: ties fetcher → preprocessor → threshold check → report.
//!
//! ## Run modes
//!
//! `run()`: full run (the scheduled use):
//!   1. Download one CSV per search term into the raw CSV folder
//!   2. Build the raw/indexed tables and the merged chart table
//!   3. Warn on any chart value under the price threshold
//!   4. Write the workbook, replacing the previous one
//!
//! `build()`: steps 2-4 only, against the CSVs already on disk.
//!
//! Every stage runs to completion before the next starts. The first error
//! aborts the run; CSVs downloaded before it stay on disk.

use crate::alert::check_price_threshold;
use crate::config::AppConfig;
use crate::fetcher::{MarketDataSource, download_csv};
use crate::models::{PriceTable, ThresholdBreach};
use crate::preprocess::{Preprocessed, Preprocessor};
use crate::report::ExcelChart;
use crate::utils::Timer;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn run(&self, source: &dyn MarketDataSource) -> Result<PipelineStats> {
        info!("=== Step 1: Downloading price history ===");
        let files = self.fetch(source).await?;

        let mut stats = self.build()?;
        stats.files_downloaded = files.len();
        Ok(stats)
    }

    pub async fn fetch(&self, source: &dyn MarketDataSource) -> Result<Vec<PathBuf>> {
        let _t = Timer::start("CSV download");
        download_csv(
            source,
            &self.config.paths.raw_csv_dir,
            &self.config.search_terms,
            self.config.start_date,
            self.config.end_date,
        )
        .await
        .context("CSV download failed")
    }

    pub fn build(&self) -> Result<PipelineStats> {
        info!("=== Step 2: Preprocessing CSV files ===");
        let processed = self.process()?;

        info!("=== Step 3: Checking price threshold ===");
        let breaches = self.check(&processed.chart);

        info!("=== Step 4: Writing workbook ===");
        let workbook = self.report(&processed)?;

        let assets: HashSet<&str> = processed.tables.iter().map(|t| t.asset.as_str()).collect();
        let stats = PipelineStats {
            files_downloaded: 0,
            assets: assets.len(),
            chart_rows: processed.chart.len(),
            breaching_columns: breaches.len(),
            workbook,
        };

        info!(
            "=== Done: {} assets | {} chart rows | {} columns under threshold | {:?} ===",
            stats.assets, stats.chart_rows, stats.breaching_columns, stats.workbook
        );
        Ok(stats)
    }

    pub fn process(&self) -> Result<Preprocessed> {
        let _t = Timer::start("Preprocessing");
        Preprocessor::new(&self.config.paths.raw_csv_dir, self.config.crypto_tags.clone())
            .run()
            .context("Preprocessing failed")
    }

    pub fn check(&self, chart: &PriceTable) -> Vec<ThresholdBreach> {
        if let Some(smtp) = &self.config.smtp {
            info!(
                "Threshold alerts go to {:?} from {} via {}:{}",
                smtp.toaddr, smtp.fromaddr, smtp.mailhost, smtp.mailport
            );
        }
        check_price_threshold(chart, self.config.price_threshold, self.config.smtp.as_ref())
    }

    pub fn report(&self, processed: &Preprocessed) -> Result<PathBuf> {
        let _t = Timer::start("Workbook");
        ExcelChart {
            chart: &processed.chart,
            tables: &processed.tables,
            start_date: self.config.start_date,
            end_date: self.config.end_date,
            filename: &self.config.chart_name,
            filepath: &self.config.paths.output_dir,
        }
        .run()
        .context("Writing workbook failed")
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    pub files_downloaded: usize,
    pub assets: usize,
    pub chart_rows: usize,
    pub breaching_columns: usize,
    pub workbook: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::test_support::{FakeSource, bar};
    use calamine::{Data, Reader, Xlsx, open_workbook};

    fn config(root: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::from_yaml_str(
            r#"
CHART_NAME: asset_prices
PRICE_THRESHOLD: 100
SEARCH_TERMS: [SHORT, LONG]
START_DATE: 01/01/2021
END_DATE: 31/01/2021
"#,
        )
        .unwrap();
        cfg.paths.raw_csv_dir = root.join("data/raw");
        cfg.paths.output_dir = root.join("data");
        cfg.paths.log_dir = root.join("logs");
        cfg
    }

    #[tokio::test]
    async fn test_end_to_end_two_assets() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .with(
                "SHORT",
                vec![bar("2021-01-05", 10.0), bar("2021-01-06", 5.0)],
            )
            .with(
                "LONG",
                vec![
                    bar("2021-01-04", 50.0),
                    bar("2021-01-05", 100.0),
                    bar("2021-01-06", 75.0),
                    bar("2021-01-07", 25.0),
                ],
            );

        let pipeline = Pipeline::new(config(dir.path()));
        let stats = pipeline.run(&source).await.unwrap();

        assert_eq!(stats.files_downloaded, 2);
        assert_eq!(stats.assets, 2);
        assert_eq!(stats.chart_rows, 4);
        assert_eq!(stats.breaching_columns, 2);
        assert_eq!(stats.workbook, dir.path().join("data/asset_prices.xlsx"));

        let mut wb: Xlsx<_> = open_workbook(&stats.workbook).unwrap();
        let names = wb.sheet_names();
        assert_eq!(names.len(), 5);
        assert_eq!(
            names,
            vec![
                "Chart",
                "LONG raw prices",
                "LONG indexed prices",
                "SHORT raw prices",
                "SHORT indexed prices",
            ]
        );

        let chart = wb.worksheet_range("Chart").unwrap();
        assert_eq!(chart.get_value((0, 1)), Some(&Data::String("Adj Close_LONG".into())));
        assert_eq!(chart.get_value((0, 2)), Some(&Data::String("Adj Close_SHORT".into())));
        // SHORT starts a day later and is back-filled to its baseline.
        assert_eq!(chart.get_value((1, 2)), Some(&Data::Float(100.0)));
        assert_eq!(chart.get_value((4, 2)), Some(&Data::Float(50.0)));

        for row in 1..=4 {
            match chart.get_value((row, 0)) {
                Some(Data::DateTime(dt)) => assert_eq!(dt.as_f64().fract(), 0.0),
                other => panic!("row {row}: expected a date cell, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_build_without_csvs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path()));
        let err = pipeline.build().unwrap_err();
        assert!(format!("{:#}", err).contains("no usable price CSV files"));
        assert!(!dir.path().join("data/asset_prices.xlsx").exists());
    }
}
