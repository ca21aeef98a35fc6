//! Turns a folder of price CSVs into chart-ready tables.
//!
//! For each file: load → rename columns with the asset suffix → index to the
//! first row (= 100) → tag raw and indexed tables. The indexed tables are then
//! outer-joined on date (longest history leftmost), cut down to the
//! adjusted-close columns and gap-filled.

use crate::loader::{asset_name, discover_csv_files, load_price_csv};
use crate::models::{ADJ_CLOSE, Column, NamedTable, PriceTable, TableError, TableKind};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path:?}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Date column not present in {path:?}")]
    MissingDateColumn { path: PathBuf },

    #[error("{path:?} row {row}: date {value:?} is not YYYY-MM-DD")]
    InvalidDate {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("{path:?} row {row}: {column} value {value:?} is not a number")]
    InvalidNumber {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },

    #[error("{path:?}: date {date} appears more than once")]
    DuplicateDate { path: PathBuf, date: NaiveDate },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("no usable price CSV files in {dir:?}")]
    NoPriceData { dir: PathBuf },
}

/// Output of [`Preprocessor::run`].
#[derive(Debug)]
pub struct Preprocessed {
    /// Raw and indexed table per asset, interleaved in scan order.
    pub tables: Vec<NamedTable>,
    /// Merged, gap-filled adjusted-close columns of every indexed table.
    pub chart: PriceTable,
}

pub struct Preprocessor {
    folder_dir: PathBuf,
    crypto_tags: Vec<String>,
}

impl Preprocessor {
    pub fn new(folder_dir: impl Into<PathBuf>, crypto_tags: Vec<String>) -> Self {
        Self {
            folder_dir: folder_dir.into(),
            crypto_tags,
        }
    }

    pub fn run(&self) -> Result<Preprocessed, PreprocessError> {
        let files = discover_csv_files(&self.folder_dir)?;
        info!("Found {} CSV files in {:?}", files.len(), self.folder_dir);

        let mut tables = Vec::with_capacity(files.len() * 2);
        for path in &files {
            if let Some((raw, indexed)) = self.process_file(path)? {
                tables.push(raw);
                tables.push(indexed);
            }
        }

        if tables.is_empty() {
            return Err(PreprocessError::NoPriceData {
                dir: self.folder_dir.clone(),
            });
        }
        debug!(
            "Tables: {:?}",
            tables.iter().map(|t| t.label.as_str()).collect::<Vec<_>>()
        );

        let indexed = indexed_tables(&tables);
        let merged = PriceTable::merge_outer(indexed.iter().map(|t| &t.table));
        debug!(
            "Combined indexed table: {} rows, columns {:?}",
            merged.len(),
            merged.column_names()
        );

        let mut chart = merged.select_prefix(ADJ_CLOSE);
        fill_gaps(&mut chart, &self.crypto_tags);

        Ok(Preprocessed { tables, chart })
    }

    /// Load one file into its raw and indexed named tables.
    ///
    /// A file without a `Date` column is logged and skipped; any other load
    /// error aborts the run.
    fn process_file(
        &self,
        path: &Path,
    ) -> Result<Option<(NamedTable, NamedTable)>, PreprocessError> {
        let Some(asset) = asset_name(path) else {
            warn!("Cannot derive an asset name from {:?}, skipping", path);
            return Ok(None);
        };

        let table = match load_price_csv(path) {
            Ok(t) => t,
            Err(e @ PreprocessError::MissingDateColumn { .. }) => {
                error!("{} - please check the raw csv file manually, skipping it", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some((from, to)) = table.date_range() {
            debug!("Date range for {}: {} to {}", asset, from, to);
        } else {
            warn!("{}: no rows", asset);
        }

        let raw = table.rename_columns(&asset);
        let indexed = index_prices(&raw);

        Ok(Some((
            NamedTable::new(&asset, TableKind::Raw, raw),
            NamedTable::new(&asset, TableKind::Indexed, indexed),
        )))
    }
}

/// Divide every column by its first value and scale by 100.
///
/// Row 0 of every indexed column is exactly 100. A column whose first value
/// is missing or zero has no baseline and becomes all-missing.
pub fn index_prices(table: &PriceTable) -> PriceTable {
    table.map_columns(|col| match col.values.first().copied().flatten() {
        Some(base) if base != 0.0 => Column::new(
            col.name.clone(),
            col.values.iter().map(|v| v.map(|v| v / base * 100.0)).collect(),
        ),
        _ => {
            warn!("{}: no baseline value on the first date, column left empty", col.name);
            Column::new(col.name.clone(), vec![None; col.values.len()])
        }
    })
}

/// Indexed tables only, longest first. Equal lengths keep their input order.
pub fn indexed_tables(tables: &[NamedTable]) -> Vec<&NamedTable> {
    let mut indexed: Vec<&NamedTable> = tables
        .iter()
        .filter(|t| t.kind == TableKind::Indexed)
        .collect();
    indexed.sort_by(|a, b| b.table.len().cmp(&a.table.len()));
    indexed
}

/// Columns whose name contains any of `tags` are treated as crypto assets.
pub fn is_crypto(column: &str, tags: &[String]) -> bool {
    tags.iter().any(|t| column.contains(t.as_str()))
}

fn forward_fill(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }
}

fn back_fill(values: &mut [Option<f64>]) {
    let mut next = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
}

/// Fill non-trading-day gaps: forward-fill, then back-fill the leading rows.
///
/// Crypto columns are left untouched; their gaps stay missing.
pub fn fill_gaps(table: &mut PriceTable, crypto_tags: &[String]) {
    info!("Missing values per column: {:?}", table.missing_counts());

    for col in fill_targets(table, crypto_tags) {
        forward_fill(&mut col.values);
    }
    info!(
        "Missing values per column after forward fill: {:?}",
        table.missing_counts()
    );

    for col in fill_targets(table, crypto_tags) {
        back_fill(&mut col.values);
    }
    info!(
        "Missing values per column after back fill: {:?}",
        table.missing_counts()
    );
}

fn fill_targets<'a>(
    table: &'a mut PriceTable,
    crypto_tags: &'a [String],
) -> impl Iterator<Item = &'a mut Column> {
    table
        .columns_mut()
        .iter_mut()
        .filter(move |c| !is_crypto(&c.name, crypto_tags))
}
