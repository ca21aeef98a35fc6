//! CSV loader for daily price files (Date, Open, High, Low, Close, Adj Close, Volume).

use crate::models::{Column, PriceTable};
use crate::preprocess::PreprocessError;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the column that becomes the row index.
pub const DATE_COLUMN: &str = "Date";

/// Asset identifier for a CSV file: its base name without extension.
/// `data/raw/BTC-USD.csv` → `BTC-USD`
pub fn asset_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.trim();
    if stem.is_empty() { None } else { Some(stem.to_string()) }
}

/// All `*.csv` files directly under `dir`, sorted by file name.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>, PreprocessError> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let io_err = |source| PreprocessError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().map(|e| e == "csv").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    debug!("CSV files in {:?}: {:?}", dir, files);
    Ok(files)
}

/// `null`, `NaN` and empty cells are missing values. Anything else must be
/// a finite number; `inf` is rejected like any other non-number.
fn parse_cell(s: &str) -> Result<Option<f64>, ()> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(()),
    }
}

/// Parse one price CSV into a [`PriceTable`] indexed by its `Date` column.
///
/// Dates must be `YYYY-MM-DD`. Rows are sorted ascending; a repeated date
/// is an error.
pub fn load_price_csv(path: &Path) -> Result<PriceTable, PreprocessError> {
    let csv_err = |source| PreprocessError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    let date_idx = headers
        .iter()
        .position(|h| h == DATE_COLUMN)
        .ok_or_else(|| PreprocessError::MissingDateColumn {
            path: path.to_path_buf(),
        })?;

    let value_cols: Vec<(usize, &str)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_idx)
        .collect();

    let mut rows: Vec<(NaiveDate, Vec<Option<f64>>)> = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(csv_err)?;
        let row = i + 1;

        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|_| {
            PreprocessError::InvalidDate {
                path: path.to_path_buf(),
                row,
                value: raw_date.to_string(),
            }
        })?;

        let values = value_cols
            .iter()
            .map(|(idx, name)| {
                let cell = record.get(*idx).unwrap_or_default();
                parse_cell(cell).map_err(|_| PreprocessError::InvalidNumber {
                    path: path.to_path_buf(),
                    row,
                    column: name.to_string(),
                    value: cell.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        rows.push((date, values));
    }

    rows.sort_by_key(|(date, _)| *date);
    if let Some(w) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(PreprocessError::DuplicateDate {
            path: path.to_path_buf(),
            date: w[0].0,
        });
    }

    let dates: Vec<NaiveDate> = rows.iter().map(|(d, _)| *d).collect();
    let columns = value_cols
        .iter()
        .enumerate()
        .map(|(c, (_, name))| Column::new(*name, rows.iter().map(|(_, v)| v[c]).collect()))
        .collect();

    let table = PriceTable::new(dates, columns)?;
    info!("{:?}: {} rows loaded", path.file_name().unwrap_or_default(), table.len());
    Ok(table)
}
