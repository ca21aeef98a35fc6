use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Field names of a daily price CSV, in download order (after `Date`).
pub const PRICE_FIELDS: [&str; 6] = ["Open", "High", "Low", "Close", "Adj Close", "Volume"];

/// Field the chart table is restricted to.
pub const ADJ_CLOSE: &str = "Adj Close";

// ── Daily bar (fetcher output) ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

// ── Price table ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self { name: name.into(), values }
    }

    pub fn missing(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Date-indexed table of numeric columns.
///
/// `dates` is ascending with no duplicates and every column holds exactly one
/// value per date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    columns: Vec<Column>,
}

impl PriceTable {
    /// Build a table, enforcing the index and shape invariants.
    pub fn new(dates: Vec<NaiveDate>, columns: Vec<Column>) -> Result<Self, TableError> {
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(TableError::UnorderedIndex(w[1]));
        }
        if let Some(col) = columns.iter().find(|c| c.values.len() != dates.len()) {
            return Err(TableError::LengthMismatch {
                column: col.name.clone(),
                expected: dates.len(),
                found: col.values.len(),
            });
        }
        Ok(Self { dates, columns })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[cfg(test)]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.dates.first()?, *self.dates.last()?))
    }

    /// Append `_<suffix>` to every column name.
    pub fn rename_columns(mut self, suffix: &str) -> Self {
        for col in &mut self.columns {
            col.name = format!("{}_{}", col.name, suffix);
        }
        self
    }

    /// Keep only the columns whose name starts with `prefix`.
    pub fn select_prefix(mut self, prefix: &str) -> Self {
        self.columns.retain(|c| c.name.starts_with(prefix));
        self
    }

    /// Outer-join tables on their date index.
    ///
    /// The result index is the sorted union of all dates; columns keep the
    /// order of `tables`, left to right.
    pub fn merge_outer<'a>(tables: impl IntoIterator<Item = &'a PriceTable>) -> PriceTable {
        let tables: Vec<&PriceTable> = tables.into_iter().collect();

        let union: BTreeSet<NaiveDate> = tables
            .iter()
            .flat_map(|t| t.dates.iter().copied())
            .collect();
        let dates: Vec<NaiveDate> = union.into_iter().collect();

        let mut columns = Vec::new();
        for table in &tables {
            // Both indexes are sorted, so a single forward walk aligns them.
            let mut positions = Vec::with_capacity(dates.len());
            let mut j = 0;
            for date in &dates {
                while j < table.dates.len() && table.dates[j] < *date {
                    j += 1;
                }
                positions.push((j < table.dates.len() && table.dates[j] == *date).then_some(j));
            }

            for col in &table.columns {
                let values = positions
                    .iter()
                    .map(|p| p.and_then(|j| col.values[j]))
                    .collect();
                columns.push(Column::new(col.name.clone(), values));
            }
        }

        PriceTable { dates, columns }
    }

    /// Apply `f` to every column, keeping the index.
    pub fn map_columns(&self, f: impl FnMut(&Column) -> Column) -> PriceTable {
        PriceTable {
            dates: self.dates.clone(),
            columns: self.columns.iter().map(f).collect(),
        }
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    /// Missing value count per column, for logging.
    pub fn missing_counts(&self) -> Vec<(&str, usize)> {
        self.columns.iter().map(|c| (c.name.as_str(), c.missing())).collect()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TableError {
    #[error("date index is not strictly ascending at {0}")]
    UnorderedIndex(NaiveDate),

    #[error("column {column} has {found} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
}

// ── Named tables ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Raw,
    Indexed,
}

impl TableKind {
    fn label_suffix(self) -> &'static str {
        match self {
            TableKind::Raw => "raw prices",
            TableKind::Indexed => "indexed prices",
        }
    }
}

/// A table carried together with its display label.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTable {
    pub label: String,
    pub asset: String,
    pub kind: TableKind,
    pub table: PriceTable,
}

impl NamedTable {
    pub fn new(asset: &str, kind: TableKind, table: PriceTable) -> Self {
        Self {
            label: format!("{} {}", asset, kind.label_suffix()),
            asset: asset.to_string(),
            kind,
            table,
        }
    }
}

// ── Threshold breach ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdBreach {
    pub column: String,
    pub rows: Vec<usize>,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}
