//! Excel workbook output: a chart sheet followed by one sheet per named table.

use crate::loader::DATE_COLUMN;
use crate::models::{NamedTable, PriceTable};
use crate::utils::display_date;
use chrono::{Datelike, NaiveDate};
use rust_xlsxwriter::{
    Chart, ChartAxisDateUnitType, ChartType, ExcelDateTime, Format, FormatAlign, FormatBorder,
    Workbook, Worksheet, XlsxError,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CHART_SHEET: &str = "Chart";

const MAX_SHEET_NAME: usize = 31;
const MAX_ROWS: usize = 1_048_575;
const MAX_COLS: usize = 16_383;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Xlsx(#[from] XlsxError),

    #[error("cannot create output dir {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("table {label:?} does not fit a worksheet ({rows} rows x {cols} columns)")]
    TooLarge {
        label: String,
        rows: usize,
        cols: usize,
    },
}

pub struct ExcelChart<'a> {
    pub chart: &'a PriceTable,
    pub tables: &'a [NamedTable],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub filename: &'a str,
    pub filepath: &'a Path,
}

impl ExcelChart<'_> {
    pub fn output_path(&self) -> PathBuf {
        self.filepath.join(format!("{}.xlsx", self.filename))
    }

    /// Build the workbook and save it, replacing any existing file.
    pub fn run(&self) -> Result<PathBuf, ReportError> {
        let mut workbook = self.build()?;

        std::fs::create_dir_all(self.filepath).map_err(|source| ReportError::Io {
            path: self.filepath.to_path_buf(),
            source,
        })?;

        let path = self.output_path();
        workbook.save(&path)?;
        info!("Saved {:?}", path);
        Ok(path)
    }

    /// Assemble the whole workbook in memory.
    pub fn build(&self) -> Result<Workbook, ReportError> {
        let header = Format::new()
            .set_bold()
            .set_align(FormatAlign::Center)
            .set_border(FormatBorder::Thin);
        let date_format = Format::new().set_num_format("yyyy-mm-dd");

        let mut workbook = Workbook::new();
        let mut used = HashSet::new();

        let sheet = workbook.add_worksheet();
        sheet.set_name(CHART_SHEET)?;
        used.insert(CHART_SHEET.to_lowercase());
        write_table(sheet, CHART_SHEET, self.chart, &header, &date_format)?;

        if self.chart.is_empty() || self.chart.columns().is_empty() {
            warn!("Chart table is empty, workbook will have no line chart");
        } else {
            let chart = self.line_chart();
            let anchor_col = (self.chart.columns().len() + 2).max(6) as u16;
            sheet.insert_chart(2, anchor_col, &chart)?;
        }

        for named in self.tables {
            let name = sheet_name(&named.label, &mut used);
            debug!("Writing sheet {:?} ({} rows)", name, named.table.len());

            let sheet = workbook.add_worksheet();
            sheet.set_name(&name)?;
            write_table(sheet, &named.label, &named.table, &header, &date_format)?;
        }

        Ok(workbook)
    }

    fn line_chart(&self) -> Chart {
        let start = display_date(self.start_date);
        let end = display_date(self.end_date);
        let last_row = self.chart.len() as u32;

        let mut chart = Chart::new(ChartType::Line);
        chart.set_style(2);
        chart.set_width(945).set_height(529);

        for c in 1..=self.chart.columns().len() as u16 {
            chart
                .add_series()
                .set_name((CHART_SHEET, 0, c))
                .set_categories((CHART_SHEET, 1, 0, last_row, 0))
                .set_values((CHART_SHEET, 1, c, last_row, c));
        }

        let title = format!("Indexed price history ({start} - {end})");
        let y_title = format!("Change in asset price relative to reference value on {start}");

        chart.title().set_name(title.as_str());
        chart.y_axis().set_name(y_title.as_str());
        chart
            .x_axis()
            .set_name("Date")
            .set_date_axis(true)
            .set_num_format("mmm-yy")
            .set_major_unit(1)
            .set_major_unit_date_type(ChartAxisDateUnitType::Months);

        chart
    }
}

/// Write `table` with its date index as column A and a styled header row.
/// Missing values are left as blank cells.
fn write_table(
    sheet: &mut Worksheet,
    label: &str,
    table: &PriceTable,
    header: &Format,
    date_format: &Format,
) -> Result<(), ReportError> {
    if table.len() > MAX_ROWS || table.columns().len() > MAX_COLS {
        return Err(ReportError::TooLarge {
            label: label.to_string(),
            rows: table.len(),
            cols: table.columns().len() + 1,
        });
    }

    sheet.write_string_with_format(0, 0, DATE_COLUMN, header)?;
    for (c, col) in table.columns().iter().enumerate() {
        sheet.write_string_with_format(0, c as u16 + 1, &col.name, header)?;
    }

    for (r, date) in table.dates().iter().enumerate() {
        let row = r as u32 + 1;
        sheet.write_datetime_with_format(row, 0, &excel_date(*date)?, date_format)?;

        for (c, col) in table.columns().iter().enumerate() {
            if let Some(v) = col.values[r] {
                sheet.write_number(row, c as u16 + 1, v)?;
            }
        }
    }

    sheet.set_column_width(0, 12)?;
    Ok(())
}

/// Calendar date as an Excel serial date with no time part.
fn excel_date(date: NaiveDate) -> Result<ExcelDateTime, XlsxError> {
    ExcelDateTime::from_ymd(date.year() as u16, date.month() as u8, date.day() as u8)
}

/// Make `label` a legal, unique worksheet name: no `[]:*?/\`, at most 31
/// characters, unique ignoring case.
fn sheet_name(label: &str, used: &mut HashSet<String>) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if "[]:*?/\\".contains(c) { '_' } else { c })
        .collect();
    let cut: String = cleaned
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME)
        .collect();
    // Excel rejects names that start or end with an apostrophe.
    let base = match cut.trim_matches('\'') {
        "" => "Sheet",
        s => s,
    };

    let mut name = base.to_string();
    let mut n = 2;
    while used.contains(&name.to_lowercase()) {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME - suffix.chars().count();
        let head: String = base.chars().take(keep).collect();
        name = head.trim_end_matches('\'').to_string() + &suffix;
        n += 1;
    }

    used.insert(name.to_lowercase());
    name
}
