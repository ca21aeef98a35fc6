//! Threshold checks over the chart table.
//!
//! Breaches are emitted as WARN events on the `alert` target; whatever
//! subscriber forwards alerts (mail, chat) keys off that target.

use crate::config::SmtpConfig;
use crate::models::{PriceTable, ThresholdBreach};
use tracing::{debug, warn};

/// Rows of every column whose value is strictly below `threshold`.
///
/// Missing values never breach. Columns are checked independently and only
/// columns with at least one breach are returned.
pub fn find_breaches(table: &PriceTable, threshold: f64) -> Vec<ThresholdBreach> {
    table
        .columns()
        .iter()
        .filter_map(|col| {
            let rows: Vec<usize> = col
                .values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_some_and(|v| v < threshold))
                .map(|(i, _)| i)
                .collect();

            if rows.is_empty() {
                return None;
            }

            Some(ThresholdBreach {
                column: col.name.clone(),
                dates: rows.iter().map(|&i| table.dates()[i]).collect(),
                values: rows.iter().filter_map(|&i| col.values[i]).collect(),
                rows,
            })
        })
        .collect()
}

/// Check the chart table and raise one warning per breaching column.
pub fn check_price_threshold(
    table: &PriceTable,
    threshold: f64,
    smtp: Option<&SmtpConfig>,
) -> Vec<ThresholdBreach> {
    let breaches = find_breaches(table, threshold);
    let recipients = smtp.map(|s| s.toaddr.join(", ")).unwrap_or_default();

    for breach in &breaches {
        let dates: Vec<String> = breach.dates.iter().map(|d| d.to_string()).collect();
        warn!(
            target: "alert",
            column = %breach.column,
            threshold,
            rows = ?breach.rows,
            dates = ?dates,
            values = ?breach.values,
            recipients = %recipients,
            "Indexed price for {} was less than {} threshold on {} dates. \
             Consider reviewing financial portfolio.",
            breach.column,
            threshold,
            breach.dates.len(),
        );
    }

    if breaches.is_empty() {
        debug!("No value under the {} threshold", threshold);
    }
    breaches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{day, table};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a subscriber that keeps only `alert` events and return
    /// the formatted lines.
    fn alert_lines(f: impl FnOnce()) -> Vec<String> {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_env_filter("alert=warn")
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_two_breaches_reported() {
        let t = table(
            &["2021-01-04", "2021-01-05", "2021-01-06"],
            vec![("Adj Close_SPY", vec![Some(120.0), Some(95.0), Some(80.0)])],
        );

        let breaches = check_price_threshold(&t, 100.0, None);
        assert_eq!(breaches.len(), 1);
        let b = &breaches[0];
        assert_eq!(b.column, "Adj Close_SPY");
        assert_eq!(b.rows, vec![1, 2]);
        assert_eq!(b.dates, vec![day("2021-01-05"), day("2021-01-06")]);
        assert_eq!(b.values, vec![95.0, 80.0]);
    }

    #[test]
    fn test_threshold_is_strict_and_ignores_gaps() {
        let t = table(
            &["2021-01-04", "2021-01-05", "2021-01-06"],
            vec![
                ("A", vec![Some(100.0), None, Some(101.0)]),
                ("B", vec![None, Some(99.9), None]),
            ],
        );

        let breaches = find_breaches(&t, 100.0);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].column, "B");
        assert_eq!(breaches[0].rows, vec![1]);
    }

    #[test]
    fn test_one_alert_event_per_breaching_column() {
        let t = table(
            &["2021-01-04", "2021-01-05", "2021-01-06"],
            vec![
                ("Adj Close_SPY", vec![Some(120.0), Some(95.0), Some(80.0)]),
                ("Adj Close_AAA", vec![Some(100.0), Some(101.0), Some(102.0)]),
                ("Adj Close_BTC-USD", vec![Some(100.0), None, Some(70.0)]),
            ],
        );

        let lines = alert_lines(|| {
            check_price_threshold(&t, 100.0, None);
        });
        assert_eq!(lines.len(), 2, "{lines:#?}");
        assert!(lines.iter().all(|l| l.contains("WARN")));

        let spy = lines.iter().find(|l| l.contains("Adj Close_SPY")).unwrap();
        assert!(spy.contains("2021-01-05"));
        assert!(spy.contains("2021-01-06"));
        assert!(!spy.contains("2021-01-04"));

        let btc = lines.iter().find(|l| l.contains("Adj Close_BTC-USD")).unwrap();
        assert!(btc.contains("2021-01-06"));
        assert!(!lines.iter().any(|l| l.contains("Adj Close_AAA")));
    }

    #[test]
    fn test_no_alert_event_without_breach() {
        let t = table(
            &["2021-01-04", "2021-01-05"],
            vec![("Adj Close_SPY", vec![Some(100.0), Some(130.0)])],
        );

        let lines = alert_lines(|| {
            check_price_threshold(&t, 100.0, None);
        });
        assert!(lines.is_empty(), "{lines:#?}");
    }
}
