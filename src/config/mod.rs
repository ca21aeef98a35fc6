use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::utils::parse_dmy;

/// Validated application configuration.
///
/// Built once per run by [`AppConfig::load`]; every required field has been
/// checked by the time a value of this type exists.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chart_name: String,
    pub price_threshold: f64,
    pub search_terms: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub smtp: Option<SmtpConfig>,
    pub crypto_tags: Vec<String>,
    pub paths: PathsConfig,
    pub fetcher: FetcherConfig,
}

/// Mail settings read by the alerting side. Delivery happens outside this crate.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SmtpConfig {
    pub mailhost: String,
    pub mailport: u16,
    pub fromaddr: String,
    #[serde(default)]
    pub toaddr: Vec<String>,
}

/// File-system layout
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_raw_csv_dir")]
    pub raw_csv_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// Price download settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FetcherConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Shape of the configuration sources before validation. Keys are accepted
/// upper-case (YAML file) or lower-case (environment overrides).
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(alias = "CHART_NAME")]
    chart_name: String,

    #[serde(alias = "PRICE_THRESHOLD")]
    price_threshold: f64,

    #[serde(alias = "SEARCH_TERMS")]
    search_terms: Vec<String>,

    #[serde(alias = "START_DATE")]
    start_date: String,

    #[serde(alias = "END_DATE", default)]
    end_date: Option<String>,

    #[serde(alias = "SMTP", default)]
    smtp: Option<SmtpConfig>,

    #[serde(alias = "CRYPTO_TAGS", default = "default_crypto_tags")]
    crypto_tags: Vec<String>,

    #[serde(alias = "PATHS", default)]
    paths: PathsConfig,

    #[serde(alias = "FETCHER", default)]
    fetcher: FetcherConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field}: invalid date {value:?}, expected DD/MM/YYYY")]
    InvalidDate { field: &'static str, value: String },

    #[error("END_DATE {end} is before START_DATE {start}")]
    DateOrder { start: NaiveDate, end: NaiveDate },

    #[error("PRICE_THRESHOLD must be a finite number, got {0}")]
    InvalidThreshold(f64),
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_crypto_tags() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}
fn default_raw_csv_dir() -> PathBuf {
    PathBuf::from("data/raw")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_base_url() -> String {
    "https://query2.finance.yahoo.com/v8/finance/chart".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    1000
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_csv_dir: default_raw_csv_dir(),
            output_dir: default_output_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// File keys keep their case while environment keys arrive lower-cased, so
/// `PRICE_THRESHOLD` and `price_threshold` can both be present. Fold the top
/// level to lower case; on a clash the lower-case key wins and tables merge.
fn lowercase_keys(map: config::Map<String, config::Value>) -> config::Map<String, config::Value> {
    let (lower, other): (Vec<_>, Vec<_>) =
        map.into_iter().partition(|(k, _)| *k == k.to_lowercase());

    let mut out = config::Map::new();
    for (key, value) in other.into_iter().chain(lower) {
        let key = key.to_lowercase();
        let value = match out.remove(&key) {
            Some(prev) => merge_values(prev, value),
            None => value,
        };
        out.insert(key, value);
    }
    out
}

fn merge_values(base: config::Value, over: config::Value) -> config::Value {
    match (base.into_table(), over.clone().into_table()) {
        (Ok(mut table), Ok(top)) => {
            table.extend(top);
            config::Value::new(None, table)
        }
        _ => over,
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides.
    ///
    /// `path` replaces the default `config/config.yml`; `config/local.yml` and
    /// `ASSETCHART__*` variables are layered on top either way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::load_layers(path, None)
    }

    /// `env` stands in for the process environment when given.
    fn load_layers(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let main = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("config/config")
                .format(config::FileFormat::Yaml)
                .required(true),
        };

        let builder = config::Config::builder()
            .add_source(main)
            .add_source(
                config::File::with_name("config/local")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("ASSETCHART")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            );

        Self::from_builder(builder)
    }

    /// Load configuration from an in-memory YAML document, without file or
    /// environment layers.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml));
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let layered: config::Map<String, config::Value> = builder.build()?.try_deserialize()?;
        let raw: RawConfig =
            config::Value::new(None, lowercase_keys(layered)).try_deserialize()?;
        Self::validate(raw, Local::now().date_naive())
    }

    fn validate(raw: RawConfig, today: NaiveDate) -> Result<Self, ConfigError> {
        let chart_name = raw.chart_name.trim().to_string();
        if chart_name.is_empty() {
            return Err(ConfigError::Empty { field: "CHART_NAME" });
        }

        if !raw.price_threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(raw.price_threshold));
        }

        let search_terms: Vec<String> = raw
            .search_terms
            .iter()
            .map(|t| t.trim().to_string())
            .collect();
        if search_terms.is_empty() || search_terms.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::Empty { field: "SEARCH_TERMS" });
        }

        let start_date = parse_dmy(&raw.start_date).ok_or_else(|| ConfigError::InvalidDate {
            field: "START_DATE",
            value: raw.start_date.clone(),
        })?;

        let end_date = match raw.end_date.as_deref() {
            Some(s) => parse_dmy(s).ok_or_else(|| ConfigError::InvalidDate {
                field: "END_DATE",
                value: s.to_string(),
            })?,
            None => today,
        };

        if end_date < start_date {
            return Err(ConfigError::DateOrder {
                start: start_date,
                end: end_date,
            });
        }

        Ok(Self {
            chart_name,
            price_threshold: raw.price_threshold,
            search_terms,
            start_date,
            end_date,
            smtp: raw.smtp,
            crypto_tags: raw.crypto_tags,
            paths: raw.paths,
            fetcher: raw.fetcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
CHART_NAME: asset_prices
PRICE_THRESHOLD: 90
SEARCH_TERMS:
  - ES3.SI
  - BTC-USD
START_DATE: 01/01/2021
END_DATE: 31/12/2021
SMTP:
  mailhost: localhost
  mailport: 1025
  fromaddr: me@example.com
  toaddr:
    - me@example.com
"#;

    #[test]
    fn test_loads_upper_case_keys() {
        let cfg = AppConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.chart_name, "asset_prices");
        assert_eq!(cfg.price_threshold, 90.0);
        assert_eq!(cfg.search_terms, vec!["ES3.SI", "BTC-USD"]);
        assert_eq!(cfg.start_date, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(cfg.end_date, NaiveDate::from_ymd_opt(2021, 12, 31).unwrap());
        assert_eq!(cfg.smtp.unwrap().mailport, 1025);
        assert_eq!(cfg.crypto_tags, vec!["BTC", "ETH"]);
        assert_eq!(cfg.paths, PathsConfig::default());
    }

    #[test]
    fn test_env_overrides_upper_case_file_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, YAML).unwrap();

        let env: config::Map<String, String> = [
            ("ASSETCHART__PRICE_THRESHOLD", "50"),
            ("ASSETCHART__SMTP__MAILPORT", "2525"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cfg = AppConfig::load_layers(Some(&path), Some(env)).unwrap();
        assert_eq!(cfg.price_threshold, 50.0);
        assert_eq!(cfg.chart_name, "asset_prices");
        let smtp = cfg.smtp.unwrap();
        assert_eq!(smtp.mailport, 2525);
        assert_eq!(smtp.mailhost, "localhost");
    }

    #[test]
    fn test_missing_required_field_fails() {
        let yaml = YAML.replace("CHART_NAME: asset_prices\n", "");
        assert!(matches!(
            AppConfig::from_yaml_str(&yaml),
            Err(ConfigError::Source(_))
        ));
    }

    #[test]
    fn test_end_date_defaults_to_today() {
        let raw = RawConfig {
            chart_name: "c".into(),
            price_threshold: 100.0,
            search_terms: vec!["SPY".into()],
            start_date: "04/01/2021".into(),
            end_date: None,
            smtp: None,
            crypto_tags: default_crypto_tags(),
            paths: PathsConfig::default(),
            fetcher: FetcherConfig::default(),
        };
        let today = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        let cfg = AppConfig::validate(raw, today).unwrap();
        assert_eq!(cfg.end_date, today);
    }

    #[test]
    fn test_rejects_bad_dates() {
        let yaml = YAML.replace("START_DATE: 01/01/2021", "START_DATE: 2021-01-01");
        assert!(matches!(
            AppConfig::from_yaml_str(&yaml),
            Err(ConfigError::InvalidDate { field: "START_DATE", .. })
        ));

        let yaml = YAML.replace("END_DATE: 31/12/2021", "END_DATE: 31/12/2020");
        assert!(matches!(
            AppConfig::from_yaml_str(&yaml),
            Err(ConfigError::DateOrder { .. })
        ));
    }

    #[test]
    fn test_rejects_blank_search_term() {
        let yaml = YAML.replace("  - BTC-USD", "  - \" \"");
        assert!(matches!(
            AppConfig::from_yaml_str(&yaml),
            Err(ConfigError::Empty { field: "SEARCH_TERMS" })
        ));
    }
}
