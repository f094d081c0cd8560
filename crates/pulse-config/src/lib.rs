use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickHouseConfig {
    #[serde(default = "default_ch_url")]
    pub url: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

/// How conflicting demographic values from the feed and message tables are
/// reconciled for a user who appears in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemographicPolicy {
    /// Larger of the two values; the historical behaviour of the job.
    #[default]
    Greatest,
    PreferFeed,
    PreferMessages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Delete the run's date from the report table before inserting.
    #[default]
    Replace,
    Append,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Replace => f.write_str("replace"),
            LoadMode::Append => f.write_str("append"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub source_schema: String,
    #[serde(default = "default_report_table")]
    pub report_table: String,
    #[serde(default)]
    pub demographic_policy: DemographicPolicy,
    #[serde(default)]
    pub load_mode: LoadMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub source: ClickHouseConfig,
    #[serde(default)]
    pub destination: ClickHouseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_ch_url(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_schema: String::new(),
            report_table: default_report_table(),
            demographic_policy: DemographicPolicy::default(),
            load_mode: LoadMode::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: ClickHouseConfig::default(),
            destination: ClickHouseConfig::default(),
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

fn default_ch_url() -> String {
    "http://127.0.0.1:8123".to_string()
}

fn default_timeout_seconds() -> f64 {
    300.0
}

fn default_report_table() -> String {
    "actions_gender_age_os".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> f64 {
    600.0
}

pub fn expand_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), stripped);
        }
    }
    path.to_string()
}

fn home_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".pulse").join("config.toml"))
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/pulse.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_keys: &[&str],
    home_path: Option<PathBuf>,
    repo_default: PathBuf,
) -> PathBuf {
    if let Some(path) = raw_path {
        return PathBuf::from(expand_path(&path.to_string_lossy()));
    }

    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(expand_path(trimmed));
            }
        }
    }

    if let Some(path) = home_path {
        if path.exists() {
            return path;
        }
    }

    repo_default
}

pub fn resolve_config_path(raw_path: Option<PathBuf>) -> PathBuf {
    resolve_config_path_with_overrides(
        raw_path,
        &["PULSE_CONFIG"],
        home_config_path(),
        repo_default_config_path(),
    )
}

/// Connection secrets are never read from the config file alone; the
/// environment wins whenever a variable is set and non-empty.
fn apply_secret_overrides(cfg: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(user) = non_empty("PULSE_SOURCE_USER") {
        cfg.source.username = user;
    }
    if let Some(password) = non_empty("PULSE_SOURCE_PASSWORD") {
        cfg.source.password = password;
    }
    if let Some(user) = non_empty("PULSE_DESTINATION_USER") {
        cfg.destination.username = user;
    }
    if let Some(password) = non_empty("PULSE_DESTINATION_PASSWORD") {
        cfg.destination.password = password;
    }
}

/// Database, schema and table names are spliced into SQL, so only plain
/// `[A-Za-z0-9_]` identifiers are accepted.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        bail!("identifier must not be empty");
    }

    let ok = identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        bail!("identifier contains unsupported characters: {identifier}");
    }

    Ok(())
}

fn validate_connection(section: &str, cfg: &ClickHouseConfig) -> Result<()> {
    if cfg.url.trim().is_empty() {
        bail!("[{section}] url must not be empty");
    }
    validate_identifier(&cfg.database).with_context(|| {
        format!(
            "[{section}] database must be a plain identifier, got {:?}",
            cfg.database
        )
    })?;
    if cfg.timeout_seconds <= 0.0 || !cfg.timeout_seconds.is_finite() {
        bail!("[{section}] timeout_seconds must be positive");
    }
    Ok(())
}

pub fn validate_config(cfg: &AppConfig) -> Result<()> {
    validate_connection("source", &cfg.source)?;
    validate_connection("destination", &cfg.destination)?;

    validate_identifier(&cfg.pipeline.source_schema).with_context(|| {
        format!(
            "[pipeline] source_schema must be a plain identifier, got {:?}",
            cfg.pipeline.source_schema
        )
    })?;
    validate_identifier(&cfg.pipeline.report_table).with_context(|| {
        format!(
            "[pipeline] report_table must be a plain identifier, got {:?}",
            cfg.pipeline.report_table
        )
    })?;
    if cfg.retry.retry_delay_seconds < 0.0 || !cfg.retry.retry_delay_seconds.is_finite() {
        bail!("[retry] retry_delay_seconds must be a non-negative number");
    }
    if cfg.schedule.hour > 23 || cfg.schedule.minute > 59 {
        bail!(
            "[schedule] {:02}:{:02} is not a valid time of day",
            cfg.schedule.hour,
            cfg.schedule.minute
        );
    }

    Ok(())
}

fn load_config_with_env(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut cfg: AppConfig = toml::from_str(&content).context("failed to parse TOML config")?;
    apply_secret_overrides(&mut cfg, lookup);
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    load_config_with_env(path.as_ref(), |key| std::env::var(key).ok())
}
