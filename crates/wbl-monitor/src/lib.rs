//! Wideband Monitor
//!
//! Configuration, logging and snapshot output for the `wbl-monitor` binary.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;
use wbl_protocol::{Reading, Vendor};
use wbl_provider::{LambdaProvider, ProviderState, WblConfig};

/// Configuration file read when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "wbl-monitor.toml";

/// Prefix of environment overrides, e.g. `WBL_PROVIDER__VENDOR`
pub const ENV_PREFIX: &str = "WBL";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Snapshot output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The provider's `describe()` text
    Text,
    /// One JSON object per line
    Json,
}

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// trace, debug, info, warn or error
    pub log_level: String,
    pub log_format: LogFormat,
    /// Snapshot interval (ms)
    pub interval_ms: u64,
    pub output: OutputFormat,
    /// Wideband provider
    pub provider: WblConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            interval_ms: 500,
            output: OutputFormat::Text,
            provider: WblConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load from an optional TOML file, then `WBL_*` environment variables.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Self::from_builder(Config::builder().add_source(file))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// Install the global tracing subscriber
pub fn init_logging(level: &str, format: LogFormat) {
    let max_level = Level::from_str(level).unwrap_or(Level::INFO);
    let installed = match format {
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(max_level)
                .with_target(true)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .json()
                .with_max_level(max_level)
                .with_target(true)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }
    if Level::from_str(level).is_err() {
        warn!("unknown log level {:?}, using info", level);
    }
}

/// One line of JSON output
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub vendor: Vendor,
    pub state: &'static str,
    pub lambda: f64,
    /// Milliseconds since the last update, `None` before the first frame
    pub age_ms: Option<u64>,
    pub reading: Reading,
}

impl Snapshot {
    pub fn capture(provider: &dyn LambdaProvider) -> Self {
        let reading = provider.reading();
        Self {
            vendor: provider.vendor(),
            state: match provider.state() {
                ProviderState::Unstarted => "unstarted",
                ProviderState::Running => "running",
                ProviderState::Stopped => "stopped",
            },
            lambda: provider.get_lambda(),
            age_ms: reading.age().map(|age| age.as_millis() as u64),
            reading,
        }
    }
}
