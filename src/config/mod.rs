use clap::{Args, Parser, ValueEnum};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment, Provider,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::level_filters::LevelFilter;

use crate::pypi::normalize_package_name;

mod validate;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Trace,
}

/// Transforms our custom `LogLevel` enum into a `tracing::level_filters::LevelFilter`
/// enum used by the `tracing` crate.
impl From<&LogLevel> for LevelFilter {
    fn from(val: &LogLevel) -> Self {
        match val {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone, Args)]
#[group(id = "logging")]
pub struct Logging {
    /// The level of logging to be used.
    #[serde(deserialize_with = "log_level_deser")]
    #[arg(
        long = "log.level",
        required = false,
        value_enum,
        default_value = "info"
    )]
    pub level: LogLevel,

    /// The format of the log output.
    #[serde(deserialize_with = "log_format_deser")]
    #[arg(
        long = "log.format",
        required = false,
        value_enum,
        default_value = "pretty"
    )]
    pub format: LogFormat,

    /// Whether to log one structured line per served request.
    #[arg(
        long = "log.access_logs_enabled",
        required = false,
        value_parser,
        default_value = "true"
    )]
    pub access_logs_enabled: bool,
}

/// The main configuration struct.
/// A configuration file (YAML or through ENV) will be parsed into this struct.
/// Example:
///
/// ```yaml
/// # Example configuration file
/// private_pypi_url: "https://pypi.internal/simple/"
/// port: 8080
/// cache_enabled: true
/// cache_size: 20000
/// cache_ttl_hours: 12
/// public_only_packages:
///   - "requests"
/// logging:
///   level: "info"
///   format: "json"
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Parser)]
#[command(name = "pypi-bridge")]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Base URL of the public index. Pages served from it are wheel-filtered.
    #[clap(long, default_value = "https://pypi.org/simple/")]
    pub public_pypi_url: String,

    /// Base URL of the trusted private index. Required; the proxy refuses
    /// to start without it.
    #[clap(long, required = false)]
    pub private_pypi_url: Option<String>,

    /// The port the proxy listens on.
    #[clap(short, long, default_value = "8080")]
    pub port: u16,

    /// Whether existence answers and rendered pages are cached at all.
    #[clap(
        long,
        required = false,
        value_parser,
        default_value = "true"
    )]
    pub cache_enabled: bool,

    /// Maximum number of entries per cache map.
    #[clap(long, default_value = "20000")]
    pub cache_size: usize,

    /// Hours an entry stays servable before it counts as expired.
    #[clap(long, default_value = "12")]
    pub cache_ttl_hours: u64,

    /// Packages that must always come from the public index, even when the
    /// private index carries them. Comma-separated on the command line.
    #[clap(long, value_delimiter = ',', required = false)]
    pub public_only_packages: Vec<String>,

    /// The number of worker threads used by the proxy service.
    #[clap(short, long, required = false, default_value = "2")]
    pub worker_threads: Option<usize>,

    /// The PATH to the configuration file to be used.
    ///
    /// The configuration file should be named `pypi-bridge.yaml` and be
    /// present in that path. If no path is provided, defaults apply.
    #[clap(short, required = false, long)]
    #[allow(clippy::struct_field_names)]
    pub config_path: Option<String>,

    #[command(flatten)]
    pub logging: Logging,
}

impl Config {
    /// The private index base. `validate` guarantees presence before the
    /// server starts; an unset value only occurs before loading completes.
    pub fn private_index_base(&self) -> &str {
        self.private_pypi_url.as_deref().unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            public_pypi_url: "https://pypi.org/simple/".to_string(),
            private_pypi_url: None,
            port: 8080,
            cache_enabled: true,
            cache_size: 20_000,
            cache_ttl_hours: 12,
            public_only_packages: vec![],
            worker_threads: Some(2),
            config_path: None,
            logging: Logging {
                level: LogLevel::Info,
                format: LogFormat::Pretty,
                access_logs_enabled: true,
            },
        }
    }
}

/// Implement the `Provider` trait for the `Config` struct.
/// This allows the `Config` struct to be used as a configuration provider with *defaults*.
impl Provider for Config {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("pypi-bridge")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Config::default()).data()
    }
}

/// Load the configuration from defaults, command-line flags, a YAML file
/// and `PYPI_PROXY_`-prefixed environment variables, in that merge order.
///
/// Nested keys are separated by double underscores in the environment:
/// `PYPI_PROXY_LOGGING__LEVEL=debug` sets `logging.level`.
pub fn load(fallback: &str) -> Result<Config, figment::Error> {
    let parsed_commands = Config::parse();

    let path_with_fallback = match &parsed_commands.config_path {
        Some(path) => path.as_str(),
        None => fallback,
    };

    load_from_path(path_with_fallback, &parsed_commands)
}

/// Load configuration from a specific path, used for testing and internal logic.
pub(crate) fn load_from_path(
    config_path: &str,
    parsed_commands: &Config,
) -> Result<Config, figment::Error> {
    let mut figment = Figment::new()
        .merge(Config::default())
        .merge(Serialized::defaults(parsed_commands));

    if std::path::Path::new(config_path).is_file() {
        figment = figment.merge(Yaml::file(config_path));
    } else {
        figment = figment
            .merge(Yaml::file(format!("{config_path}/pypi-bridge.yml")))
            .merge(Yaml::file(format!("{config_path}/pypi-bridge.yaml")));
    }

    let mut config: Config = figment
        .merge(Env::prefixed("PYPI_PROXY_").split("__"))
        .extract()?;

    // the public-only list takes part in cache keying, so it is normalized
    // once here rather than on every lookup
    config.public_only_packages = config
        .public_only_packages
        .iter()
        .map(|package| normalize_package_name(package))
        .collect();

    validate::check_config(&config).map_err(|err| figment::Error::from(err.to_string()))?;

    Ok(config)
}

/// Deserialize function to convert a string to a `LogLevel` Enum
fn log_level_deser<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        "trace" => Ok(LogLevel::Trace),
        _ => Err(serde::de::Error::custom(
            "expected one of DEBUG, INFO, WARN, ERROR, TRACE",
        )),
    }
}

/// Deserialize function to convert a string to a `LogFormat` Enum
fn log_format_deser<'de, D>(deserializer: D) -> Result<LogFormat, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "pretty" => Ok(LogFormat::Pretty),
        _ => Err(serde::de::Error::custom("expected one of: json, pretty")),
    }
}
