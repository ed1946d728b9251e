//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_MAX_PATH_SEGMENT_LENGTH};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "staticfile-cache";
const ENV_PREFIX: &str = "STATICFILE_CACHE";

/// Command-line arguments for the staticfile-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "staticfile-cache",
    version,
    about = "Static page cache admission tooling"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STATICFILE_CACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Replay a JSON-lines scenario of requests and tag flushes through the admission engine.
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Epoch seconds the replay clock starts at; defaults to the current time.
    #[arg(long = "start-time", value_name = "SECONDS")]
    pub start_time: Option<i64>,

    /// Scenario file, one JSON step per line.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Enable or disable static caching.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the in-memory store capacity.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<usize>,

    /// Refuse to cache pages rendered for authenticated sessions.
    #[arg(
        long = "cache-exclude-authenticated",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_exclude_authenticated: Option<bool>,

    /// Append a generation signature to cached HTML.
    #[arg(
        long = "cache-show-generation-signature",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_show_generation_signature: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity: NonZeroUsize,
    pub max_path_segment_length: NonZeroUsize,
    pub exclude_authenticated: bool,
    pub show_generation_signature: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_with_environment(cli, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}

fn load_with_environment(cli: &CliArgs, environment: Environment) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Replay(args) => raw.apply_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    capacity: Option<usize>,
    max_path_segment_length: Option<usize>,
    exclude_authenticated: Option<bool>,
    show_generation_signature: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }
        if let Some(exclude) = overrides.cache_exclude_authenticated {
            self.cache.exclude_authenticated = Some(exclude);
        }
        if let Some(show) = overrides.cache_show_generation_signature {
            self.cache.show_generation_signature = Some(show);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity = NonZeroUsize::new(cache.capacity.unwrap_or(DEFAULT_CAPACITY))
        .ok_or_else(|| LoadError::invalid("cache.capacity", "must be greater than zero"))?;

    let max_path_segment_length = NonZeroUsize::new(
        cache
            .max_path_segment_length
            .unwrap_or(DEFAULT_MAX_PATH_SEGMENT_LENGTH),
    )
    .ok_or_else(|| {
        LoadError::invalid("cache.max_path_segment_length", "must be greater than zero")
    })?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        capacity,
        max_path_segment_length,
        exclude_authenticated: cache.exclude_authenticated.unwrap_or(false),
        show_generation_signature: cache.show_generation_signature.unwrap_or(false),
    })
}
