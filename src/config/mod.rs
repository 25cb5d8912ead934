//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::MAX_ENTRY_TTL;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "page-manager";
const ENV_PREFIX: &str = "PAGE_MANAGER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_PUBLISHED_TTL_SECS: u64 = 60;
const DEFAULT_NEGATIVE_TTL_SECS: u64 = 10;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_ARCHIVE_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_ARCHIVE_RETRY_BACKOFF_MS: u64 = 10;

/// Command-line arguments for the page-manager binary.
#[derive(Debug, Parser)]
#[command(
    name = "page-manager",
    version,
    about = "Archive and publish pages behind a read-through cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGE_MANAGER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve(Box<ServeArgs>),
    /// Apply the bundled database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override how long published pages stay cached.
    #[arg(long = "cache-published-ttl-seconds", value_name = "SECONDS")]
    pub cache_published_ttl_seconds: Option<u64>,

    /// Override how long "not published" answers stay cached.
    #[arg(long = "cache-negative-ttl-seconds", value_name = "SECONDS")]
    pub cache_negative_ttl_seconds: Option<u64>,

    /// Override the expired-entry sweep cadence.
    #[arg(long = "cache-sweep-interval-seconds", value_name = "SECONDS")]
    pub cache_sweep_interval_seconds: Option<u64>,

    /// Override the number of archive attempts on concurrency conflicts.
    #[arg(long = "archive-max-attempts", value_name = "COUNT")]
    pub archive_max_attempts: Option<u32>,

    /// Override the pause between archive attempts.
    #[arg(long = "archive-retry-backoff-ms", value_name = "MILLIS")]
    pub archive_retry_backoff_ms: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub archive: ArchiveSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub published_ttl: Duration,
    pub negative_ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub max_attempts: NonZeroU32,
    pub retry_backoff: Duration,
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
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    archive: RawArchiveSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(ttl) = overrides.cache_published_ttl_seconds {
            self.cache.published_ttl_seconds = Some(ttl);
        }
        if let Some(ttl) = overrides.cache_negative_ttl_seconds {
            self.cache.negative_ttl_seconds = Some(ttl);
        }
        if let Some(interval) = overrides.cache_sweep_interval_seconds {
            self.cache.sweep_interval_seconds = Some(interval);
        }
        if let Some(attempts) = overrides.archive_max_attempts {
            self.archive.max_attempts = Some(attempts);
        }
        if let Some(backoff) = overrides.archive_retry_backoff_ms {
            self.archive.retry_backoff_ms = Some(backoff);
        }

        self.apply_database_override(&overrides.database);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            archive,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            archive: build_archive_settings(archive)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let published = cache
        .published_ttl_seconds
        .unwrap_or(DEFAULT_PUBLISHED_TTL_SECS);
    let negative = cache
        .negative_ttl_seconds
        .unwrap_or(DEFAULT_NEGATIVE_TTL_SECS);
    let sweep = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

    Ok(CacheSettings {
        published_ttl: bounded_ttl(published, "cache.published_ttl_seconds")?,
        negative_ttl: bounded_ttl(negative, "cache.negative_ttl_seconds")?,
        sweep_interval: non_zero_seconds(sweep, "cache.sweep_interval_seconds")?,
    })
}

fn build_archive_settings(archive: RawArchiveSettings) -> Result<ArchiveSettings, LoadError> {
    let attempts = archive
        .max_attempts
        .unwrap_or(DEFAULT_ARCHIVE_MAX_ATTEMPTS);
    let backoff_ms = archive
        .retry_backoff_ms
        .unwrap_or(DEFAULT_ARCHIVE_RETRY_BACKOFF_MS);

    Ok(ArchiveSettings {
        max_attempts: non_zero_u32(attempts.into(), "archive.max_attempts")?,
        retry_backoff: Duration::from_millis(backoff_ms),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    published_ttl_seconds: Option<u64>,
    negative_ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArchiveSettings {
    max_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn bounded_ttl(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    let ttl = non_zero_seconds(value, key)?;
    if ttl > MAX_ENTRY_TTL {
        return Err(LoadError::invalid(
            key,
            format!("must not exceed {} seconds", MAX_ENTRY_TTL.as_secs()),
        ));
    }
    Ok(ttl)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_any_source() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(
            settings.server.addr,
            "127.0.0.1:3000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
        assert_eq!(settings.logging.level, LevelFilter::INFO);
        assert_eq!(settings.logging.format, LogFormat::Compact);
        assert!(settings.database.url.is_none());
        assert_eq!(settings.database.max_connections.get(), 8);
        assert_eq!(settings.cache.published_ttl, Duration::from_secs(60));
        assert_eq!(settings.cache.negative_ttl, Duration::from_secs(10));
        assert_eq!(settings.cache.sweep_interval, Duration::from_secs(30));
        assert_eq!(settings.archive.max_attempts.get(), 2);
        assert_eq!(settings.archive.retry_backoff, Duration::from_millis(10));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());
        raw.archive.max_attempts = Some(5);

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            archive_max_attempts: Some(3),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.archive.max_attempts.get(), 3);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        raw.apply_serve_overrides(&ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        });

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn blank_database_url_is_treated_as_missing() {
        let mut raw = RawSettings::default();
        raw.database.url = Some("   ".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.database.url.is_none());
    }

    #[test]
    fn migrate_only_applies_database_override() {
        let mut raw = RawSettings::default();
        raw.apply_database_override(&DatabaseOverride {
            database_url: Some("postgres://localhost/pages".to_string()),
        });

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.database.url.as_deref(),
            Some("postgres://localhost/pages")
        );
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let mut raw = RawSettings::default();
        raw.archive.max_attempts = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero attempts must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "archive.max_attempts",
                ..
            }
        ));
    }

    #[test]
    fn zero_negative_ttl_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.negative_ttl_seconds = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero ttl must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.negative_ttl_seconds",
                ..
            }
        ));
    }

    #[test]
    fn oversized_ttls_are_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.published_ttl_seconds = Some(u64::MAX);

        let err = Settings::from_raw(raw).expect_err("unbounded ttl must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.published_ttl_seconds",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.cache.negative_ttl_seconds = Some(MAX_ENTRY_TTL.as_secs() + 1);
        let err = Settings::from_raw(raw).expect_err("ttl above the cap must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.negative_ttl_seconds",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.cache.published_ttl_seconds = Some(MAX_ENTRY_TTL.as_secs());
        let settings = Settings::from_raw(raw).expect("ttl at the cap is valid");
        assert_eq!(settings.cache.published_ttl, MAX_ENTRY_TTL);
    }

    #[test]
    fn invalid_log_level_is_reported() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("loud".to_string());

        let err = Settings::from_raw(raw).expect_err("unknown level must fail");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "logging.level",
                ..
            }
        ));
    }

    #[test]
    fn zero_backoff_is_allowed() {
        let mut raw = RawSettings::default();
        raw.archive.retry_backoff_ms = Some(0);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.archive.retry_backoff, Duration::ZERO);
    }

    #[test]
    fn serve_is_the_default_command() {
        let args = CliArgs::parse_from(["page-manager"]);
        assert!(args.command.is_none());

        let args = CliArgs::parse_from(["page-manager", "migrate", "--database-url", "x"]);
        assert!(matches!(args.command, Some(Command::Migrate(_))));
    }
}
