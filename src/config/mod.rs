//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "poststat";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DB_MAX_HOLD_SECS: u64 = 240;
const DEFAULT_CACHE_HOST: &str = "localhost";
const DEFAULT_CACHE_PORT: u16 = 6379;
const DEFAULT_STANDARD_TTL_SECS: u64 = 3600;
const DEFAULT_EXTENDED_TTL_SECS: u64 = 86_400;
const DEFAULT_POPULARITY_THRESHOLD: u64 = 5;
const DEFAULT_MEMORY_CAPACITY: u64 = 10_000;
const DEFAULT_BROKER_HOST: &str = "localhost:9092";
const DEFAULT_BROKER_CLIENT_ID: &str = "localhost";
const DEFAULT_BROKER_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_BROKER_TOPIC: &str = "post";
const DEFAULT_CONSUMER_GROUP_ID: &str = "post-group";
const DEFAULT_BATCH_MAX_MESSAGES: u64 = 100;
const DEFAULT_BATCH_WAIT_MS: u64 = 100;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 900;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 100;
const DEFAULT_OUTBOX_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_OUTBOX_BATCH_SIZE: u64 = 100;

/// Command-line arguments for the poststat binary.
#[derive(Debug, Parser)]
#[command(name = "poststat", version, about = "Post ingestion and word statistics service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "POSTSTAT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and background workers.
    Serve(Box<ServeArgs>),
    /// Publish every pending outbox entry once and exit.
    Relay(RelayArgs),
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
pub struct RelayArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the broker bootstrap address.
    #[arg(long = "broker-host", value_name = "HOST:PORT")]
    pub broker_host: Option<String>,
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis host.
    #[arg(long = "cache-host", value_name = "HOST")]
    pub cache_host: Option<String>,

    /// Override the Redis port.
    #[arg(long = "cache-port", value_name = "PORT")]
    pub cache_port: Option<u16>,

    /// Override the broker bootstrap address.
    #[arg(long = "broker-host", value_name = "HOST:PORT")]
    pub broker_host: Option<String>,

    /// Override the topic analysis events are sent to.
    #[arg(long = "broker-topic", value_name = "TOPIC")]
    pub broker_topic: Option<String>,

    /// Toggle the analysis consumer.
    #[arg(
        long = "consumer-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub consumer_enabled: Option<bool>,

    /// Override the consumer mode (batch|message).
    #[arg(long = "consumer-mode", value_name = "MODE")]
    pub consumer_mode: Option<String>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,

    /// Toggle the background outbox relay.
    #[arg(
        long = "outbox-relay-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub outbox_relay_enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub broker: BrokerSettings,
    pub rate_limit: RateLimitSettings,
    pub outbox: OutboxSettings,
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
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
    /// Upper bound on how long one operation may hold a pooled connection.
    pub max_hold: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown cache backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub host: String,
    pub port: u16,
    /// `host:port` seeds; a non-empty list selects cluster mode.
    pub cluster_nodes: Vec<String>,
    pub standard_ttl: Duration,
    pub extended_ttl: Duration,
    pub popularity_threshold: NonZeroU32,
    pub memory_capacity: NonZeroUsize,
}

impl CacheSettings {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerMode {
    Batch,
    Message,
}

impl ConsumerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerMode::Batch => "batch",
            ConsumerMode::Message => "message",
        }
    }
}

impl FromStr for ConsumerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "message" => Ok(Self::Message),
            other => Err(format!("unknown consumer mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub client_id: String,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    /// Default topic; `None` when configured empty.
    pub topic: Option<String>,
    pub consumer_group_id: String,
    pub from_beginning: bool,
    pub consumer_enabled: bool,
    pub consumer_mode: ConsumerMode,
    pub batch_max_messages: NonZeroU32,
    pub batch_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub relay_enabled: bool,
    pub poll_interval: Duration,
    pub batch_size: NonZeroU32,
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

    builder = builder.add_source(
        Environment::with_prefix("POSTSTAT")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.cluster_nodes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Relay(args)) => raw.apply_relay_overrides(args),
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
    broker: RawBrokerSettings,
    rate_limit: RawRateLimitSettings,
    outbox: RawOutboxSettings,
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
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(host) = overrides.cache_host.as_ref() {
            self.cache.host = Some(host.clone());
        }
        if let Some(port) = overrides.cache_port {
            self.cache.port = Some(port);
        }
        if let Some(host) = overrides.broker_host.as_ref() {
            self.broker.host = Some(host.clone());
        }
        if let Some(topic) = overrides.broker_topic.as_ref() {
            self.broker.topic = Some(topic.clone());
        }
        if let Some(enabled) = overrides.consumer_enabled {
            self.broker.consumer_enabled = Some(enabled);
        }
        if let Some(mode) = overrides.consumer_mode.as_ref() {
            self.broker.consumer_mode = Some(mode.clone());
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(max);
        }
        if let Some(enabled) = overrides.outbox_relay_enabled {
            self.outbox.relay_enabled = Some(enabled);
        }
    }

    fn apply_relay_overrides(&mut self, args: &RelayArgs) {
        self.apply_database_override(&args.database);
        if let Some(host) = args.broker_host.as_ref() {
            self.broker.host = Some(host.clone());
        }
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
            broker,
            rate_limit,
            outbox,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            broker: build_broker_settings(broker)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            outbox: build_outbox_settings(outbox)?,
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
    let graceful_shutdown = positive_duration(
        graceful_secs,
        Duration::from_secs,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
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

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let acquire_timeout = positive_duration(
        database
            .acquire_timeout_seconds
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
        Duration::from_secs,
        "database.acquire_timeout_seconds",
    )?;
    let max_hold = positive_duration(
        database.max_hold_seconds.unwrap_or(DEFAULT_DB_MAX_HOLD_SECS),
        Duration::from_secs,
        "database.max_hold_seconds",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout,
        max_hold,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackend::Redis,
    };

    let host = cache
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_CACHE_HOST.to_string());

    let port = cache.port.unwrap_or(DEFAULT_CACHE_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "cache.port",
            "port must be greater than zero",
        ));
    }

    let cluster_nodes = cache
        .cluster_nodes
        .unwrap_or_default()
        .into_iter()
        .map(|node| node.trim().to_string())
        .filter(|node| !node.is_empty())
        .collect();

    let standard_ttl = positive_duration(
        cache
            .standard_ttl_seconds
            .unwrap_or(DEFAULT_STANDARD_TTL_SECS),
        Duration::from_secs,
        "cache.standard_ttl_seconds",
    )?;
    let extended_ttl = positive_duration(
        cache
            .extended_ttl_seconds
            .unwrap_or(DEFAULT_EXTENDED_TTL_SECS),
        Duration::from_secs,
        "cache.extended_ttl_seconds",
    )?;
    let popularity_threshold = non_zero_u32(
        cache
            .popularity_threshold
            .unwrap_or(DEFAULT_POPULARITY_THRESHOLD),
        "cache.popularity_threshold",
    )?;

    let capacity_value = cache.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
    let memory_capacity = usize::try_from(capacity_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.memory_capacity",
                "must be greater than zero and fit in usize",
            )
        })?;

    Ok(CacheSettings {
        backend,
        host,
        port,
        cluster_nodes,
        standard_ttl,
        extended_ttl,
        popularity_threshold,
        memory_capacity,
    })
}

fn build_broker_settings(broker: RawBrokerSettings) -> Result<BrokerSettings, LoadError> {
    let host = broker
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string());

    let client_id = broker
        .client_id
        .or_else(|| std::env::var("HOSTNAME").ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BROKER_CLIENT_ID.to_string());

    let connection_timeout = positive_duration(
        broker
            .connection_timeout_ms
            .unwrap_or(DEFAULT_BROKER_TIMEOUT_MS),
        Duration::from_millis,
        "broker.connection_timeout_ms",
    )?;
    let request_timeout = positive_duration(
        broker
            .request_timeout_ms
            .unwrap_or(DEFAULT_BROKER_TIMEOUT_MS),
        Duration::from_millis,
        "broker.request_timeout_ms",
    )?;

    let topic = match broker.topic {
        Some(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_BROKER_TOPIC.to_string()),
    };

    let consumer_group_id = broker
        .consumer_group_id
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP_ID.to_string());

    let consumer_mode = match broker.consumer_mode {
        Some(value) => ConsumerMode::from_str(&value)
            .map_err(|reason| LoadError::invalid("broker.consumer_mode", reason))?,
        None => ConsumerMode::Batch,
    };

    let consumer_enabled = broker.consumer_enabled.unwrap_or(false);
    if consumer_enabled && topic.is_none() {
        return Err(LoadError::invalid(
            "broker.topic",
            "a topic is required when the consumer is enabled",
        ));
    }

    let batch_max_messages = non_zero_u32(
        broker
            .batch_max_messages
            .unwrap_or(DEFAULT_BATCH_MAX_MESSAGES),
        "broker.batch_max_messages",
    )?;
    let batch_wait = positive_duration(
        broker.batch_wait_ms.unwrap_or(DEFAULT_BATCH_WAIT_MS),
        Duration::from_millis,
        "broker.batch_wait_ms",
    )?;

    Ok(BrokerSettings {
        host,
        client_id,
        connection_timeout,
        request_timeout,
        topic,
        consumer_group_id,
        from_beginning: broker.from_beginning.unwrap_or(false),
        consumer_enabled,
        consumer_mode,
        batch_max_messages,
        batch_wait,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "rate_limit.max_requests")?;

    Ok(RateLimitSettings {
        window_seconds,
        max_requests,
    })
}

fn build_outbox_settings(outbox: RawOutboxSettings) -> Result<OutboxSettings, LoadError> {
    let poll_interval = positive_duration(
        outbox
            .poll_interval_ms
            .unwrap_or(DEFAULT_OUTBOX_POLL_INTERVAL_MS),
        Duration::from_millis,
        "outbox.poll_interval_ms",
    )?;
    let batch_size = non_zero_u32(
        outbox.batch_size.unwrap_or(DEFAULT_OUTBOX_BATCH_SIZE),
        "outbox.batch_size",
    )?;

    Ok(OutboxSettings {
        relay_enabled: outbox.relay_enabled.unwrap_or(true),
        poll_interval,
        batch_size,
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
    acquire_timeout_seconds: Option<u64>,
    max_hold_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    cluster_nodes: Option<Vec<String>>,
    standard_ttl_seconds: Option<u64>,
    extended_ttl_seconds: Option<u64>,
    popularity_threshold: Option<u64>,
    memory_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrokerSettings {
    host: Option<String>,
    client_id: Option<String>,
    connection_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    topic: Option<String>,
    consumer_group_id: Option<String>,
    from_beginning: Option<bool>,
    consumer_enabled: Option<bool>,
    consumer_mode: Option<String>,
    batch_max_messages: Option<u64>,
    batch_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOutboxSettings {
    relay_enabled: Option<bool>,
    poll_interval_ms: Option<u64>,
    batch_size: Option<u64>,
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

fn positive_duration(
    value: u64,
    unit: fn(u64) -> Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
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
    fn defaults_match_documented_values() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.database.max_connections.get(), 10);
        assert_eq!(settings.database.max_hold, Duration::from_secs(240));
        assert_eq!(settings.cache.backend, CacheBackend::Redis);
        assert_eq!(settings.cache.redis_url(), "redis://localhost:6379");
        assert!(settings.cache.cluster_nodes.is_empty());
        assert_eq!(settings.cache.standard_ttl, Duration::from_secs(3600));
        assert_eq!(settings.cache.extended_ttl, Duration::from_secs(86_400));
        assert_eq!(settings.cache.popularity_threshold.get(), 5);
        assert_eq!(settings.broker.host, "localhost:9092");
        assert_eq!(settings.broker.topic.as_deref(), Some("post"));
        assert_eq!(settings.broker.consumer_group_id, "post-group");
        assert_eq!(settings.broker.request_timeout, Duration::from_secs(60));
        assert!(!settings.broker.consumer_enabled);
        assert!(!settings.broker.from_beginning);
        assert_eq!(settings.broker.consumer_mode, ConsumerMode::Batch);
        assert_eq!(settings.rate_limit.window_seconds.get(), 900);
        assert_eq!(settings.rate_limit.max_requests.get(), 100);
        assert!(settings.outbox.relay_enabled);
        assert_eq!(settings.outbox.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            consumer_enabled: Some(true),
            consumer_mode: Some("message".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert!(settings.broker.consumer_enabled);
        assert_eq!(settings.broker.consumer_mode, ConsumerMode::Message);
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.popularity_threshold = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero threshold");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.popularity_threshold",
                ..
            }
        ));
    }

    #[test]
    fn unknown_cache_backend_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.backend = Some("memcached".to_string());

        let err = Settings::from_raw(raw).expect_err("unknown backend");
        assert!(matches!(err, LoadError::Invalid { key: "cache.backend", .. }));
    }

    #[test]
    fn empty_topic_disables_default_topic() {
        let mut raw = RawSettings::default();
        raw.broker.topic = Some("  ".to_string());

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.broker.topic, None);
    }

    #[test]
    fn consumer_requires_topic() {
        let mut raw = RawSettings::default();
        raw.broker.topic = Some(String::new());
        raw.broker.consumer_enabled = Some(true);

        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn cluster_nodes_are_trimmed() {
        let mut raw = RawSettings::default();
        raw.cache.cluster_nodes = Some(vec![
            " 10.0.0.1:7000 ".to_string(),
            String::new(),
            "10.0.0.2:7000".to_string(),
        ]);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(
            settings.cache.cluster_nodes,
            vec!["10.0.0.1:7000".to_string(), "10.0.0.2:7000".to_string()]
        );
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["poststat"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_relay_arguments() {
        let args = CliArgs::parse_from([
            "poststat",
            "relay",
            "--database-url",
            "postgres://example",
        ]);

        match args.command.expect("relay command") {
            Command::Relay(relay) => {
                assert_eq!(
                    relay.database.database_url.as_deref(),
                    Some("postgres://example")
                );
                assert_eq!(relay.broker_host, None);
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "poststat",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--database-url",
            "postgres://override",
            "--cache-backend",
            "memory",
            "--consumer-enabled",
            "true",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(
                    serve.overrides.database_url.as_deref(),
                    Some("postgres://override")
                );
                assert_eq!(serve.overrides.cache_backend.as_deref(), Some("memory"));
                assert_eq!(serve.overrides.consumer_enabled, Some(true));
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
