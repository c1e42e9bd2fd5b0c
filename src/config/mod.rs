//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::engine::{EngineConfig, NamespaceVersions, PushDefaults};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "waystation";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 15;
const DEFAULT_STORAGE_DIR: &str = "cache";

/// Command-line arguments for the Waystation binary.
#[derive(Debug, Parser)]
#[command(name = "waystation", version, about = "Offline-first caching proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WAYSTATION_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy.
    Serve(Box<ServeArgs>),
    /// Print how a request would be classified and routed.
    Classify(ClassifyArgs),
    /// Print the current namespace identifiers.
    Namespaces,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ClassifyArgs {
    /// HTTP method of the request.
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Treat the request as a top-level navigation.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub navigate: bool,

    /// Absolute URL, or a path resolved against the engine scope.
    #[arg(value_name = "URL")]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Filesystem,
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

    /// Override the upstream origin requests are forwarded to.
    #[arg(long = "upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Override the upstream request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS")]
    pub upstream_timeout_seconds: Option<u64>,

    /// Override the cache storage backend.
    #[arg(long = "storage-backend", value_name = "BACKEND")]
    pub storage_backend: Option<StorageBackend>,

    /// Override the filesystem cache directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the per-namespace entry limit.
    #[arg(long = "storage-max-entries", value_name = "COUNT")]
    pub storage_max_entries: Option<usize>,

    /// Override the public scope the engine controls.
    #[arg(long = "engine-scope", value_name = "URL")]
    pub engine_scope: Option<String>,

    /// Override the static namespace version.
    #[arg(long = "engine-static-version", value_name = "VERSION")]
    pub engine_static_version: Option<String>,

    /// Override the dynamic namespace version.
    #[arg(long = "engine-dynamic-version", value_name = "VERSION")]
    pub engine_dynamic_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub storage: StorageSettings,
    pub engine: EngineConfig,
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

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub directory: PathBuf,
    pub max_entries: Option<NonZeroUsize>,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("WAYSTATION")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("engine.shell_assets")
            .with_list_parse_key("engine.no_cache_patterns")
            .with_list_parse_key("engine.static_extensions")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Classify(_)) | Some(Command::Namespaces) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    storage: RawStorageSettings,
    engine: RawEngineSettings,
    push: RawPushSettings,
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
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.upstream.url = Some(url.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(backend) = overrides.storage_backend {
            self.storage.backend = Some(backend);
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(max) = overrides.storage_max_entries {
            self.storage.max_entries_per_namespace = Some(max);
        }
        if let Some(scope) = overrides.engine_scope.as_ref() {
            self.engine.scope = Some(scope.clone());
        }
        if let Some(version) = overrides.engine_static_version.as_ref() {
            self.engine.static_version = Some(version.clone());
        }
        if let Some(version) = overrides.engine_dynamic_version.as_ref() {
            self.engine.dynamic_version = Some(version.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            storage,
            engine,
            push,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let storage = build_storage_settings(storage)?;
        let engine = build_engine_config(engine, push, &server)?;

        Ok(Self {
            server,
            logging,
            upstream,
            storage,
            engine,
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

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let raw_url = upstream
        .url
        .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
    let base_url = parse_base_url(&raw_url)
        .map_err(|reason| LoadError::invalid("upstream.url", reason))?;

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let max_entries = match storage.max_entries_per_namespace {
        None => None,
        Some(value) => Some(NonZeroUsize::new(value).ok_or_else(|| {
            LoadError::invalid("storage.max_entries_per_namespace", "must be greater than zero")
        })?),
    };

    Ok(StorageSettings {
        backend: storage.backend.unwrap_or(StorageBackend::Memory),
        directory: storage
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
        max_entries,
    })
}

fn build_engine_config(
    engine: RawEngineSettings,
    push: RawPushSettings,
    server: &ServerSettings,
) -> Result<EngineConfig, LoadError> {
    let scope = match engine.scope {
        Some(scope) => {
            parse_base_url(&scope).map_err(|reason| LoadError::invalid("engine.scope", reason))?
        }
        None => parse_base_url(&format!("http://{}/", server.addr))
            .map_err(|reason| LoadError::invalid("engine.scope", reason))?,
    };

    let mut config = EngineConfig::new(scope);

    if let Some(prefix) = engine.prefix {
        config.prefix = prefix.trim().to_string();
    }

    let defaults = NamespaceVersions::default();
    config.versions = NamespaceVersions {
        static_version: non_empty(engine.static_version, "engine.static_version")?
            .unwrap_or(defaults.static_version),
        dynamic_version: non_empty(engine.dynamic_version, "engine.dynamic_version")?
            .unwrap_or(defaults.dynamic_version),
        umbrella_version: non_empty(engine.umbrella_version, "engine.umbrella_version")?
            .unwrap_or(defaults.umbrella_version),
    };

    if let Some(shell_document) = non_empty(engine.shell_document, "engine.shell_document")? {
        config.shell_document = shell_document;
    }
    if let Some(manifest) = non_empty(engine.manifest, "engine.manifest")? {
        config.manifest = manifest;
    }
    if let Some(assets) = engine.shell_assets {
        config.shell_assets = assets;
    }
    if let Some(patterns) = engine.no_cache_patterns {
        config.no_cache_patterns = patterns
            .into_iter()
            .filter(|pattern| !pattern.is_empty())
            .collect();
    }
    if let Some(extensions) = engine.static_extensions {
        config.static_extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
    }
    if let Some(tag) = non_empty(engine.sync_tag, "engine.sync_tag")? {
        config.sync_tag = tag;
    }

    for path in &config.shell_assets {
        config
            .resolve(path)
            .map_err(|err| LoadError::invalid("engine.shell_assets", format!("`{path}`: {err}")))?;
    }

    let push_defaults = PushDefaults::default();
    config.push = PushDefaults {
        title: push.title.unwrap_or(push_defaults.title),
        body: push.body.unwrap_or(push_defaults.body),
        icon: push.icon.unwrap_or(push_defaults.icon),
        badge: push.badge.unwrap_or(push_defaults.badge),
    };

    Ok(config)
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
struct RawUpstreamSettings {
    url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<StorageBackend>,
    directory: Option<PathBuf>,
    max_entries_per_namespace: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    scope: Option<String>,
    prefix: Option<String>,
    static_version: Option<String>,
    dynamic_version: Option<String>,
    umbrella_version: Option<String>,
    shell_document: Option<String>,
    manifest: Option<String>,
    shell_assets: Option<Vec<String>>,
    no_cache_patterns: Option<Vec<String>>,
    static_extensions: Option<Vec<String>>,
    sync_tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPushSettings {
    title: Option<String>,
    body: Option<String>,
    icon: Option<String>,
    badge: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Parse an absolute http(s) URL and make sure its path ends with `/` so
/// relative paths join beneath it.
fn parse_base_url(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw.trim()).map_err(|err| format!("invalid url `{raw}`: {err}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn non_empty(value: Option<String>, key: &'static str) -> Result<Option<String>, LoadError> {
    match value {
        None => Ok(None),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(key, "must not be empty"));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
