//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, ConvertArgs, EngineOverrides, ServeArgs, ServeOverrides};

use crate::domain::geometry::DEFAULT_DPI_CORRECTION;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "chartexport";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3005;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_CONCURRENT_RENDERS: u32 = 4;
const DEFAULT_LIBRARY_PATH: &str = ".";
const DEFAULT_CONSTRUCTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub request_timeout: Duration,
    pub max_concurrent_renders: NonZeroU32,
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
pub struct EngineSettings {
    pub library_path: PathBuf,
    pub tmp_dir: Option<PathBuf>,
    pub dpi_correction: f64,
    pub construction_timeout: Duration,
    pub fetch_timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix("CHARTEXPORT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Serve(args) => raw.apply_serve_overrides(&args.overrides),
        Command::Convert(args) => raw.apply_engine_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    engine: RawEngineSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.request_timeout_seconds {
            self.server.request_timeout_seconds = Some(seconds);
        }
        if let Some(count) = overrides.max_concurrent_renders {
            self.server.max_concurrent_renders = Some(count);
        }

        self.apply_engine_overrides(&overrides.engine);
    }

    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(dir) = overrides.tmp_dir.as_ref() {
            self.engine.tmp_dir = Some(dir.clone());
        }
        if let Some(path) = overrides.library_path.as_ref() {
            self.engine.library_path = Some(path.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            engine,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let engine = build_engine_settings(engine)?;

        Ok(Self {
            server,
            logging,
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

    let graceful_shutdown = positive_seconds(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;
    let request_timeout = positive_seconds(
        server.request_timeout_seconds,
        DEFAULT_REQUEST_TIMEOUT_SECS,
        "server.request_timeout_seconds",
    )?;

    let max_renders = server
        .max_concurrent_renders
        .unwrap_or(DEFAULT_MAX_CONCURRENT_RENDERS);
    let max_concurrent_renders = NonZeroU32::new(max_renders).ok_or_else(|| {
        LoadError::invalid("server.max_concurrent_renders", "must be greater than zero")
    })?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
        request_timeout,
        max_concurrent_renders,
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

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let library_path = engine
        .library_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY_PATH));
    if library_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "engine.library_path",
            "path must not be empty",
        ));
    }

    let tmp_dir = engine
        .tmp_dir
        .filter(|dir| !dir.as_os_str().is_empty());

    let dpi_correction = engine.dpi_correction.unwrap_or(DEFAULT_DPI_CORRECTION);
    if !dpi_correction.is_finite() || dpi_correction <= 0.0 {
        return Err(LoadError::invalid(
            "engine.dpi_correction",
            "must be a positive number",
        ));
    }

    let construction_timeout = positive_seconds(
        engine.construction_timeout_seconds,
        DEFAULT_CONSTRUCTION_TIMEOUT_SECS,
        "engine.construction_timeout_seconds",
    )?;
    let fetch_timeout = positive_seconds(
        engine.fetch_timeout_seconds,
        DEFAULT_FETCH_TIMEOUT_SECS,
        "engine.fetch_timeout_seconds",
    )?;

    Ok(EngineSettings {
        library_path,
        tmp_dir,
        dpi_correction,
        construction_timeout,
        fetch_timeout,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
    max_concurrent_renders: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    library_path: Option<PathBuf>,
    tmp_dir: Option<PathBuf>,
    dpi_correction: Option<f64>,
    construction_timeout_seconds: Option<u64>,
    fetch_timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(
    value: Option<u64>,
    default: u64,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "must be greater than zero")),
        seconds => Ok(Duration::from_secs(seconds)),
    }
}
