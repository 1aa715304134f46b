//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, LoggingOverrides, RenderArgs, RenderOverrides, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "texrender";
const ENV_PREFIX: &str = "TEXRENDER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;
pub(crate) const DEFAULT_COMPILER_PATH: &str = "xelatex";
pub(crate) const DEFAULT_RASTERIZER_PATH: &str = "pdftocairo";
pub(crate) const DEFAULT_IMAGE_TOOL_PATH: &str = "magick";
pub(crate) const DEFAULT_SCRATCH_DIR: &str = "/tmp/texrender";
const DEFAULT_TOOL_TIMEOUT_SECS: u32 = 60;
const DEFAULT_MAIN_FONT: &str = "Latin Modern Roman";
const DEFAULT_CJK_FONT: &str = "SimSun";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub max_body_bytes: NonZeroU64,
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
pub struct RenderSettings {
    pub compiler_path: PathBuf,
    pub rasterizer_path: PathBuf,
    pub image_tool_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub tool_timeout: Duration,
    pub strict_probe: bool,
    pub main_font: String,
    /// `None` disables CJK font support.
    pub cjk_font: Option<String>,
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
    raw.apply_command_overrides(cli.command.as_ref());

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
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_command_overrides(&mut self, command: Option<&Command>) {
        match command {
            Some(Command::Serve(args)) => self.apply_serve_overrides(&args.overrides),
            Some(Command::Render(args)) => {
                self.apply_render_overrides(&args.overrides);
                self.apply_logging_overrides(&args.logging);
            }
            None => {}
        }
    }

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
        if let Some(bytes) = overrides.server_max_body_bytes {
            self.server.max_body_bytes = Some(bytes);
        }
        self.apply_logging_overrides(&overrides.logging);
        self.apply_render_overrides(&overrides.render);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.compiler_path.as_ref() {
            self.render.compiler_path = Some(path.clone());
        }
        if let Some(path) = overrides.rasterizer_path.as_ref() {
            self.render.rasterizer_path = Some(path.clone());
        }
        if let Some(path) = overrides.image_tool_path.as_ref() {
            self.render.image_tool_path = Some(path.clone());
        }
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.render.scratch_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.tool_timeout_seconds {
            self.render.tool_timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
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

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let max_body_bytes = NonZeroU64::new(server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES))
        .ok_or_else(|| LoadError::invalid("server.max_body_bytes", "must be greater than zero"))?;

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
        max_body_bytes,
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

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let compiler_path = non_empty_path(
        render.compiler_path,
        DEFAULT_COMPILER_PATH,
        "render.compiler_path",
    )?;
    let rasterizer_path = non_empty_path(
        render.rasterizer_path,
        DEFAULT_RASTERIZER_PATH,
        "render.rasterizer_path",
    )?;
    // An empty image tool path disables post-processing instead of failing.
    let image_tool_path = render
        .image_tool_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_TOOL_PATH));
    let scratch_dir =
        non_empty_path(render.scratch_dir, DEFAULT_SCRATCH_DIR, "render.scratch_dir")?;

    let timeout_secs = non_zero_u32(
        render
            .tool_timeout_seconds
            .unwrap_or(u64::from(DEFAULT_TOOL_TIMEOUT_SECS)),
        "render.tool_timeout_seconds",
    )?;

    let main_font = render
        .main_font
        .map(|font| font.trim().to_string())
        .unwrap_or_else(|| DEFAULT_MAIN_FONT.to_string());
    if main_font.is_empty() {
        return Err(LoadError::invalid(
            "render.main_font",
            "font name must not be empty",
        ));
    }
    let cjk_font = match render.cjk_font {
        Some(font) => {
            let trimmed = font.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_CJK_FONT.to_string()),
    };

    Ok(RenderSettings {
        compiler_path,
        rasterizer_path,
        image_tool_path,
        scratch_dir,
        tool_timeout: Duration::from_secs(u64::from(timeout_secs.get())),
        strict_probe: render.strict_probe.unwrap_or(false),
        main_font,
        cjk_font,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    max_body_bytes: Option<u64>,
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
struct RawRenderSettings {
    compiler_path: Option<PathBuf>,
    rasterizer_path: Option<PathBuf>,
    image_tool_path: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    tool_timeout_seconds: Option<u64>,
    strict_probe: Option<bool>,
    main_font: Option<String>,
    cjk_font: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
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
