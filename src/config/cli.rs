use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the texrender binary.
#[derive(Debug, Parser)]
#[command(name = "texrender", version, about = "TeX formula to PNG rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TEXRENDER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP rendering service.
    Serve(Box<ServeArgs>),
    /// Render a single formula to a PNG file.
    Render(Box<RenderArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the TeX compiler executable.
    #[arg(long = "render-compiler-path", value_name = "PATH")]
    pub compiler_path: Option<PathBuf>,

    /// Override the PDF rasterizer executable.
    #[arg(long = "render-rasterizer-path", value_name = "PATH")]
    pub rasterizer_path: Option<PathBuf>,

    /// Override the image tool executable used for post-processing.
    #[arg(long = "render-image-tool-path", value_name = "PATH")]
    pub image_tool_path: Option<PathBuf>,

    /// Override the scratch directory for intermediate artifacts.
    #[arg(long = "render-scratch-dir", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// Override the per-invocation external tool timeout.
    #[arg(long = "render-tool-timeout-seconds", value_name = "SECONDS")]
    pub tool_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum request body size in bytes.
    #[arg(long = "server-max-body-bytes", value_name = "BYTES")]
    pub server_max_body_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Where to write the PNG.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Base resolution in DPI.
    #[arg(long, value_name = "DPI")]
    pub dpi: Option<u32>,

    /// Target width in pixels.
    #[arg(long, value_name = "PX")]
    pub width: Option<u32>,

    /// Target height in pixels.
    #[arg(long, value_name = "PX")]
    pub height: Option<u32>,

    /// Transparent border in pixels.
    #[arg(long, value_name = "PX")]
    pub padding: Option<u32>,

    /// Multiplier applied to the resolution or pixel target.
    #[arg(long, value_name = "FACTOR")]
    pub scale: Option<f64>,

    /// Foreground color (`#RRGGBB` or a color name).
    #[arg(long, value_name = "COLOR")]
    pub color: Option<String>,

    /// Background color, or `transparent`.
    #[arg(long, value_name = "COLOR")]
    pub background: Option<String>,

    /// Font size in points.
    #[arg(long = "font-size", value_name = "PT")]
    pub font_size: Option<u32>,

    /// Typeset in inline rather than display style.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub inline: bool,

    /// The formula source.
    #[arg(value_name = "FORMULA")]
    pub formula: String,
}
