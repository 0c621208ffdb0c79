use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the chartexport binary.
#[derive(Debug, Parser)]
#[command(
    name = "chartexport",
    version,
    about = "Render chart options or SVG markup to SVG, PNG, JPEG or PDF"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CHARTEXPORT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Convert one chart and print the output path or payload.
    Convert(Box<ConvertArgs>),
    /// Run the HTTP export server.
    Serve(Box<ServeArgs>),
}

/// Request keys of a single conversion. File-valued keys name files to read.
#[derive(Debug, Args, Default, Clone)]
pub struct ConvertArgs {
    /// File holding chart options or SVG markup.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub infile: Option<PathBuf>,

    /// Chart options given inline; used when --infile is absent.
    #[arg(long, value_name = "JSON")]
    pub options: Option<String>,

    /// Output file; its extension decides the output type.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub outfile: Option<String>,

    /// Output type when no outfile is given (svg|png|jpeg|pdf).
    #[arg(long = "type", value_name = "TYPE")]
    pub output_type: Option<String>,

    /// Zoom factor, ignored when --width is set.
    #[arg(long, value_name = "FACTOR")]
    pub scale: Option<String>,

    /// Output width in pixels.
    #[arg(long, value_name = "PIXELS")]
    pub width: Option<String>,

    /// Chart constructor name.
    #[arg(long, value_name = "NAME")]
    pub constr: Option<String>,

    /// File holding the chart callback function.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub callback: Option<PathBuf>,

    /// File holding global options applied before the chart is created.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub globaloptions: Option<PathBuf>,

    /// File holding theme options merged under the chart options.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub themeoptions: Option<PathBuf>,

    /// File holding data module options.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub dataoptions: Option<PathBuf>,

    /// File holding custom code run against the options.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub customcode: Option<PathBuf>,

    /// Resource manifest: JSON object or comma-separated file list.
    #[arg(long, value_name = "JSON|FILES")]
    pub resources: Option<String>,

    #[command(flatten)]
    pub overrides: EngineOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    /// Directory output files are written under.
    #[arg(long = "tmpdir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub tmp_dir: Option<PathBuf>,

    /// Directory holding `resources.json` and fallback resource files.
    #[arg(long = "library-path", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub library_path: Option<PathBuf>,

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
    pub engine: EngineOverrides,

    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

    /// Override the per-request timeout.
    #[arg(long = "server-request-timeout-seconds", value_name = "SECONDS")]
    pub request_timeout_seconds: Option<u64>,

    /// Override how many conversions may run at once.
    #[arg(long = "server-max-concurrent-renders", value_name = "COUNT")]
    pub max_concurrent_renders: Option<u32>,
}
