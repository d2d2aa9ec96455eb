use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Tail growing log files and push new lines to subscribers
#[derive(Parser, Debug)]
#[command(
    name = "logcast",
    about = "Tail growing log files and push new lines to subscribers"
)]
pub struct Cli {
    /// Directory or file to monitor (recursive). Repeat for several roots.
    /// Default: ./logs
    #[arg(long = "path", value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Log debug information to stderr.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// Seconds without new lines before a keep-alive is sent.
    #[arg(long, value_name = "SECS")]
    pub keep_alive: Option<u64>,

    /// Do not forward empty lines.
    #[arg(long, default_value_t = false)]
    pub skip_blank_lines: bool,

    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the live event stream over HTTP (the default)
    Serve(ServeArgs),
    /// Print new lines from the monitored paths to stdout
    Stream(StreamArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Socket address to listen on, e.g. 127.0.0.1:8000
    #[arg(long)]
    pub bind: Option<String>,

    /// HTTP path of the event stream, e.g. /stream
    #[arg(long)]
    pub stream_path: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct StreamArgs {
    /// Also print keep-alive markers while the files are idle
    #[arg(long, default_value_t = false)]
    pub show_keep_alive: bool,
}
