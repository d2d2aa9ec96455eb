use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::cli::{Cli, Commands};
use crate::extractor::DEFAULT_MAX_READ_BYTES;
use crate::session::DEFAULT_KEEP_ALIVE;
use crate::watcher::TailOptions;

// ---------------------------------------------------------------------------
// TOML-deserializable config (intermediate representation)
// ---------------------------------------------------------------------------

/// Raw config as parsed from the TOML file.
/// All fields are optional so that missing keys fall through to defaults.
/// Unknown keys are silently ignored by serde.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    paths: Option<Vec<PathBuf>>,
    verbose: Option<bool>,
    skip_blank_lines: Option<bool>,
    server: FileServerConfig,
    stream: FileStreamConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileServerConfig {
    bind: Option<String>,
    stream_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileStreamConfig {
    keep_alive_secs: Option<u64>,
    max_read_bytes: Option<u64>,
}

// ---------------------------------------------------------------------------
// Effective (merged) config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub paths: Vec<PathBuf>,
    pub verbose: bool,
    pub skip_blank_lines: bool,
    pub server: ServerConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub stream_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub keep_alive: Duration,
    pub max_read_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("logs")],
            verbose: false,
            skip_blank_lines: false,
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            stream_path: "/stream".to_string(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }
}

impl AppConfig {
    /// Settings for the tail service derived from this config.
    pub fn tail_options(&self) -> TailOptions {
        TailOptions {
            paths: self.paths.clone(),
            max_read_bytes: self.stream.max_read_bytes,
            skip_blank_lines: self.skip_blank_lines,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Returns the default config file path: `~/.config/logcast/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("logcast").join("config.toml"))
}

/// Load the config file at `path`.
/// Returns `None` if the file does not exist or cannot be parsed.
fn load_file_config(path: &Path) -> Option<FileConfig> {
    if !path.exists() {
        return None;
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<FileConfig>(&contents) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse config file");
                None
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file");
            None
        }
    }
}

fn parse_bind(s: &str) -> Option<SocketAddr> {
    match s.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            warn!(bind = s, "invalid bind address, using default");
            None
        }
    }
}

/// Ensure the stream path is absolute (`stream` becomes `/stream`).
fn normalize_stream_path(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn keep_alive_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        warn!("keep-alive interval must be at least one second, using default");
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

/// Build the effective `AppConfig` by merging defaults, config file, and CLI args.
///
/// Precedence (highest wins):
/// 1. CLI flags (if explicitly provided)
/// 2. Config file values
/// 3. Hardcoded defaults
pub fn build_config(cli: &Cli) -> AppConfig {
    let mut config = AppConfig::default();

    let config_path = cli.config.clone().or_else(default_config_path);

    if let Some(ref path) = config_path {
        if let Some(file_cfg) = load_file_config(path) {
            if let Some(paths) = file_cfg.paths {
                if !paths.is_empty() {
                    config.paths = paths;
                }
            }
            if let Some(v) = file_cfg.verbose {
                config.verbose = v;
            }
            if let Some(v) = file_cfg.skip_blank_lines {
                config.skip_blank_lines = v;
            }
            if let Some(addr) = file_cfg.server.bind.as_deref().and_then(parse_bind) {
                config.server.bind = addr;
            }
            if let Some(ref p) = file_cfg.server.stream_path {
                config.server.stream_path = normalize_stream_path(p);
            }
            if let Some(ka) = file_cfg.stream.keep_alive_secs.and_then(keep_alive_from_secs) {
                config.stream.keep_alive = ka;
            }
            if let Some(max) = file_cfg.stream.max_read_bytes {
                config.stream.max_read_bytes = max.max(1);
            }
        } else if cli.config.is_some() && !path.exists() {
            // Explicit --config that does not exist; malformed files were
            // already reported by load_file_config.
            warn!(path = %path.display(), "config file not found");
        }
    }

    // CLI overrides
    if !cli.paths.is_empty() {
        config.paths = cli.paths.clone();
    }
    if cli.verbose {
        config.verbose = true;
    }
    if cli.skip_blank_lines {
        config.skip_blank_lines = true;
    }
    if let Some(ka) = cli.keep_alive.and_then(keep_alive_from_secs) {
        config.stream.keep_alive = ka;
    }
    if let Some(Commands::Serve(ref serve)) = cli.command {
        if let Some(addr) = serve.bind.as_deref().and_then(parse_bind) {
            config.server.bind = addr;
        }
        if let Some(ref p) = serve.stream_path {
            config.server.stream_path = normalize_stream_path(p);
        }
    }

    config
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
