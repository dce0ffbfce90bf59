//! Tracing/logging configuration for toolbridge
//!
//! Supports:
//! - Multiple verbosity levels: default (WARN), verbose (INFO), debug, quiet (ERROR), silent (off)
//! - Pretty (colored), JSON or compact output, always on stderr
//! - File logging at DEBUG level while the terminal shows the configured level
//!
//! Stdout is never written to: in `serve` mode it carries the MCP stream.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Targets owned by this crate. Events under `mcp` and `tool_server` carry
/// explicit targets, everything else uses the module path.
const CRATE_TARGETS: &[&str] = &["toolbridge", "mcp", "tool_server"];

/// Log output format
#[derive(Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Colored human-readable output
    #[default]
    Pretty,
    /// Structured JSON output (one JSON object per line)
    Json,
    /// Compact single-line format
    Compact,
}

/// Tracing configuration built from CLI args and the config file
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    /// No terminal output at all
    pub silent: bool,
    pub format: LogFormat,
    /// Optional log file path (writes DEBUG+ regardless of terminal level)
    pub log_file: Option<PathBuf>,
}

impl TracingConfig {
    /// Terminal level, `None` when silent
    fn terminal_level(&self) -> Option<Level> {
        if self.silent {
            None
        } else if self.quiet {
            Some(Level::ERROR)
        } else if self.debug {
            Some(Level::DEBUG)
        } else if self.verbose {
            Some(Level::INFO)
        } else {
            Some(Level::WARN)
        }
    }

    fn level_specified(&self) -> bool {
        self.verbose || self.debug || self.quiet || self.silent
    }
}

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// `toolbridge=info,mcp=info,tool_server=info,warn` for INFO
fn directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    let mut out: Vec<String> = CRATE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    out.push("warn".to_string());
    out.join(",")
}

/// CLI flags win over `RUST_LOG`; without flags `RUST_LOG` wins over the default
fn terminal_filter(level: Level, cli_specified: bool) -> EnvFilter {
    if cli_specified {
        EnvFilter::new(directives(level))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)))
    }
}

fn make_terminal_layer(format: &LogFormat, filter: EnvFilter) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

/// Initialize tracing. Later calls are ignored.
pub fn init_tracing(config: TracingConfig) {
    if TRACING_INITIALIZED.get().is_some() {
        return;
    }

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if let Some(log_path) = &config.log_file {
        match std::fs::File::create(log_path) {
            Ok(file) => layers.push(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(file)
                    .with_filter(EnvFilter::new(directives(Level::DEBUG)))
                    .boxed(),
            ),
            // No subscriber yet, so this cannot go through tracing
            Err(e) => eprintln!("Warning: Failed to create log file {:?}: {}", log_path, e),
        }
    }

    if let Some(level) = config.terminal_level() {
        let filter = terminal_filter(level, config.level_specified());
        layers.push(make_terminal_layer(&config.format, filter));
    }

    if layers.is_empty() {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
    } else {
        let _ = tracing_subscriber::registry().with(layers).try_init();
    }

    let _ = TRACING_INITIALIZED.set(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let mut config = TracingConfig::default();
        assert_eq!(config.terminal_level(), Some(Level::WARN));
        assert!(!config.level_specified());

        config.verbose = true;
        assert_eq!(config.terminal_level(), Some(Level::INFO));
        config.debug = true;
        assert_eq!(config.terminal_level(), Some(Level::DEBUG));
        config.quiet = true;
        assert_eq!(config.terminal_level(), Some(Level::ERROR));
        config.silent = true;
        assert_eq!(config.terminal_level(), None);
        assert!(config.level_specified());
    }

    #[test]
    fn test_directives_cover_crate_targets() {
        assert_eq!(
            directives(Level::INFO),
            "toolbridge=info,mcp=info,tool_server=info,warn"
        );
    }

    #[test]
    fn test_log_format_names() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
