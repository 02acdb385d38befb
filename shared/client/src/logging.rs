use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};
use tracing::Level;
use tracing_subscriber::filter::{Directive, FromEnvError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Console,
    Json,
}

impl FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(LogOutput::Console),
            "json" => Ok(LogOutput::Json),
            other => bail!("unknown log output {other:?}, expected \"console\" or \"json\""),
        }
    }
}

impl LogOutput {
    /// Reads the output format from `var`, falling back to the console when unset.
    pub fn from_env(var: &str) -> anyhow::Result<Self> {
        match std::env::var(var) {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid value for {var}")),
            Err(_) => Ok(LogOutput::default()),
        }
    }
}

// overridden by RUST_LOG
const DEFAULT_LEVEL: Level = Level::INFO;

pub struct LoggingBuilder {
    output: LogOutput,
    write_logs_file: Option<PathBuf>,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// Create a new logging builder with default settings
    pub fn new() -> Self {
        Self {
            output: LogOutput::Console,
            write_logs_file: None,
        }
    }

    /// Set the log output format
    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Set the log file path (optional)
    pub fn with_log_file<P: Into<Option<PathBuf>>>(mut self, path: P) -> Self {
        self.write_logs_file = path.into();
        self
    }

    /// Reads the log file path from `var`, if set and not empty.
    pub fn with_log_file_from_env(self, var: &str) -> Self {
        let path = std::env::var_os(var)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        self.with_log_file(path)
    }

    /// Install the global subscriber. Fails if one is already installed.
    pub fn init(self) -> anyhow::Result<()> {
        let output_filter = output_filter(DEFAULT_LEVEL)?;

        let output_layer = match self.output {
            LogOutput::Console => fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(output_filter)
                .boxed(),
            LogOutput::Json => fmt::layer()
                .json()
                .with_writer(std::io::stdout)
                .flatten_event(true)
                .with_current_span(true)
                .with_filter(output_filter)
                .boxed(),
        };

        let file_layer = match self.write_logs_file {
            Some(path) => {
                let log_file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&path)
                    .with_context(|| format!("failed to open log file {}", path.display()))?;
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(log_file)
                        .with_filter(detailed_filter(DEFAULT_LEVEL)?),
                )
            }
            None => None,
        };

        let subscriber = tracing_subscriber::registry()
            .with(output_layer)
            .with(file_layer);
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}

/// Create a new logging builder
pub fn logging() -> LoggingBuilder {
    LoggingBuilder::new()
}

// the transport stack logs every frame at debug level
const QUIET_TARGETS: [&str; 4] = ["h2=warn", "hyper=warn", "hyper_util=warn", "tower=warn"];

fn quiet(mut filter: EnvFilter) -> EnvFilter {
    for target in QUIET_TARGETS {
        if let Ok(directive) = target.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn output_filter(level: Level) -> Result<EnvFilter, FromEnvError> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;
    Ok(quiet(filter))
}

fn detailed_filter(level: Level) -> Result<EnvFilter, FromEnvError> {
    let filter = if std::env::var("WRITE_RUST_LOG").is_ok() {
        EnvFilter::builder()
            .with_env_var("WRITE_RUST_LOG")
            .from_env()?
    } else {
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env()?
    };
    Ok(quiet(filter))
}
