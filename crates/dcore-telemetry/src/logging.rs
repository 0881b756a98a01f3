//! Subscriber construction.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

/// Transport crates that log every frame and handshake at `debug`.
///
/// Capped at `warn` unless [`LogConfig::quiet_transports`] is off. Explicit
/// directives for the same target still win.
pub const TRANSPORT_TARGETS: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "rustls",
    "tungstenite",
    "tokio_tungstenite",
];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// How often rolling log files start a new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// One file per day.
    #[default]
    Daily,
    /// One file per hour.
    Hourly,
    /// A single file.
    Never,
}

impl From<FileRotation> for Rotation {
    fn from(value: FileRotation) -> Self {
        match value {
            FileRotation::Daily => Self::DAILY,
            FileRotation::Hourly => Self::HOURLY,
            FileRotation::Never => Self::NEVER,
        }
    }
}

/// Line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, for reading a single shard's session by eye.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// JSON lines.
    Json,
    /// The `tracing-subscriber` default layout.
    Full,
}

impl std::str::FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            _ => Err(TelemetryError::UnknownFormat(s.to_owned())),
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
    /// Rolling files `<directory>/<prefix>.<date>`.
    File {
        /// Directory, created if missing.
        directory: PathBuf,
        /// File name prefix.
        prefix: String,
        /// Rotation period.
        #[serde(default)]
        rotation: FileRotation,
    },
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base level (`"info"`, `"debug"`, ...).
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Output target.
    pub target: LogTarget,
    /// Prefix lines with a timestamp.
    pub timestamps: bool,
    /// Colour output. Always off for file targets.
    pub ansi: bool,
    /// Cap [`TRANSPORT_TARGETS`] at `warn`.
    pub quiet_transports: bool,
    /// Extra directives such as `dcore_gateway=trace`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            timestamps: true,
            ansi: true,
            quiet_transports: true,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Defaults at `level`.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Use `format`.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Write to `target`.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Write to rolling files under `directory`.
    #[must_use]
    pub fn with_file_logging(
        self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        rotation: FileRotation,
    ) -> Self {
        self.with_target(LogTarget::File {
            directory: directory.into(),
            prefix: prefix.into(),
            rotation,
        })
    }

    /// Append a directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Let transport crates log at the base level.
    #[must_use]
    pub fn with_transport_logs(mut self) -> Self {
        self.quiet_transports = false;
        self
    }

    /// Drop timestamps.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Drop colours.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    fn uses_ansi(&self) -> bool {
        self.ansi && !matches!(self.target, LogTarget::File { .. })
    }

    pub(crate) fn filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level).map_err(|e| TelemetryError::InvalidFilter {
            directive: self.level.clone(),
            message: e.to_string(),
        })?;

        let transport = self
            .quiet_transports
            .then_some(TRANSPORT_TARGETS)
            .unwrap_or_default()
            .iter()
            .map(|target| format!("{target}=warn"));

        for directive in transport.chain(self.directives.iter().cloned()) {
            let parsed = directive.parse().map_err(
                |e: tracing_subscriber::filter::ParseError| TelemetryError::InvalidFilter {
                    directive: directive.clone(),
                    message: e.to_string(),
                },
            )?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

#[cfg(feature = "config")]
impl TryFrom<&dcore_config::LoggingSection> for LogConfig {
    type Error = TelemetryError;

    fn try_from(section: &dcore_config::LoggingSection) -> Result<Self, Self::Error> {
        Ok(Self {
            level: section.level.to_lowercase(),
            format: section.format.parse()?,
            directives: section.directives.clone(),
            ..Self::default()
        })
    }
}

/// Install the global subscriber described by `config`.
///
/// Only the first successful call in a process takes effect; later calls
/// return [`TelemetryError::AlreadyInitialized`].
///
/// # Errors
///
/// Returns an error for an invalid level or directive, an uncreatable log
/// directory, or when a subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.filter()?;

    let layer = match &config.target {
        LogTarget::Stdout => format_layer(config, std::io::stdout),
        LogTarget::Stderr => format_layer(config, std::io::stderr),
        LogTarget::File {
            directory,
            prefix,
            rotation,
        } => {
            std::fs::create_dir_all(directory)?;
            let appender = RollingFileAppender::new((*rotation).into(), directory, prefix);
            format_layer(config, appender)
        },
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

/// Install stderr logging at `info`.
///
/// # Errors
///
/// Returns an error when a subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}

fn format_layer<W>(config: &LogConfig, writer: W) -> BoxedLayer
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.uses_ansi())
        .with_target(true);

    match (config.format, config.timestamps) {
        (LogFormat::Json, true) => layer.json().boxed(),
        (LogFormat::Json, false) => layer.json().without_time().boxed(),
        (LogFormat::Pretty, true) => layer.pretty().boxed(),
        (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => layer.compact().boxed(),
        (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
        (LogFormat::Full, true) => layer.boxed(),
        (LogFormat::Full, false) => layer.without_time().boxed(),
    }
}
