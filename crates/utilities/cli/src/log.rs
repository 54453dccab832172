//! Tracing subscriber setup.

use crate::CliResult;
use clap::{ArgAction, Args, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of log lines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Logging arguments shared by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct LogArgs {
    /// Verbosity level. `-v` logs at debug, `-vv` at trace.
    #[arg(short = 'v', long = "verbosity", action = ArgAction::Count, global = true)]
    pub v: u8,
    /// Log line format.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub format: LogFormat,
    /// Extra filter directives, e.g. `consistency=trace`.
    ///
    /// Ignored when `RUST_LOG` is set.
    #[arg(long = "log.filter", global = true)]
    pub filter: Option<String>,
}

impl LogArgs {
    /// Installs the global subscriber described by these arguments.
    pub fn init_tracing(&self) -> CliResult<()> {
        let filter = match &self.filter {
            Some(directives) if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() => Some(
                EnvFilter::builder()
                    .with_default_directive(verbosity_level(self.v).into())
                    .parse(directives)?,
            ),
            _ => None,
        };
        init_tracing_subscriber(self.v, self.format, filter)
    }
}

const fn verbosity_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global tracing subscriber.
///
/// Without an explicit `filter` the level follows `verbosity` and `RUST_LOG`
/// directives are layered on top.
pub fn init_tracing_subscriber(
    verbosity: u8,
    format: LogFormat,
    filter: Option<EnvFilter>,
) -> CliResult<()> {
    let filter = filter.unwrap_or_else(|| {
        EnvFilter::builder().with_default_directive(verbosity_level(verbosity).into()).from_env_lossy()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
    }
    Ok(())
}
