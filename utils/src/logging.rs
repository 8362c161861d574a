//! Configurable logging for binaries and tests.

use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Logging configuration, shared by every binary in the workspace.
///
/// The filter itself is controlled by `RUST_LOG`, as usual. These options only
/// control the output format.
#[derive(Clone, Debug, Default, Args)]
pub struct Config {
    #[clap(long, env = "RUST_LOG_FORMAT", value_enum, default_value = "full")]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

impl Config {
    /// Initialize the global tracing subscriber.
    ///
    /// Calling this more than once is a no-op, so binaries and tests can both
    /// call it unconditionally.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,holograph_monitor=debug"));

        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let res = match self.log_format {
            LogFormat::Full => builder.try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
        // A subscriber installed by an earlier call (e.g. another test in the
        // same process) is fine.
        if res.is_err() {
            tracing::debug!("tracing subscriber already installed");
        }
    }
}
