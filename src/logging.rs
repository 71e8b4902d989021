//! Tracing subscriber setup. Logs go to stderr; stdout carries progress lines only.

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// `RUST_LOG` wins; otherwise `gaspass=<level>` chosen by the `-v` count.
pub fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gaspass={}", level(verbosity))))
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_logging(verbosity: u8, format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter(verbosity));
    let result = match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };
    // already installed
    result.ok();
}
