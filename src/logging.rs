//! Log subscriber installation.
//!
//! Logs go to stderr so that command output on stdout stays machine-readable.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use staticpub_config::{LogConfig, LogFormat};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// `RUST_LOG`, when set, replaces the configured level.
fn filter(config: &LogConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => configured(&config.level),
    }
}

fn configured(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).or_raise(|| ErrorKind::Logging)
}

pub fn init(config: &LogConfig) -> Result<()> {
    let fmt_layer = match config.format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).with_target(false).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };
    tracing_subscriber::registry().with(filter(config)?).with(fmt_layer).try_init().or_raise(|| ErrorKind::Logging)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("info", true)]
    #[case("warn,staticpub_library=debug", true)]
    #[case("staticpub=loudest", false)]
    fn test_configured_level(#[case] level: &str, #[case] valid: bool) {
        match configured(level) {
            Ok(_) => assert!(valid),
            Err(err) => {
                assert!(!valid);
                assert!(matches!(&*err, ErrorKind::Logging));
            },
        }
    }
}
