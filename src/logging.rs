// 📜 Logging - tracing subscriber setup for the CLI
//
// Logs go to stderr; stdout carries the run summary.

use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies ("info",
/// "debug" with --verbose, "trace" with --debug). Logs go to stderr so the
/// printed summary on stdout stays clean.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

/// Filter string for the CLI verbosity flags
pub fn default_filter(verbose: bool, debug: bool) -> &'static str {
    if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(false, false), "info");
        assert_eq!(default_filter(true, false), "debug");
        assert_eq!(default_filter(true, true), "trace");
    }
}
