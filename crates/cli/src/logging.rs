use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable holding the log filter, e.g. `conveyor_migrate=debug`.
pub const LOG_ENV: &str = "CONVEYOR_LOG";

/// Install the global subscriber. Logs go to stderr so that stdout only
/// carries command output. `--quiet` lowers the default to warnings and
/// `--verbose` raises it to debug; `CONVEYOR_LOG` overrides both.
pub fn init(quiet: bool, verbose: bool) {
    let default_level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_ascii_lowercase()));

    // a subscriber may already be installed when running under a test harness
    let _ = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
