//! Tracing subscriber setup for applications embedding the coordinator

use eyre::Result;
use tracing::Level;

/// Map a level name to a tracing level
///
/// Unknown names fall back to INFO.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a global fmt subscriber
///
/// `RUST_LOG` is honored; the given level (or INFO) is added on top of it as a
/// directive. Calling this again after a subscriber is installed is a no-op.
pub fn setup_logging(level: Option<&str>) -> Result<()> {
    let level = level.map(parse_level).unwrap_or(Level::INFO);

    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging initialized (level: {})", level);
    } else {
        tracing::debug!("setup_logging: subscriber already installed");
    }
    Ok(())
}
