//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Level priority:
//! 1. `--log-level` flag
//! 2. `TOOLRUN_LOG` environment variable (`info`, `debug`, or a full filter directive)
//! 3. `info`
//!
//! Logs go to stderr so stdout carries only child output.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV_VAR: &str = "TOOLRUN_LOG";

pub fn init_logging(cli_level: Option<&str>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    Ok(())
}
