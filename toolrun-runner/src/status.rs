//! Exit status → typed result.

use std::process::ExitStatus;

use toolrun_core::{Result, ToolrunError};

/// Exit code reported when the child was terminated without one (e.g. by a signal).
pub const NO_EXIT_CODE: i32 = -1;

/// Map a raw OS exit status to `Ok(())` or `NonZeroExit`.
pub fn map_exit_status(executable: &str, args: &[String], status: ExitStatus) -> Result<()> {
    map_exit_code(executable, args, status.code())
}

/// Same as [`map_exit_status`], for a code already extracted from a status.
pub fn map_exit_code(executable: &str, args: &[String], code: Option<i32>) -> Result<()> {
    match code {
        Some(0) => Ok(()),
        other => Err(ToolrunError::NonZeroExit {
            code: other.unwrap_or(NO_EXIT_CODE),
            executable: executable.to_string(),
            args: args.to_vec(),
        }),
    }
}
