//! Child-process execution for toolrun.
//!
//! - [`launcher`]: spawns children, wires their pipes and waits for them.
//! - [`drain`]: cancellable workers that read a pipe to completion.
//! - [`tee`]: copies a stream into a log file and a live mirror.
//! - [`env`]: child environment with the auxiliary toolchain on `PATH`.
//! - [`status`]: exit status to typed result.

pub mod drain;
pub mod env;
pub mod launcher;
pub mod status;
pub mod tee;

pub use drain::{drain, join_pair, DrainError, DrainFailure, DrainHandle};
pub use env::{resolve_aux_home, EnvironmentAugmenter};
pub use launcher::{resolve_program, shell_command_line, ProcessLauncher};
pub use status::{map_exit_code, map_exit_status};
pub use tee::TeeSink;
