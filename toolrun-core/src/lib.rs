//! Shared data model, errors and configuration for toolrun.

pub mod config;
pub mod error;
pub mod models;

pub use config::{AuxToolchainSettings, ToolrunConfig};
pub use error::{Result, ToolrunError};
pub use models::*;
