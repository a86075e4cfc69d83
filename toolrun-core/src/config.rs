use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ToolrunError};

pub const DEFAULT_AUX_HOME_VAR: &str = "TOOLRUN_AUX_HOME";

/// Top-level `toolrun.toml` contents
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolrunConfig {
    /// Directory receiving `<name>.stdout.log` / `<name>.stderr.log`.
    pub logs_dir: PathBuf,
    pub aux_toolchain: AuxToolchainSettings,
}

/// Where the auxiliary toolchain lives and which of its directories go on `PATH`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AuxToolchainSettings {
    pub enabled: bool,
    /// Variable that overrides the toolchain home when set.
    pub home_var: String,
    /// Used when `home_var` is unset. A leading `~` is expanded.
    pub default_home: String,
    /// Prepended to the search path in this order.
    pub path_subdirs: Vec<String>,
}

impl Default for ToolrunConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            aux_toolchain: AuxToolchainSettings::default(),
        }
    }
}

impl Default for AuxToolchainSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            home_var: DEFAULT_AUX_HOME_VAR.to_string(),
            default_home: "~/.toolrun/aux".to_string(),
            path_subdirs: vec!["usr/bin".to_string(), "bin".to_string()],
        }
    }
}

impl ToolrunConfig {
    pub fn validate(&self) -> Result<()> {
        let aux = &self.aux_toolchain;
        if aux.home_var.trim().is_empty() {
            return Err(ToolrunError::ConfigError(
                "aux_toolchain.home_var must not be empty".to_string(),
            ));
        }
        for subdir in &aux.path_subdirs {
            if subdir.trim().is_empty() {
                return Err(ToolrunError::ConfigError(
                    "aux_toolchain.path_subdirs contains an empty entry".to_string(),
                ));
            }
            if Path::new(subdir).is_absolute() {
                return Err(ToolrunError::ConfigError(format!(
                    "aux_toolchain.path_subdirs entry '{subdir}' must be relative to the toolchain home"
                )));
            }
        }
        Ok(())
    }
}

/// Deserialize a config file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ToolrunConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: ToolrunConfig = toml::from_str(&contents)?;
    Ok(config)
}

pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ToolrunConfig> {
    let config = load_from_path(path)?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file yields the defaults.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<ToolrunConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(ToolrunConfig::default());
    }
    load_and_validate(path)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("toolrun.toml")
}
