//! Child environment with the auxiliary toolchain on the search path.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use toolrun_core::{inherited_environment, AuxToolchainSettings, Result, ToolrunError};
use tracing::debug;

/// Canonical spelling of the search-path variable in the produced map.
pub const PATH_VAR: &str = "PATH";

/// Computes child environments that put the auxiliary toolchain first on `PATH`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentAugmenter {
    home_var: String,
    aux_home: PathBuf,
    path_subdirs: Vec<PathBuf>,
}

impl EnvironmentAugmenter {
    pub fn new<P: AsRef<Path>>(
        home_var: impl Into<String>,
        aux_home: P,
        path_subdirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            home_var: home_var.into(),
            aux_home: aux_home.as_ref().to_path_buf(),
            path_subdirs,
        }
    }

    /// Resolve the toolchain home from the override variable or the configured default.
    pub fn from_settings(settings: &AuxToolchainSettings) -> Self {
        let aux_home = resolve_aux_home(&settings.home_var, &settings.default_home);
        debug!(
            home_var = %settings.home_var,
            aux_home = %aux_home.display(),
            "resolved auxiliary toolchain home"
        );
        Self::new(
            settings.home_var.clone(),
            aux_home,
            settings.path_subdirs.iter().map(PathBuf::from).collect(),
        )
    }

    pub fn aux_home(&self) -> &Path {
        &self.aux_home
    }

    pub fn home_var(&self) -> &str {
        &self.home_var
    }

    /// Directories prepended to the search path, in order.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        self.path_subdirs
            .iter()
            .map(|subdir| self.aux_home.join(subdir))
            .collect()
    }

    /// Build the environment for a child process.
    ///
    /// Starts from `base`, or the inherited environment when `base` is
    /// `None`. Every case variant of `PATH` is removed and replaced by a
    /// single `PATH` entry: the toolchain directories, then the entries of
    /// `PATH`, then those of any other spelling such as `Path`.
    pub fn effective_environment(
        &self,
        base: Option<&BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, String>> {
        let mut environment = match base {
            Some(map) => map.clone(),
            None => inherited_environment(),
        };

        let mut variants: Vec<String> = environment
            .keys()
            .filter(|name| name.eq_ignore_ascii_case(PATH_VAR))
            .cloned()
            .collect();
        // `PATH` itself first, then the other spellings.
        variants.sort_by_key(|name| name != PATH_VAR);

        let mut entries = self.search_dirs();
        for name in variants {
            if let Some(value) = environment.remove(&name) {
                entries.extend(env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
            }
        }

        let joined = env::join_paths(&entries)
            .map_err(|e| ToolrunError::ConfigError(format!("cannot build {PATH_VAR}: {e}")))?;
        let joined = joined.into_string().map_err(|raw: OsString| {
            ToolrunError::ConfigError(format!("{PATH_VAR} is not valid UTF-8: {raw:?}"))
        })?;

        debug!(path = %joined, "computed child search path");
        environment.insert(PATH_VAR.to_string(), joined);
        Ok(environment)
    }

    /// Publish the resolved toolchain home in this process's own environment,
    /// so that other in-process callers and later children can see it.
    pub fn export_to_process(&self) {
        debug!(
            home_var = %self.home_var,
            aux_home = %self.aux_home.display(),
            "exporting auxiliary toolchain home"
        );
        env::set_var(&self.home_var, &self.aux_home);
    }
}

/// Value of `home_var` when set and non-empty, otherwise `default_home` with `~` expanded.
pub fn resolve_aux_home(home_var: &str, default_home: &str) -> PathBuf {
    match env::var_os(home_var) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => expand_home(default_home),
    }
}

fn expand_home(path: &str) -> PathBuf {
    let rest = if path == "~" {
        ""
    } else if let Some(rest) = path.strip_prefix("~/") {
        rest
    } else {
        return PathBuf::from(path);
    };

    match env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        Some(home) if rest.is_empty() => PathBuf::from(home),
        Some(home) => PathBuf::from(home).join(rest),
        None => PathBuf::from(path),
    }
}
