use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Everything needed to launch one child process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LaunchConfig {
    pub executable: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Complete environment for the child, replacing the inherited one.
    /// Names are unique; the last write wins.
    pub env: Option<BTreeMap<String, String>>,
    /// Payload written to the child's stdin by the capture invocation.
    pub stdin: Option<Vec<u8>>,
}

/// Which standard stream of a child an event or error refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

/// Output of a single completed capture invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedProcess {
    pub id: Uuid,
    pub executable: String,
    pub args: Vec<String>,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Pair of append-only log files for the logged invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogTarget {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl LaunchConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Set a single variable on top of the current map. Without one, the map
    /// starts as a snapshot of this process's environment.
    pub fn env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(inherited_environment)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }
}

/// This process's environment as a map. Variables whose name or value is
/// not UTF-8 are skipped.
pub fn inherited_environment() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

impl CapturedProcess {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl LogTarget {
    /// Derive `<base>.stdout.log` and `<base>.stderr.log` inside `logs_dir`.
    pub fn new<P: AsRef<Path>>(logs_dir: P, base_name: &str) -> Self {
        let dir = logs_dir.as_ref();
        Self {
            stdout: dir.join(format!("{base_name}.stdout.log")),
            stderr: dir.join(format!("{base_name}.stderr.log")),
        }
    }

    pub fn path_for(&self, stream: StreamKind) -> Option<&Path> {
        match stream {
            StreamKind::Stdout => Some(&self.stdout),
            StreamKind::Stderr => Some(&self.stderr),
            StreamKind::Stdin => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        };
        f.write_str(name)
    }
}
