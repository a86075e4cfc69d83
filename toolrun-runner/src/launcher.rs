use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, Stderr};
use tokio::process::{Child, ChildStdin, Command};
use toolrun_core::{
    CapturedProcess, LaunchConfig, LogTarget, Result, StreamKind, ToolrunConfig, ToolrunError,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::drain::{drain, join_pair};
use crate::env::{EnvironmentAugmenter, PATH_VAR};
use crate::status::map_exit_status;
use crate::tee::TeeSink;

/// Launches child processes and turns their termination into typed results
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    logs_dir: PathBuf,
    augmenter: Option<EnvironmentAugmenter>,
}

/// What an error from one invocation is attributed to
struct Invocation<'a> {
    id: Uuid,
    executable: &'a str,
    args: &'a [String],
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            augmenter: None,
        }
    }

    pub fn from_config(config: &ToolrunConfig) -> Self {
        let launcher = Self::new().with_logs_dir(&config.logs_dir);
        if config.aux_toolchain.enabled {
            launcher.with_augmenter(EnvironmentAugmenter::from_settings(&config.aux_toolchain))
        } else {
            launcher
        }
    }

    pub fn with_logs_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.logs_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_augmenter(mut self, augmenter: EnvironmentAugmenter) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn augmenter(&self) -> Option<&EnvironmentAugmenter> {
        self.augmenter.as_ref()
    }

    pub fn log_target(&self, log_name: &str) -> LogTarget {
        LogTarget::new(&self.logs_dir, log_name)
    }

    /// Complete child environment for this launch, or `None` to inherit ours.
    pub fn effective_environment(
        &self,
        config: &LaunchConfig,
    ) -> Result<Option<BTreeMap<String, String>>> {
        match &self.augmenter {
            Some(augmenter) => augmenter.effective_environment(config.env.as_ref()).map(Some),
            None => Ok(config.env.clone()),
        }
    }

    /// Run the child with all three streams piped and collect its output.
    ///
    /// The exit status is returned as data, not mapped to an error.
    pub async fn capture(&self, config: &LaunchConfig) -> Result<CapturedProcess> {
        let inv = Invocation::new(&config.executable, &config.args);
        let started_at = Utc::now();
        let start_instant = Instant::now();

        info!(
            execution_id = %inv.id,
            executable = %inv.executable,
            args = ?inv.args,
            "capturing process output"
        );

        let env = self.effective_environment(config)?;
        let mut command =
            build_command(&inv, &config.executable, &config.args, config, env.as_ref())?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = inv.spawn(&mut command)?;
        let (stdout, stderr, status) = match drive_capture(&inv, &mut child, config).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(execution_id = %inv.id, error = %err, "capture failed");
                reap(&inv, &mut child).await;
                return Err(err);
            }
        };

        let duration_ms = start_instant.elapsed().as_millis() as u64;
        info!(
            execution_id = %inv.id,
            exit_code = ?status.code(),
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            duration_ms,
            "captured process exited"
        );

        Ok(CapturedProcess {
            id: inv.id,
            executable: config.executable.clone(),
            args: config.args.clone(),
            exit_code: status.code(),
            stdout,
            stderr,
            started_at,
            duration_ms,
        })
    }

    /// Run the child with stdout and stderr appended to `<log_name>.*.log`
    /// and mirrored live to this process's stderr.
    pub async fn run_logged(&self, config: &LaunchConfig, log_name: &str) -> Result<()> {
        let inv = Invocation::new(&config.executable, &config.args);
        let target = self.log_target(log_name);

        info!(
            execution_id = %inv.id,
            executable = %inv.executable,
            args = ?inv.args,
            stdout_log = %target.stdout.display(),
            stderr_log = %target.stderr.display(),
            "running logged process"
        );

        let env = self.effective_environment(config)?;
        let mut command =
            build_command(&inv, &config.executable, &config.args, config, env.as_ref())?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Opened before spawning so a bad logs directory never leaves a child behind.
        let stdout_sink = TeeSink::open(&target.stdout, tokio::io::stderr())
            .await
            .map_err(|source| inv.stream_io(StreamKind::Stdout, source))?;
        let stderr_sink = TeeSink::open(&target.stderr, tokio::io::stderr())
            .await
            .map_err(|source| inv.stream_io(StreamKind::Stderr, source))?;

        let mut child = inv.spawn(&mut command)?;
        let status = match drive_logged(&inv, &mut child, stdout_sink, stderr_sink).await {
            Ok(status) => status,
            Err(err) => {
                error!(execution_id = %inv.id, error = %err, "logged run failed");
                reap(&inv, &mut child).await;
                return Err(err);
            }
        };

        inv.finish(status)
    }

    /// Run the child with inherited stdio and wait for it.
    pub async fn run(&self, config: &LaunchConfig) -> Result<()> {
        let inv = Invocation::new(&config.executable, &config.args);
        info!(
            execution_id = %inv.id,
            executable = %inv.executable,
            args = ?inv.args,
            "running process"
        );

        let env = self.effective_environment(config)?;
        let mut command =
            build_command(&inv, &config.executable, &config.args, config, env.as_ref())?;
        self.run_inherited(&inv, &mut command).await
    }

    /// Run executable and args as one command line through the platform shell.
    ///
    /// Failures are attributed to the whole command line with no arguments.
    pub async fn run_shell(&self, config: &LaunchConfig) -> Result<()> {
        let command_line = shell_command_line(&config.executable, &config.args);
        let inv = Invocation::new(&command_line, &[]);
        info!(execution_id = %inv.id, command = %command_line, "running shell command");

        // The shell would report a missing program as exit 127; fail as a spawn error instead.
        let env = self.effective_environment(config)?;
        resolve_program(&config.executable, env.as_ref(), config.working_dir.as_deref())
            .map_err(|source| inv.spawn_failed(source))?;

        let (shell, flag) = platform_shell();
        let shell_args = vec![flag.to_string(), command_line.clone()];
        let mut command = build_command(&inv, shell, &shell_args, config, env.as_ref())?;
        self.run_inherited(&inv, &mut command).await
    }

    async fn run_inherited(&self, inv: &Invocation<'_>, command: &mut Command) -> Result<()> {
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = inv.spawn(command)?;
        match inv.wait(&mut child).await {
            Ok(status) => inv.finish(status),
            Err(err) => {
                reap(inv, &mut child).await;
                Err(err)
            }
        }
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `program` and configure a command for it. When `env` is given it
/// becomes the child's whole environment.
fn build_command(
    inv: &Invocation<'_>,
    program: &str,
    program_args: &[String],
    config: &LaunchConfig,
    env: Option<&BTreeMap<String, String>>,
) -> Result<Command> {
    let resolved = resolve_program(program, env, config.working_dir.as_deref())
        .map_err(|source| inv.spawn_failed(source))?;
    debug!(execution_id = %inv.id, program = %resolved.display(), "resolved program");

    let mut command = Command::new(resolved);
    command.args(program_args).kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }
    if let Some(env) = env {
        command.env_clear().envs(env);
    }
    Ok(command)
}

impl<'a> Invocation<'a> {
    fn new(executable: &'a str, args: &'a [String]) -> Self {
        Self {
            id: Uuid::new_v4(),
            executable,
            args,
        }
    }

    fn spawn(&self, command: &mut Command) -> Result<Child> {
        command.spawn().map_err(|source| {
            error!(execution_id = %self.id, error = %source, "failed to spawn process");
            self.spawn_failed(source)
        })
    }

    fn take_pipe<T>(&self, pipe: Option<T>, stream: StreamKind) -> Result<T> {
        pipe.ok_or_else(|| ToolrunError::PipeUnavailable {
            executable: self.executable.to_string(),
            args: self.args.to_vec(),
            stream,
        })
    }

    async fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        child.wait().await.map_err(|source| ToolrunError::Wait {
            executable: self.executable.to_string(),
            args: self.args.to_vec(),
            source,
        })
    }

    fn finish(&self, status: ExitStatus) -> Result<()> {
        info!(
            execution_id = %self.id,
            exit_code = ?status.code(),
            success = status.success(),
            "process exited"
        );
        map_exit_status(self.executable, self.args, status)
    }

    fn spawn_failed(&self, source: io::Error) -> ToolrunError {
        ToolrunError::SpawnFailed {
            executable: self.executable.to_string(),
            args: self.args.to_vec(),
            source,
        }
    }

    fn stream_io(&self, stream: StreamKind, source: io::Error) -> ToolrunError {
        ToolrunError::StreamIo {
            executable: self.executable.to_string(),
            args: self.args.to_vec(),
            stream,
            source,
        }
    }
}

async fn drive_capture(
    inv: &Invocation<'_>,
    child: &mut Child,
    config: &LaunchConfig,
) -> Result<(Vec<u8>, Vec<u8>, ExitStatus)> {
    let stdin = inv.take_pipe(child.stdin.take(), StreamKind::Stdin)?;
    let stdout = inv.take_pipe(child.stdout.take(), StreamKind::Stdout)?;
    let stderr = inv.take_pipe(child.stderr.take(), StreamKind::Stderr)?;

    // Both readers must be running while stdin is written.
    let stdout_drain = drain(StreamKind::Stdout, read_all(stdout));
    let stderr_drain = drain(StreamKind::Stderr, read_all(stderr));

    if let Err(source) = feed_stdin(stdin, config.stdin.as_deref()).await {
        stdout_drain.cancel().await;
        stderr_drain.cancel().await;
        return Err(inv.stream_io(StreamKind::Stdin, source));
    }

    let (stdout_bytes, stderr_bytes) = join_pair(stdout_drain, stderr_drain)
        .await
        .map_err(|failure| failure.into_error(inv.executable, inv.args))?;
    let status = inv.wait(child).await?;
    Ok((stdout_bytes, stderr_bytes, status))
}

async fn drive_logged(
    inv: &Invocation<'_>,
    child: &mut Child,
    mut stdout_sink: TeeSink<File, Stderr>,
    mut stderr_sink: TeeSink<File, Stderr>,
) -> Result<ExitStatus> {
    let stdout = inv.take_pipe(child.stdout.take(), StreamKind::Stdout)?;
    let stderr = inv.take_pipe(child.stderr.take(), StreamKind::Stderr)?;

    let stdout_drain = drain(StreamKind::Stdout, async move { stdout_sink.run(stdout).await });
    let stderr_drain = drain(StreamKind::Stderr, async move { stderr_sink.run(stderr).await });

    let (stdout_bytes, stderr_bytes) = join_pair(stdout_drain, stderr_drain)
        .await
        .map_err(|failure| failure.into_error(inv.executable, inv.args))?;
    debug!(execution_id = %inv.id, stdout_bytes, stderr_bytes, "logged streams drained");

    inv.wait(child).await
}

async fn read_all<R>(mut stream: R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Write `payload` (if any) and close stdin. A child that stopped reading is not an error.
async fn feed_stdin(mut stdin: ChildStdin, payload: Option<&[u8]>) -> io::Result<()> {
    if let Some(payload) = payload.filter(|p| !p.is_empty()) {
        if ignore_broken_pipe(stdin.write_all(payload).await)? {
            return Ok(());
        }
    }
    ignore_broken_pipe(stdin.shutdown().await)?;
    Ok(())
}

/// `Ok(true)` when the error was a swallowed broken pipe.
fn ignore_broken_pipe(result: io::Result<()>) -> io::Result<bool> {
    match result {
        Ok(()) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("child closed its stdin early");
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

/// Kill and wait for a child on a failure path so no process record is left behind.
async fn reap(inv: &Invocation<'_>, child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(execution_id = %inv.id, error = %err, "child already gone");
    }
    if let Err(err) = child.wait().await {
        warn!(execution_id = %inv.id, error = %err, "failed to reap child process");
    }
}

/// Locate `program` the way the child would: against the `PATH` of `env`
/// when given, else ours, with relative paths taken from `working_dir`.
///
/// The result is absolute, so it stays valid once the child's working
/// directory has been changed.
pub fn resolve_program(
    program: &str,
    env: Option<&BTreeMap<String, String>>,
    working_dir: Option<&Path>,
) -> io::Result<PathBuf> {
    let search_path = match env {
        Some(env) => env
            .get(PATH_VAR)
            .or_else(|| {
                env.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(PATH_VAR))
                    .map(|(_, value)| value)
            })
            .map(OsString::from),
        None => std::env::var_os(PATH_VAR),
    };
    let cwd = std::env::current_dir()?;
    let cwd = match working_dir {
        Some(dir) => cwd.join(dir),
        None => cwd,
    };

    which::which_in(program, search_path, cwd).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("cannot locate executable '{program}': {e}"),
        )
    })
}

/// Join executable and arguments into one shell-safe command line.
pub fn shell_command_line(executable: &str, args: &[String]) -> String {
    let words = std::iter::once(executable).chain(args.iter().map(String::as_str));
    if cfg!(windows) {
        words.map(quote_for_cmd).collect::<Vec<_>>().join(" ")
    } else {
        shell_words::join(words)
    }
}

fn quote_for_cmd(word: &str) -> String {
    let needs_quotes = word.is_empty()
        || word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '&' | '|' | '<' | '>' | '^'));
    if needs_quotes {
        format!("\"{}\"", word.replace('"', "\"\""))
    } else {
        word.to_string()
    }
}

fn platform_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}
