#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout, write_script};

use std::collections::BTreeMap;
use std::path::PathBuf;

use toolrun_core::{LaunchConfig, StreamKind, ToolrunError};
use toolrun_runner::{EnvironmentAugmenter, ProcessLauncher};

const ONE_MIB: usize = 1024 * 1024;

fn sh(script: &str) -> LaunchConfig {
    LaunchConfig::new("sh").args(["-c", script])
}

#[tokio::test]
async fn test_capture_separates_streams() {
    init_tracing();
    let launcher = ProcessLauncher::new();

    let captured = launcher
        .capture(&sh("printf out; printf err >&2"))
        .await
        .unwrap();

    assert!(captured.success());
    assert_eq!(captured.stdout, b"out");
    assert_eq!(captured.stderr, b"err");
    assert_eq!(captured.executable, "sh");
    assert_eq!(captured.args, vec!["-c", "printf out; printf err >&2"]);
}

#[tokio::test]
async fn test_capture_reports_exit_code_without_error() {
    init_tracing();
    let captured = ProcessLauncher::new()
        .capture(&sh("printf partial; exit 4"))
        .await
        .unwrap();

    assert_eq!(captured.exit_code, Some(4));
    assert!(!captured.success());
    assert_eq!(captured.stdout, b"partial");
}

#[tokio::test]
async fn test_capture_feeds_stdin() {
    init_tracing();
    let config = LaunchConfig::new("cat").with_stdin("hello from the parent");

    let captured = ProcessLauncher::new().capture(&config).await.unwrap();

    assert_eq!(captured.stdout, b"hello from the parent");
    assert!(captured.stderr.is_empty());
}

#[tokio::test]
async fn test_capture_megabyte_on_both_streams_does_not_deadlock() {
    init_tracing();
    let script = format!(
        "head -c {ONE_MIB} /dev/zero | tr '\\0' 'o'; head -c {ONE_MIB} /dev/zero | tr '\\0' 'e' >&2"
    );

    let captured = with_timeout(ProcessLauncher::new().capture(&sh(&script)))
        .await
        .unwrap();

    assert!(captured.success());
    assert_eq!(captured.stdout.len(), ONE_MIB);
    assert_eq!(captured.stderr.len(), ONE_MIB);
    assert!(captured.stdout.iter().all(|&b| b == b'o'));
    assert!(captured.stderr.iter().all(|&b| b == b'e'));
}

#[tokio::test]
async fn test_capture_interleaved_large_output_is_lossless() {
    init_tracing();
    // Alternates between the streams so neither can be drained first.
    let script = "i=0; while [ $i -lt 20000 ]; do echo \"out $i\"; echo \"err $i\" >&2; i=$((i+1)); done";

    let captured = with_timeout(ProcessLauncher::new().capture(&sh(script)))
        .await
        .unwrap();

    let expected_out: String = (0..20000).map(|i| format!("out {i}\n")).collect();
    let expected_err: String = (0..20000).map(|i| format!("err {i}\n")).collect();
    assert_eq!(captured.stdout_lossy(), expected_out);
    assert_eq!(captured.stderr_lossy(), expected_err);
}

#[tokio::test]
async fn test_capture_large_stdin_round_trips_through_cat() {
    init_tracing();
    let payload: Vec<u8> = (0..2 * ONE_MIB).map(|i| (i % 253) as u8).collect();
    let config = LaunchConfig::new("cat").with_stdin(payload.clone());

    let captured = with_timeout(ProcessLauncher::new().capture(&config))
        .await
        .unwrap();

    assert_eq!(captured.stdout, payload);
}

#[tokio::test]
async fn test_capture_ignores_broken_pipe_on_stdin() {
    init_tracing();
    let config = sh("exit 0").with_stdin(vec![b'x'; 4 * ONE_MIB]);

    let captured = with_timeout(ProcessLauncher::new().capture(&config))
        .await
        .unwrap();

    assert!(captured.success());
}

#[tokio::test]
async fn test_capture_missing_executable_is_spawn_failure() {
    init_tracing();
    let config = LaunchConfig::new("/nonexistent/toolrun/definitely-missing").arg("--help");

    match ProcessLauncher::new().capture(&config).await {
        Err(ToolrunError::SpawnFailed {
            executable, args, ..
        }) => {
            assert_eq!(executable, "/nonexistent/toolrun/definitely-missing");
            assert_eq!(args, vec!["--help"]);
        }
        other => panic!("Expected SpawnFailed, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_capture_uses_working_dir_and_env() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = sh("pwd; printf '%s' \"$GREETING\" >&2")
        .with_working_dir(dir.path())
        .env_var("GREETING", "hello there");

    let captured = ProcessLauncher::new().capture(&config).await.unwrap();

    let reported = PathBuf::from(captured.stdout_lossy().trim());
    assert_eq!(
        std::fs::canonicalize(reported).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
    assert_eq!(captured.stderr, b"hello there");
}

#[tokio::test]
async fn test_capture_finds_tools_in_auxiliary_toolchain() {
    init_tracing();
    let aux = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(aux.path().join("bin")).unwrap();
    write_script(&aux.path().join("bin"), "aux-only-tool", "printf 'from aux'");

    let launcher = ProcessLauncher::new().with_augmenter(EnvironmentAugmenter::new(
        "TOOLRUN_TEST_AUX_HOME_CAPTURE",
        aux.path(),
        vec![PathBuf::from("usr/bin"), PathBuf::from("bin")],
    ));

    let captured = launcher
        .capture(&LaunchConfig::new("aux-only-tool"))
        .await
        .unwrap();
    assert_eq!(captured.stdout, b"from aux");

    // The child sees the augmented search path too.
    let captured = launcher.capture(&sh("printf '%s' \"$PATH\"")).await.unwrap();
    let first = std::env::split_paths(&captured.stdout_lossy()).next().unwrap();
    assert_eq!(first, aux.path().join("usr/bin"));
}

#[tokio::test]
async fn test_capture_env_map_replaces_inherited_environment() {
    init_tracing();
    std::env::set_var("TOOLRUN_TEST_PARENT_ONLY", "leaked");
    let env = BTreeMap::from([
        ("A".to_string(), "1".to_string()),
        ("PATH".to_string(), std::env::var("PATH").unwrap()),
    ]);
    let config = sh("printf '%s|%s' \"$A\" \"${TOOLRUN_TEST_PARENT_ONLY-unset}\"").with_env(env);

    let captured = ProcessLauncher::new().capture(&config).await.unwrap();

    assert_eq!(captured.stdout_lossy(), "1|unset");
}

#[tokio::test]
async fn test_capture_env_var_with_augmenter_keeps_inherited_path() {
    init_tracing();
    let aux = tempfile::tempdir().unwrap();
    let launcher = ProcessLauncher::new().with_augmenter(EnvironmentAugmenter::new(
        "TOOLRUN_TEST_AUX_HOME_ENV_VAR",
        aux.path(),
        vec![PathBuf::from("bin")],
    ));

    let config = sh("printf '%s' \"$A\"").env_var("A", "1");
    let captured = launcher.capture(&config).await.unwrap();

    assert!(captured.success());
    assert_eq!(captured.stdout, b"1");
}

#[tokio::test]
async fn test_capture_relative_program_in_relative_working_dir() {
    init_tracing();
    let dir = tempfile::tempdir_in(".").unwrap();
    write_script(dir.path(), "tool", "printf hi");
    let relative = PathBuf::from(dir.path().file_name().unwrap());

    let config = LaunchConfig::new("./tool").with_working_dir(&relative);
    let captured = ProcessLauncher::new().capture(&config).await.unwrap();

    assert_eq!(captured.stdout, b"hi");
}

#[test]
fn test_stream_kind_names_in_errors() {
    let err = ToolrunError::PipeUnavailable {
        executable: "sh".to_string(),
        args: vec![],
        stream: StreamKind::Stdin,
    };
    assert_eq!(err.to_string(), "No stdin pipe available for sh []");
}
