use std::path::Path;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route runner logs into the test harness' captured output.
///
/// Quiet by default; set `TOOLRUN_LOG=toolrun_runner=debug` to see launches.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env("TOOLRUN_LOG")
            .unwrap_or_else(|_| EnvFilter::new("toolrun_runner=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .compact()
            .try_init();
    });
}

/// Run a future with a 60-second timeout, so a deadlock fails instead of hanging.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(60), f)
        .await
        .expect("Test timed out after 60 seconds")
}

/// Write an executable shell script into `dir`.
#[allow(dead_code)]
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
