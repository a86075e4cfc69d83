use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use toolrun_core::{config, inherited_environment, CapturedProcess, LaunchConfig, ToolrunError};
use toolrun_runner::ProcessLauncher;
use tracing::debug;

mod logging;

#[derive(Parser)]
#[command(name = "toolrun")]
#[command(about = "Run external tools with captured or logged output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (defaults to ./toolrun.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive, overrides TOOLRUN_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Do not prepend the auxiliary toolchain to PATH
    #[arg(long, global = true)]
    no_aux: bool,
}

#[derive(Args)]
struct LaunchArgs {
    /// Working directory for the child
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Variable set for the child on top of the inherited environment (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Executable followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tool and capture its stdout and stderr
    Capture {
        /// File whose contents are written to the tool's stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,

        /// Print the captured result as JSON instead of replaying the output
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Run a tool, appending its output to <logs_dir>/<name>.{stdout,stderr}.log
    Logged {
        /// Base name of the log files
        #[arg(short, long)]
        name: String,

        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Run a tool with inherited stdio
    Run {
        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Run a tool through the platform shell as a single command line
    Shell {
        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Show the search path (or whole environment) children would get
    Env {
        /// Print every variable, not just PATH entries
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref())?;

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut settings = if cli.config.is_some() {
        config::load_and_validate(&config_path)?
    } else {
        config::load_or_default(&config_path)?
    };
    if cli.no_aux {
        settings.aux_toolchain.enabled = false;
    }
    debug!(
        config = %config_path.display(),
        logs_dir = %settings.logs_dir.display(),
        aux_enabled = settings.aux_toolchain.enabled,
        "Configuration loaded"
    );

    let launcher = ProcessLauncher::from_config(&settings);
    if let Some(augmenter) = launcher.augmenter() {
        augmenter.export_to_process();
    }

    let result = match cli.command {
        Commands::Capture {
            stdin_file,
            json,
            launch,
        } => {
            let mut launch_config = launch_config(launch);
            if let Some(path) = stdin_file {
                let payload = fs::read(&path).map_err(|e| {
                    anyhow::anyhow!("Failed to read stdin file {}: {}", path.display(), e)
                })?;
                launch_config = launch_config.with_stdin(payload);
            }
            match launcher.capture(&launch_config).await {
                Ok(captured) => {
                    print_capture(&captured, json)?;
                    if !captured.success() {
                        process::exit(captured.exit_code.unwrap_or(1));
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
        Commands::Logged { name, launch } => {
            launcher.run_logged(&launch_config(launch), &name).await
        }
        Commands::Run { launch } => launcher.run(&launch_config(launch)).await,
        Commands::Shell { launch } => launcher.run_shell(&launch_config(launch)).await,
        Commands::Env { all } => {
            let environment = launcher.effective_environment(&LaunchConfig::default())?;
            print_environment(environment, all);
            Ok(())
        }
    };

    if let Err(err) = result {
        exit_with(err);
    }

    Ok(())
}

fn launch_config(args: LaunchArgs) -> LaunchConfig {
    let mut words = args.command.into_iter();
    // clap guarantees at least one word.
    let executable = words.next().unwrap_or_default();
    let mut config = LaunchConfig::new(executable).args(words);
    if let Some(dir) = args.cwd {
        config = config.with_working_dir(dir);
    }
    for (name, value) in args.env {
        config = config.env_var(name, value);
    }
    config
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("invalid KEY=VALUE pair: '{raw}'")),
    }
}

fn print_capture(captured: &CapturedProcess, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(captured)?);
        return Ok(());
    }
    std::io::stdout().write_all(&captured.stdout)?;
    std::io::stderr().write_all(&captured.stderr)?;
    Ok(())
}

fn print_environment(environment: Option<BTreeMap<String, String>>, all: bool) {
    let environment = environment.unwrap_or_else(inherited_environment);

    if all {
        for (name, value) in &environment {
            println!("{name}={value}");
        }
        return;
    }

    if let Some(path) = environment.get("PATH") {
        for entry in std::env::split_paths(path) {
            println!("{}", entry.display());
        }
    }
}

fn exit_with(err: ToolrunError) -> ! {
    eprintln!("Error: {err}");
    match err.code() {
        Some(code) if code > 0 => process::exit(code),
        _ => process::exit(1),
    }
}
