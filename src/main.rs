//! ft CLI - durable identities for the scenarios in plain-text feature files.

use clap::Parser;
use ft::cli::{Cli, Commands};
use ft::commands::{self, Output};
use ft::config::{ConfigOverrides, OutputFormat, resolve_config};
use ft::sync::SyncOptions;
use std::env;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `FT_LOG=debug`).
const LOG_ENV: &str = "FT_LOG";

fn main() {
    let cli = Cli::parse();
    init_logging();

    // Determine repo path: --repo flag > FT_REPO env > cwd
    let repo_path = resolve_repo_path(cli.repo_path, cli.human_readable);

    let mut overrides = ConfigOverrides::new();
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    if let Some(dir) = cli.features_dir {
        overrides = overrides.with_features_dir(dir);
    }

    let config = match resolve_config(&repo_path, &overrides) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e, cli.human_readable);
            process::exit(1);
        }
    };
    let human = config.output_format().is_human();
    let options = config.sync_options(&repo_path);

    if let Err(e) = run_command(cli.command, &options, human) {
        report_error(&e, human);
        process::exit(1);
    }
}

/// Log to stderr so stdout stays clean for JSON output.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report_error(e: &ft::Error, human: bool) {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
    }
}

/// Resolve the repository path based on explicit flag, environment variable, or
/// the current directory.
fn resolve_repo_path(explicit_path: Option<PathBuf>, human: bool) -> PathBuf {
    match explicit_path {
        Some(path) => {
            if !path.exists() {
                let e = ft::Error::NotFound(format!(
                    "Specified repo path does not exist: {}",
                    path.display()
                ));
                report_error(&e, human);
                process::exit(1);
            }
            path
        }
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn run_command(command: Commands, options: &SyncOptions, human: bool) -> Result<(), ft::Error> {
    match command {
        Commands::Init => {
            let result = commands::init(options)?;
            output(&result, human);
        }
        Commands::Sync => {
            let result = commands::sync(options)?;
            output(&result, human);
        }
        Commands::Status { id: None, .. } => {
            let result = commands::status_report(options)?;
            output(&result, human);
        }
        Commands::Status {
            id: Some(id),
            status,
        } => {
            if status.is_empty() {
                return Err(ft::Error::InvalidInput(
                    "usage: ft status <id> <status>".to_string(),
                ));
            }
            let result = commands::status_update(options, &id, &status)?;
            output(&result, human);
        }
        Commands::List {
            status,
            no_activity,
        } => {
            let result = commands::list(options, status.as_deref(), no_activity)?;
            output(&result, human);
        }
        Commands::Show { id, history: true } => {
            let result = commands::show_history(options, &id)?;
            output(&result, human);
        }
        Commands::Show { id, history: false } => {
            let result = commands::show(options, &id)?;
            output(&result, human);
        }
        Commands::Tests { id } => {
            let result = commands::tests(options, &id)?;
            output(&result, human);
        }
    }
    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    let text = if human {
        result.to_human()
    } else {
        result.to_json()
    };
    if !text.is_empty() {
        println!("{}", text);
    }
}
