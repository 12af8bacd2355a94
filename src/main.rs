//! exec-core command line entry point.
//!
//! ## CLI Subcommands
//!
//! - `exec-core-cli config show|defaults|validate` - Inspect configuration
//! - `exec-core-cli health` - Health report of a freshly built core (exit 0/1)
//! - `exec-core-cli fetch URL` - Issue one request through the pipeline

use std::process::ExitCode;
use std::sync::Arc;

use exec_core::cli::{config_cmd, config_path, fetch_cmd, has_flag};
use exec_core::health::HealthState;
use exec_core::pipeline::HttpTransport;
use exec_core::telemetry::{init_logging, LogConfig};
use exec_core::{Collaborators, ExecCore};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let config_file = config_path(&args);

    match command {
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show(config_file.as_deref()) as u8),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate(config_file.as_deref()) as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "health" => {
            let code = run_health(config_file.as_deref(), has_flag(&args, "--json")).await;
            ExitCode::from(code as u8)
        }
        "fetch" => {
            if let Err(e) = init_logging(&LogConfig::from_env()) {
                eprintln!("Logging disabled: {}", e);
            }
            let config = match config_cmd::load_config(config_file.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let code = fetch_cmd::run_fetch(config, &args).await;
            ExitCode::from(code as u8)
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("exec-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

/// Build a core from configuration and report its health.
///
/// Returns 0 when healthy, 1 otherwise.
async fn run_health(config_file: Option<&str>, json: bool) -> i32 {
    let config = match config_cmd::load_config(config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let transport = match HttpTransport::new(std::time::Duration::from_secs(10)) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let core = ExecCore::new(config, Collaborators::new(Arc::new(transport)));
    let report = core.health();

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        println!("state: {:?}", report.state);
        println!("ready: {}", report.ready);
        println!("concurrency_limit: {}", report.concurrency_limit);
        println!("queue_depth: {}", report.queue_depth);
        println!("cache_entries: {}", report.cache_entries);
    }

    core.shutdown().await;
    if report.state == HealthState::Healthy {
        0
    } else {
        1
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "exec-core {}
Adaptive execution core: prioritized tasks, caching and resilient requests

USAGE:
    exec-core-cli <COMMAND> [OPTIONS]

COMMANDS:
    config    Show, list defaults of, or validate configuration
    health    Build a core from configuration and report its health
    fetch     Issue one request through the request pipeline
    help      Print this message or help for a command
    version   Print version information

GLOBAL OPTIONS:
    --config FILE  Load configuration from a TOML file (or EXEC_CORE_CONFIG)

Run 'exec-core-cli help <COMMAND>' for details on a command.",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "config" => {
            eprintln!(
                "exec-core-cli config - Inspect configuration

USAGE:
    exec-core-cli config <show|defaults|validate> [--config FILE]

SUBCOMMANDS:
    show      Print effective values as KEY=VALUE (default)
    defaults  Print built-in defaults, ignoring the environment
    validate  Exit 1 if the configuration fails to load or looks wrong

DESCRIPTION:
    Values are layered: defaults, then the TOML file, then EXEC_CORE_*
    environment variables."
            );
        }
        "health" => {
            eprintln!(
                "exec-core-cli health - Health report

USAGE:
    exec-core-cli health [--json] [--config FILE]

EXIT CODES:
    0  Core is healthy
    1  Core is degraded, unhealthy, or failed to load configuration"
            );
        }
        "fetch" => {
            eprintln!(
                "exec-core-cli fetch - Issue one request

USAGE:
    exec-core-cli fetch URL [OPTIONS]

OPTIONS:
    --retries N       Retry failed attempts N times (default: 0)
    --timeout-ms N    Per-attempt timeout in milliseconds
    --priority P      high, normal or low (default: normal)
    --progress        Report download progress on stderr
    --config FILE     Load configuration from file

DESCRIPTION:
    Prints the JSON response body. Non-JSON responses are rejected.

EXIT CODES:
    0  Success
    1  Request failed
    2  Usage error"
            );
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
        }
    }
}
