//! Config subcommands: show, defaults, validate.
//!
//! These read configuration from the environment and an optional TOML file
//! without starting any background work.

use crate::config::{self, ConfigError, CoreConfig, EffectiveConfig};

/// Load from `path` when given, otherwise from the environment alone.
pub fn load_config(path: Option<&str>) -> Result<CoreConfig, ConfigError> {
    match path {
        Some(path) => config::load_file(path),
        None => Ok(config::load()),
    }
}

/// Print effective config as key-value pairs to stdout.
pub fn run_show(path: Option<&str>) -> i32 {
    match load_config(path) {
        Ok(cfg) => {
            print_config(&cfg.effective_config());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// Print default config values, ignoring the environment.
pub fn run_defaults() {
    print_config(&CoreConfig::default().effective_config());
}

/// Validate configuration for likely mistakes.
///
/// Returns 0 if valid, 1 if loading fails or any warnings are found.
pub fn run_validate(path: Option<&str>) -> i32 {
    let cfg = match load_config(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let warnings = cfg.warnings();
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }

    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    for (key, value) in cfg.entries() {
        println!("{}={}", key, value);
    }
}
