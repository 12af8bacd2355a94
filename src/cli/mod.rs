//! Command implementations for the `exec-core-cli` binary.
//!
//! ## Usage
//!
//! ```bash
//! exec-core-cli config show      # Effective configuration as KEY=VALUE
//! exec-core-cli config validate  # Exit 1 if the configuration looks wrong
//! exec-core-cli health --json    # Health report of a freshly built core
//! exec-core-cli fetch URL        # Issue one request through the pipeline
//! ```

pub mod config_cmd;
pub mod fetch_cmd;

/// Environment variable naming a TOML configuration file.
pub const CONFIG_FILE_ENV: &str = "EXEC_CORE_CONFIG";

/// Value following `name` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Whether the bare flag `name` appears in `args`.
pub fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}

/// Configuration file from `--config`, then `EXEC_CORE_CONFIG`.
pub fn config_path(args: &[String]) -> Option<String> {
    flag_value(args, "--config")
        .map(str::to_string)
        .or_else(|| std::env::var(CONFIG_FILE_ENV).ok())
        .filter(|path| !path.is_empty())
}
