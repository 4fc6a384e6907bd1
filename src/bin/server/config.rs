//! Server Configuration
//!
//! Resolves which configuration file the server starts from.

use kuba_metrics_query::config::Config;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "METRICS_QUERY_CONFIG";

/// Configuration file looked for in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "metrics-query.toml";

/// Load configuration from file or environment
///
/// Priority:
/// 1. `--config` command-line flag
/// 2. `METRICS_QUERY_CONFIG` environment variable
/// 3. `./metrics-query.toml`
/// 4. Default configuration
///
/// Environment overrides apply in every case. An explicitly named file that
/// fails to load is an error; a missing `./metrics-query.toml` is not.
pub fn load_config(cli_path: Option<&Path>) -> Result<Config, String> {
    let explicit: Option<PathBuf> = cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    if let Some(path) = explicit {
        let path = path.to_string_lossy();
        let config = Config::from_file_with_env(&path)?;
        eprintln!("[config] Loaded configuration from: {}", path);
        return Ok(config);
    }

    if Path::new(DEFAULT_CONFIG_FILE).exists() {
        let config = Config::from_file_with_env(DEFAULT_CONFIG_FILE)?;
        eprintln!("[config] Loaded configuration from {}", DEFAULT_CONFIG_FILE);
        return Ok(config);
    }

    eprintln!("[config] Using default configuration");
    Ok(Config::from_env())
}
