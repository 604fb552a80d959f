use anyhow::Result;
use std::path::PathBuf;

use crate::config;

/// Configuration path from the command line, or the default location.
pub fn resolve_config_path(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path),
        None => config::default_config_path(),
    }
}

/// Short form of a commit sha for display.
pub fn short_commit(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}
