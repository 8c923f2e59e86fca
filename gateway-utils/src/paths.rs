//! Path utilities for mcp-gateway
//!
//! Handles XDG Base Directory specification compliance for config,
//! state and runtime directories.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "mcp-gateway";

/// Get project directories
fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the runtime directory
///
/// Location: `$XDG_RUNTIME_DIR/mcp-gateway` or `/tmp/mcp-gateway-$UID`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg_runtime).join(APP_NAME)
    } else {
        // Fallback to /tmp with UID for security
        // SAFETY: getuid() is always safe to call
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
    }
}

/// Get the relay's single-instance lock file
///
/// Location: `$XDG_RUNTIME_DIR/mcp-gateway/relay.lock`
pub fn relay_lock_file() -> PathBuf {
    runtime_dir().join("relay.lock")
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/mcp-gateway` or `~/.config/mcp-gateway`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(fallback_config_dir)
}

/// Get the main configuration file path
///
/// Location: `$XDG_CONFIG_HOME/mcp-gateway/config.toml`
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/mcp-gateway` or `~/.local/state/mcp-gateway`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(fallback_state_dir)
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/mcp-gateway/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Get the fallback log file for one connection
///
/// Location: `<dir>/bridge_{connection_id}.log`
pub fn fallback_log_file(dir: &Path, connection_id: &str) -> PathBuf {
    dir.join(format!("bridge_{}.log", sanitize_file_component(connection_id)))
}

/// Replace anything that is not safe in a file name
fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

// Fallback implementations when ProjectDirs is unavailable

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn fallback_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME)
}

fn fallback_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join(APP_NAME)
}
