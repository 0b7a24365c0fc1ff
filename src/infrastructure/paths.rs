//! Path utilities for the bridge's data directory.
//!
//! Trace files and other local artifacts live under a per-user data directory.
//! Paths from configuration may start with `~`, which is expanded against the
//! user's home directory.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "REPLAY_BRIDGE_DATA_DIR";

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// Returns the data directory for bridge artifacts.
///
/// Resolution order:
/// 1. `$REPLAY_BRIDGE_DATA_DIR`
/// 2. `$HOME/.local/share/replay-bridge`
/// 3. `<temp dir>/replay-bridge`
#[must_use]
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    home_dir().map_or_else(
        || std::env::temp_dir().join("replay-bridge"),
        |home| home.join(".local").join("share").join("replay-bridge"),
    )
}

/// Expands a leading `~` to the user's home directory.
///
/// Paths without a leading `~`, or when no home directory is known, are
/// returned unchanged.
///
/// # Examples
///
/// ```
/// use replay_bridge::infrastructure::expand_tilde;
///
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    let Some(home) = home_dir() else {
        return path.to_string();
    };

    if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest).to_string_lossy().into_owned()
    } else if path == "~" {
        home.to_string_lossy().into_owned()
    } else {
        path.to_string()
    }
}

/// Resolves a configured file path.
///
/// Expands `~` and anchors relative paths in `data_dir`.
#[must_use]
pub fn resolve_in_data_dir(path: &str, data_dir: &Path) -> PathBuf {
    let expanded = PathBuf::from(expand_tilde(path));
    if expanded.is_absolute() {
        expanded
    } else {
        data_dir.join(expanded)
    }
}
