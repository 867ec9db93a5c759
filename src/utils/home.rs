//! Home-directory expansion for user-supplied paths.

use std::path::PathBuf;

/// Expand a leading `~` or `~/` to the value of `HOME`.
///
/// Paths without a leading tilde are returned unchanged. When `HOME` is not
/// set the tilde is left in place rather than guessing.
pub fn expand_tilde(path: &str) -> String {
    if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).display().to_string();
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest).display().to_string();
        }
    }
    path.to_string()
}
