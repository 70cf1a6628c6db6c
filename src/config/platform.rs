//! Platform path conventions.

use std::path::{Path, PathBuf};

/// Returns the user's home directory, or `.` if it cannot be determined.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the keyhop state directory (`~/.keyhop`).
#[must_use]
pub fn keyhop_dir() -> PathBuf {
    home_dir().join(".keyhop")
}

/// Returns the OpenSSH user directory (`~/.ssh`).
///
/// OpenSSH for Windows uses `%USERPROFILE%\.ssh` as well.
#[must_use]
pub fn ssh_dir() -> PathBuf {
    home_dir().join(".ssh")
}

/// Expands a leading `~` or `%d` (OpenSSH's home token) in a path.
#[must_use]
pub fn expand_home(value: &str) -> PathBuf {
    expand_home_with(value, &home_dir())
}

/// Expands a leading `~` or `%d` against `home`.
#[must_use]
pub fn expand_home_with(value: &str, home: &Path) -> PathBuf {
    if value == "~" || value == "%d" {
        return home.to_path_buf();
    }

    for prefix in ["~/", "~\\", "%d/", "%d\\"] {
        if let Some(rest) = value.strip_prefix(prefix) {
            return home.join(rest);
        }
    }

    PathBuf::from(value)
}

/// Shortens a path under `home` back to `~/...` for writing into configs.
#[must_use]
pub fn contract_home_with(path: &Path, home: &Path) -> String {
    match path.strip_prefix(home) {
        Ok(rest) if !rest.as_os_str().is_empty() => {
            format!("~/{}", rest.to_string_lossy().replace('\\', "/"))
        }
        _ => path.to_string_lossy().into_owned(),
    }
}
