//! On-disk SSH config file handle.
//!
//! The config file is shared with the user's editor, so every write goes to
//! a temporary file in the same directory which then replaces the original
//! with a rename. A lock file next to the config marks the critical section
//! between load and save for concurrent keyhop invocations.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::codec::{self, ParseError};
use super::host::SshConfig;

/// Maximum accepted size for files read by keyhop (1MB).
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Symlink hops followed before giving up on a write target.
const MAX_LINK_HOPS: usize = 16;

/// Errors that can occur while reading or writing managed files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File I/O error on a specific path.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File too large.
    #[error("{}: file too large (max {MAX_FILE_SIZE} bytes)", path.display())]
    FileTooLarge { path: PathBuf },

    /// Another process holds the lock file.
    #[error("{} is locked by another keyhop process", path.display())]
    Locked { path: PathBuf },

    /// The config text is malformed.
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

impl StorageError {
    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::FileTooLarge { path }
            | Self::Locked { path }
            | Self::Parse { path, .. } => path,
        }
    }
}

/// Returns a closure that attaches `path` to an I/O error.
pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Creates a directory (and parents) readable only by the owner on Unix.
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<(), StorageError> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }

    fs::create_dir_all(dir).map_err(io_error(dir))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(io_error(dir))?;
    }

    Ok(())
}

/// Reads a text file, refusing anything over the size cap.
///
/// Returns `None` if the file does not exist.
pub(crate) fn read_capped(path: &Path) -> Result<Option<String>, StorageError> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path)(e)),
    };

    if metadata.len() > MAX_FILE_SIZE {
        return Err(StorageError::FileTooLarge {
            path: path.to_path_buf(),
        });
    }

    fs::read_to_string(path).map(Some).map_err(io_error(path))
}

/// Replaces `path` with `contents` atomically (mode 0600 on Unix).
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    write_atomic_with(path, |file| file.write_all(contents))
}

/// Follows symlinks from `path` to the file a write should replace.
///
/// A dangling link resolves to the path it points at.
pub(crate) fn resolve_link(path: &Path) -> Result<PathBuf, StorageError> {
    let mut target = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        match fs::symlink_metadata(&target) {
            Ok(m) if m.file_type().is_symlink() => {
                let next = fs::read_link(&target).map_err(io_error(&target))?;
                target = match target.parent() {
                    Some(parent) => parent.join(next),
                    None => next,
                };
            }
            Ok(_) => return Ok(target),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(target),
            Err(e) => return Err(io_error(&target)(e)),
        }
    }
    Err(StorageError::Io {
        path: path.to_path_buf(),
        source: io::Error::other("too many levels of symbolic links"),
    })
}

/// Writes through `fill` into a temporary sibling of the file `path` names,
/// then renames it over that file. A symlink at `path` is kept and its
/// target replaced. If `fill` fails the temporary file is discarded and the
/// target is left as it was.
pub(crate) fn write_atomic_with<F>(path: &Path, fill: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let target = resolve_link(path)?;
    if target != path {
        tracing::debug!("{} links to {}", path.display(), target.display());
    }
    let path = target.as_path();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_private_dir(&parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".keyhop-")
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(io_error(&parent))?;

    fill(temp.as_file_mut()).map_err(io_error(temp.path()))?;
    temp.as_file_mut().flush().map_err(io_error(path))?;
    temp.as_file().sync_all().map_err(io_error(path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(io_error(path))?;
    }

    temp.persist(path).map_err(|e| io_error(path)(e.error))?;
    tracing::debug!("wrote {}", path.display());
    Ok(())
}

/// Exclusive hold on a config file, released when dropped.
#[derive(Debug)]
pub struct ConfigLock {
    path: PathBuf,
}

impl ConfigLock {
    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("failed to release lock {}: {}", self.path.display(), e);
        } else {
            tracing::trace!("released lock {}", self.path.display());
        }
    }
}

/// Handle to an SSH client config file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    /// Creates a handle for the config at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the default config path (`~/.ssh/config`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        crate::config::ssh_dir().join("config")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Path of the advisory lock file (`<config>.lock`).
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Takes the write lock.
    ///
    /// Fails with [`StorageError::Locked`] if another process holds it. A
    /// lock left behind by a crashed process must be removed by hand.
    pub fn lock(&self) -> Result<ConfigLock, StorageError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            ensure_private_dir(parent)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                // Owner pid, for stale lock diagnosis.
                if let Err(e) = writeln!(file, "{}", std::process::id()) {
                    tracing::debug!("cannot record pid in {}: {}", lock_path.display(), e);
                }
                tracing::trace!("acquired lock {}", lock_path.display());
                Ok(ConfigLock { path: lock_path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StorageError::Locked { path: lock_path })
            }
            Err(e) => Err(io_error(&lock_path)(e)),
        }
    }

    /// Loads and parses the config. A missing file is an empty config.
    pub fn load(&self) -> Result<SshConfig, StorageError> {
        let Some(text) = read_capped(&self.path)? else {
            tracing::debug!("{} does not exist, starting empty", self.path.display());
            return Ok(SshConfig::new());
        };

        codec::parse(&text).map_err(|source| StorageError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Serializes and atomically writes the config.
    ///
    /// Requires the lock so writes only happen inside the critical section.
    pub fn save(&self, _lock: &ConfigLock, config: &SshConfig) -> Result<(), StorageError> {
        let text = codec::serialize(config);
        write_atomic(&self.path, text.as_bytes())
    }
}
