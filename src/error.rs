//! Top-level error type and exit codes.
//!
//! Every module has its own error enum; [`Error`] wraps them so commands can
//! use `?` throughout, and [`ErrorKind`] maps each failure to the process
//! exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::SettingsError;
use crate::ssh::{
    AgentError, DuplicateAliasError, InvalidEntryError, KeygenError, RegistryError, StorageError,
};

/// Failure category, one exit code each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    DuplicateAlias,
    DuplicateName,
    Keygen,
    AgentUnavailable,
    PassphraseRequired,
    FileSystem,
    NotFound,
    Validation,
    Agent,
}

impl ErrorKind {
    /// Process exit code.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Parse => 10,
            Self::DuplicateAlias => 11,
            Self::DuplicateName => 12,
            Self::Keygen => 13,
            Self::AgentUnavailable => 14,
            Self::PassphraseRequired => 15,
            Self::FileSystem => 16,
            Self::NotFound => 17,
            Self::Validation => 18,
            Self::Agent => 19,
        }
    }
}

/// Any failure a command can report.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Keygen(#[from] KeygenError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    DuplicateAlias(#[from] DuplicateAliasError),

    #[error(transparent)]
    InvalidEntry(#[from] InvalidEntryError),

    /// Unknown host alias.
    #[error("no host alias '{0}'")]
    HostNotFound(String),

    /// A host entry points at an identity file that does not exist.
    #[error("host '{alias}': identity file {} does not exist", path.display())]
    MissingIdentityFile { alias: String, path: PathBuf },

    /// Invalid input.
    #[error("{0}")]
    Validation(String),

    /// Output could not be encoded.
    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing the report failed.
    #[error("cannot write output: {0}")]
    Output(#[source] std::io::Error),
}

impl Error {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Settings(_) | Self::Json(_) | Self::Output(_) => ErrorKind::FileSystem,
            Self::Storage(e) => storage_kind(e),
            Self::Registry(e) => registry_kind(e),
            Self::Keygen(_) => ErrorKind::Keygen,
            Self::Agent(e) => agent_kind(e),
            Self::DuplicateAlias(_) => ErrorKind::DuplicateAlias,
            Self::HostNotFound(_) => ErrorKind::NotFound,
            Self::MissingIdentityFile { .. } | Self::InvalidEntry(_) | Self::Validation(_) => {
                ErrorKind::Validation
            }
        }
    }

    /// Process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }

    /// A suggestion for the user, if there is an obvious one.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Agent(AgentError::Unavailable(_)) => Some(
                "start an agent (eval \"$(ssh-agent -s)\") and make sure SSH_AUTH_SOCK is set"
                    .to_string(),
            ),
            Self::Agent(AgentError::PassphraseRequired(_)) => {
                Some("run the command from an interactive terminal".to_string())
            }
            Self::Storage(StorageError::Locked { path }) => Some(format!(
                "if no other keyhop is running, delete {}",
                path.display()
            )),
            Self::DuplicateAlias(e) => Some(format!(
                "pick another alias or run `keyhop remove-host {}` first",
                e.0
            )),
            Self::Keygen(KeygenError::Spawn { .. })
            | Self::Registry(RegistryError::Keygen(KeygenError::Spawn { .. })) => Some(
                "install OpenSSH or set keygen_program in ~/.keyhop/keyhoprc".to_string(),
            ),
            Self::MissingIdentityFile { .. } => {
                Some("generate it with `keyhop generate-key` or fix the path".to_string())
            }
            _ => None,
        }
    }
}

fn storage_kind(e: &StorageError) -> ErrorKind {
    match e {
        StorageError::Parse { .. } => ErrorKind::Parse,
        StorageError::Io { .. } | StorageError::FileTooLarge { .. } | StorageError::Locked { .. } => {
            ErrorKind::FileSystem
        }
    }
}

fn registry_kind(e: &RegistryError) -> ErrorKind {
    match e {
        RegistryError::DuplicateName(_) => ErrorKind::DuplicateName,
        RegistryError::NotFound(_) => ErrorKind::NotFound,
        RegistryError::InvalidName(_)
        | RegistryError::WouldOverwrite(_)
        | RegistryError::MissingKeyFile(_)
        | RegistryError::KeyFile { .. } => ErrorKind::Validation,
        RegistryError::Keygen(_) => ErrorKind::Keygen,
        RegistryError::Storage(e) => storage_kind(e),
        RegistryError::Parse { .. } => ErrorKind::Parse,
        RegistryError::Serialize(_) => ErrorKind::FileSystem,
    }
}

fn agent_kind(e: &AgentError) -> ErrorKind {
    match e {
        AgentError::Unavailable(_) => ErrorKind::AgentUnavailable,
        AgentError::PassphraseRequired(_) => ErrorKind::PassphraseRequired,
        AgentError::NotLoaded(_) => ErrorKind::NotFound,
        AgentError::MissingKey(_) => ErrorKind::Validation,
        AgentError::Spawn { .. } | AgentError::Failed { .. } => ErrorKind::Agent,
    }
}

/// Result alias for command code.
pub type Result<T> = std::result::Result<T, Error>;
