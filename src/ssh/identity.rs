//! Identity registry.
//!
//! Tracks the key pairs keyhop knows about, by name, in
//! `~/.keyhop/identities.toml`. Key files are never removed or replaced
//! unless the caller asks for it explicitly.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keyfile::{self, KeyFileError, PublicKey};
use super::keygen::{KeyAlgorithm, KeyGenerator, KeygenError, KeygenRequest, PassphraseMode};
use super::storage::{self, StorageError};

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Name already registered.
    #[error("identity '{0}' already exists")]
    DuplicateName(String),

    /// No identity with that name.
    #[error("no identity named '{0}'")]
    NotFound(String),

    /// Name unusable as a file name component.
    #[error("invalid identity name '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidName(String),

    /// Key file exists and no force flag was given.
    #[error("{} already exists (use --force to replace it)", .0.display())]
    WouldOverwrite(PathBuf),

    /// A key file the identity points at is gone.
    #[error("key file {} does not exist", .0.display())]
    MissingKeyFile(PathBuf),

    /// External key generation failed.
    #[error(transparent)]
    Keygen(#[from] KeygenError),

    /// Key file content could not be understood.
    #[error("{}: {source}", path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: KeyFileError,
    },

    /// File system error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Registry file is not valid TOML.
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Registry could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A known key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub algorithm: KeyAlgorithm,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub has_passphrase: bool,
    /// Creation time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Identity {
    /// Creates an identity for an existing private key; the public key is
    /// expected beside it with a `.pub` suffix.
    #[must_use]
    pub fn new(name: impl Into<String>, private_key_path: impl Into<PathBuf>, comment: impl Into<String>) -> Self {
        let private_key_path = private_key_path.into();
        Self {
            name: name.into(),
            algorithm: KeyAlgorithm::default(),
            public_key_path: public_key_path_for(&private_key_path),
            private_key_path,
            comment: comment.into(),
            has_passphrase: false,
            created_at: None,
        }
    }

    /// Reads and parses the public key file.
    pub fn public_key(&self) -> Result<PublicKey, RegistryError> {
        let text = fs::read_to_string(&self.public_key_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RegistryError::MissingKeyFile(self.public_key_path.clone())
            } else {
                StorageError::Io {
                    path: self.public_key_path.clone(),
                    source: e,
                }
                .into()
            }
        })?;

        PublicKey::parse(&text).map_err(|source| RegistryError::KeyFile {
            path: self.public_key_path.clone(),
            source,
        })
    }

    /// Fingerprint of the public key, if it can be read.
    #[must_use]
    pub fn fingerprint(&self) -> Option<String> {
        self.public_key().ok().map(|k| k.fingerprint())
    }
}

/// Returns `<private>.pub`.
#[must_use]
pub fn public_key_path_for(private_key: &Path) -> PathBuf {
    let mut name = private_key.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

/// Checks that a name is usable inside a key file name.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

/// Parameters for [`IdentityRegistry::generate`].
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub name: String,
    pub algorithm: KeyAlgorithm,
    pub comment: String,
    /// Directory the key pair is written to.
    pub key_dir: PathBuf,
    pub passphrase: PassphraseMode,
    /// Replace existing key files and registry entry.
    pub force: bool,
}

impl GenerateOptions {
    /// Private key path: `<key_dir>/id_<algorithm>_<name>`.
    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.key_dir
            .join(format!("id_{}_{}", self.algorithm.as_str(), self.name))
    }
}

/// Registry file layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    identities: Vec<Identity>,
}

/// Named key pairs, persisted as TOML.
#[derive(Debug)]
pub struct IdentityRegistry {
    path: PathBuf,
    identities: BTreeMap<String, Identity>,
}

impl IdentityRegistry {
    /// Creates an empty registry that will be saved to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            identities: BTreeMap::new(),
        }
    }

    /// Returns the default registry path (`~/.keyhop/identities.toml`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        crate::config::keyhop_dir().join("identities.toml")
    }

    /// Loads the registry; a missing file yields an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let mut registry = Self::new(path);

        let Some(content) = storage::read_capped(&registry.path)? else {
            return Ok(registry);
        };

        let file: RegistryFile = toml::from_str(&content).map_err(|source| RegistryError::Parse {
            path: registry.path.clone(),
            source,
        })?;

        for identity in file.identities {
            registry.identities.insert(identity.name.clone(), identity);
        }

        tracing::debug!(
            "loaded {} identities from {}",
            registry.identities.len(),
            registry.path.display()
        );
        Ok(registry)
    }

    /// Writes the registry atomically.
    pub fn save(&self) -> Result<(), RegistryError> {
        let file = RegistryFile {
            identities: self.identities.values().cloned().collect(),
        };
        let content = toml::to_string_pretty(&file)?;
        storage::write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Identities sorted by name.
    pub fn list(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.get(name)
    }

    /// Finds the identity owning a private key file.
    #[must_use]
    pub fn find_by_private_key(&self, path: &Path) -> Option<&Identity> {
        self.identities.values().find(|i| i.private_key_path == path)
    }

    /// Finds the identity whose public key has `fingerprint`.
    #[must_use]
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<&Identity> {
        self.identities
            .values()
            .find(|i| i.fingerprint().as_deref() == Some(fingerprint))
    }

    /// Adds an existing key pair.
    pub fn register(&mut self, identity: Identity) -> Result<(), RegistryError> {
        validate_name(&identity.name)?;
        if self.identities.contains_key(&identity.name) {
            return Err(RegistryError::DuplicateName(identity.name));
        }
        tracing::info!("registered identity {}", identity.name);
        self.identities.insert(identity.name.clone(), identity);
        Ok(())
    }

    /// Generates a new key pair and records it.
    ///
    /// The tool writes into a staging directory beside the destination.
    /// The files are renamed into place only once both exist; if either
    /// rename fails the previous pair is put back.
    pub fn generate(
        &mut self,
        keygen: &dyn KeyGenerator,
        options: &GenerateOptions,
    ) -> Result<Identity, RegistryError> {
        validate_name(&options.name)?;

        if !options.force && self.identities.contains_key(&options.name) {
            return Err(RegistryError::DuplicateName(options.name.clone()));
        }

        let private_key = options.private_key_path();
        let public_key = public_key_path_for(&private_key);

        if !options.force {
            for path in [&private_key, &public_key] {
                if path.exists() {
                    return Err(RegistryError::WouldOverwrite(path.clone()));
                }
            }
        }

        storage::ensure_private_dir(&options.key_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".keyhop-keygen-")
            .tempdir_in(&options.key_dir)
            .map_err(storage::io_error(&options.key_dir))?;

        let file_name = private_key
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| options.name.clone().into());
        let staged_private = staging.path().join(file_name);
        let staged_public = public_key_path_for(&staged_private);

        keygen.generate(&KeygenRequest {
            algorithm: options.algorithm,
            comment: &options.comment,
            output: &staged_private,
            passphrase: options.passphrase,
        })?;

        for path in [&staged_private, &staged_public] {
            if !path.exists() {
                return Err(KeygenError::MissingOutput {
                    program: keygen.program(),
                    path: path.clone(),
                }
                .into());
            }
        }

        let has_passphrase = match options.passphrase {
            PassphraseMode::Empty => false,
            PassphraseMode::Prompt => private_key_encrypted(&staged_private)?,
        };

        if options.force && (private_key.exists() || public_key.exists()) {
            tracing::warn!("replacing key pair {}", private_key.display());
        }
        install_pair(
            staging.path(),
            [
                (staged_private.as_path(), private_key.as_path()),
                (staged_public.as_path(), public_key.as_path()),
            ],
        )?;

        let identity = Identity {
            name: options.name.clone(),
            algorithm: options.algorithm,
            private_key_path: private_key,
            public_key_path: public_key,
            comment: options.comment.clone(),
            has_passphrase,
            created_at: Some(chrono::Local::now().to_rfc3339()),
        };

        tracing::info!(
            "generated {} identity {} at {}",
            identity.algorithm,
            identity.name,
            identity.private_key_path.display()
        );
        self.identities
            .insert(identity.name.clone(), identity.clone());
        Ok(identity)
    }

    /// Forgets an identity. Key files are deleted only if `delete_files`.
    pub fn remove(&mut self, name: &str, delete_files: bool) -> Result<Identity, RegistryError> {
        let identity = self
            .identities
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if delete_files {
            for path in [&identity.private_key_path, &identity.public_key_path] {
                match fs::remove_file(path) {
                    Ok(()) => tracing::info!("deleted key file {}", path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        // Keep the record so the user can retry.
                        self.identities.insert(identity.name.clone(), identity.clone());
                        return Err(storage::io_error(path)(e).into());
                    }
                }
            }
        }

        Ok(identity)
    }

    /// Changes the passphrase of an identity's private key.
    pub fn rotate_passphrase(
        &mut self,
        keygen: &dyn KeyGenerator,
        name: &str,
    ) -> Result<&Identity, RegistryError> {
        let identity = self
            .identities
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if !identity.private_key_path.exists() {
            return Err(RegistryError::MissingKeyFile(identity.private_key_path.clone()));
        }

        keygen.change_passphrase(&identity.private_key_path)?;
        identity.has_passphrase = private_key_encrypted(&identity.private_key_path)?;
        tracing::info!("rotated passphrase for {}", identity.name);
        Ok(identity)
    }
}

/// Renames each staged file over its destination.
///
/// Files already at a destination are moved into `staging` first. If any
/// rename fails, installed files are removed and the old ones put back.
fn install_pair(staging: &Path, pairs: [(&Path, &Path); 2]) -> Result<(), StorageError> {
    let mut set_aside: Vec<(&Path, PathBuf)> = Vec::new();
    let mut installed: Vec<&Path> = Vec::new();

    let mut result = Ok(());
    for (index, &(_, target)) in pairs.iter().enumerate() {
        if target.exists() {
            let backup = staging.join(format!("previous-{}", index));
            if let Err(e) = fs::rename(target, &backup) {
                result = Err(storage::io_error(target)(e));
                break;
            }
            set_aside.push((target, backup));
        }
    }
    if result.is_ok() {
        for (staged, target) in pairs {
            if let Err(e) = fs::rename(staged, target) {
                result = Err(storage::io_error(target)(e));
                break;
            }
            installed.push(target);
        }
    }

    if result.is_err() {
        for target in installed {
            if let Err(e) = fs::remove_file(target) {
                tracing::warn!("cannot remove {}: {}", target.display(), e);
            }
        }
        for (target, backup) in set_aside {
            if let Err(e) = fs::rename(&backup, target) {
                tracing::error!(
                    "cannot restore {} (old copy left at {}): {}",
                    target.display(),
                    backup.display(),
                    e
                );
            }
        }
    }
    result
}

/// Reads a private key file and reports whether it is encrypted.
pub fn private_key_encrypted(path: &Path) -> Result<bool, RegistryError> {
    let text = fs::read_to_string(path).map_err(storage::io_error(path))?;
    keyfile::is_encrypted(&text).map_err(|source| RegistryError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}
