//! SSH identity and host alias management.
//!
//! Provides functionality for:
//! - Reading and writing the OpenSSH client config without losing hand edits
//! - Generating and tracking per-account key pairs
//! - Loading keys into the running SSH agent
//!
//! External programs (`ssh-keygen`, `ssh-add`) sit behind the
//! [`KeyGenerator`] and [`AgentBackend`] traits.

pub mod agent;
pub mod codec;
pub mod host;
pub mod identity;
pub mod keyfile;
pub mod keygen;
pub mod storage;

pub use agent::{AgentBackend, AgentController, AgentEndpoint, AgentError, LoadedKey, SshAddBackend};
pub use codec::{parse, serialize, ParseError};
pub use host::{Block, Directive, DuplicateAliasError, HostEntry, InvalidEntryError, Line, PatternBlock, SshConfig};
pub use identity::{GenerateOptions, Identity, IdentityRegistry, RegistryError};
pub use keygen::{KeyAlgorithm, KeyGenerator, KeygenError, OpenSshKeygen, PassphraseMode};
pub use storage::{ConfigFile, ConfigLock, StorageError};
