//! SSH agent control.
//!
//! The agent is an external service that may or may not be running for the
//! current session. [`AgentController`] checks for it before every call and
//! turns its absence into [`AgentError::Unavailable`]; the actual
//! add/list/remove traffic goes through an [`AgentBackend`], which in
//! production is `ssh-add`.
//!
//! # Platform Support
//! - **Unix/Linux/macOS**: `SSH_AUTH_SOCK` Unix domain socket
//! - **Windows**: `SSH_AUTH_SOCK` if set, else the OpenSSH named pipe

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::Serialize;
use thiserror::Error;

use super::keyfile::{self, PublicKey};

/// Environment variable carrying the agent socket address.
pub const AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";

/// Default agent client program.
pub const DEFAULT_AGENT_PROGRAM: &str = "ssh-add";

/// Named pipe used by the Windows OpenSSH agent service.
#[cfg(windows)]
const OPENSSH_AGENT_PIPE: &str = r"\\.\pipe\openssh-ssh-agent";

/// `ssh-add` exit status when it cannot reach the agent.
const SSH_ADD_NO_AGENT: i32 = 2;

/// Errors from agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No agent could be reached.
    #[error("no SSH agent is reachable: {0}")]
    Unavailable(String),

    /// The key is encrypted and there is no way to ask for its passphrase.
    #[error("{} is passphrase protected and no terminal is available to ask for it", .0.display())]
    PassphraseRequired(PathBuf),

    /// The agent holds no key with this fingerprint.
    #[error("the agent holds no key with fingerprint {0}")]
    NotLoaded(String),

    /// The private key file does not exist.
    #[error("private key {} does not exist", .0.display())]
    MissingKey(PathBuf),

    /// The agent client program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The agent refused the request.
    #[error("{program} failed (status {}): {stderr}", status.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Where the agent listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEndpoint {
    /// Unix domain socket path.
    Socket(PathBuf),
    /// Windows named pipe.
    NamedPipe(String),
}

impl AgentEndpoint {
    /// Reads the endpoint from the process environment.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_value(std::env::var_os(AUTH_SOCK_ENV))
    }

    /// Interprets a `SSH_AUTH_SOCK` value.
    #[must_use]
    pub fn from_value(value: Option<OsString>) -> Option<Self> {
        match value {
            Some(v) if !v.is_empty() => {
                let text = v.to_string_lossy();
                if text.starts_with(r"\\.\pipe\") {
                    Some(Self::NamedPipe(text.into_owned()))
                } else {
                    Some(Self::Socket(PathBuf::from(v)))
                }
            }
            _ => Self::platform_default(),
        }
    }

    #[cfg(windows)]
    fn platform_default() -> Option<Self> {
        Some(Self::NamedPipe(OPENSSH_AGENT_PIPE.to_string()))
    }

    #[cfg(not(windows))]
    fn platform_default() -> Option<Self> {
        None
    }

    /// Checks that something is listening.
    pub fn check_reachable(&self) -> Result<(), String> {
        match self {
            #[cfg(unix)]
            Self::Socket(path) => std::os::unix::net::UnixStream::connect(path)
                .map(drop)
                .map_err(|e| format!("cannot connect to {}: {}", path.display(), e)),
            #[cfg(not(unix))]
            Self::Socket(path) => {
                if path.exists() {
                    Ok(())
                } else {
                    Err(format!("{} does not exist", path.display()))
                }
            }
            Self::NamedPipe(name) => {
                if Path::new(name).exists() {
                    Ok(())
                } else {
                    Err(format!("named pipe {} is not available", name))
                }
            }
        }
    }
}

/// A key held by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedKey {
    pub fingerprint: String,
    pub key_type: String,
    pub comment: String,
    /// Public key line as reported by the agent.
    pub public_key: String,
}

impl LoadedKey {
    /// Builds a record from one `ssh-add -L` line.
    #[must_use]
    pub fn from_public_line(line: &str) -> Option<Self> {
        let key = PublicKey::parse(line).ok()?;
        Some(Self {
            fingerprint: key.fingerprint(),
            key_type: key.key_type().to_string(),
            comment: key.comment().to_string(),
            public_key: key.to_line(),
        })
    }
}

/// Transport to the agent.
pub trait AgentBackend {
    /// Lists the keys the agent holds.
    fn list(&self) -> Result<Vec<LoadedKey>, AgentError>;

    /// Loads a private key. `interactive` says whether a passphrase may be
    /// asked for on the terminal.
    fn add(&self, private_key: &Path, interactive: bool) -> Result<(), AgentError>;

    /// Unloads a key.
    fn remove(&self, key: &LoadedKey) -> Result<(), AgentError>;
}

/// [`AgentBackend`] driving OpenSSH `ssh-add`.
#[derive(Debug, Clone)]
pub struct SshAddBackend {
    program: PathBuf,
}

impl SshAddBackend {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn run(&self, cmd: &mut Command) -> Result<Output, AgentError> {
        cmd.output().map_err(|source| AgentError::Spawn {
            program: self.program_name(),
            source,
        })
    }

    /// Maps a failed run to a typed error.
    fn failure(&self, output: &Output) -> AgentError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.code() == Some(SSH_ADD_NO_AGENT)
            || stderr.contains("Could not open a connection")
            || stderr.contains("Error connecting to agent")
        {
            return AgentError::Unavailable(stderr);
        }
        AgentError::Failed {
            program: self.program_name(),
            status: output.status.code(),
            stderr,
        }
    }
}

impl Default for SshAddBackend {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_PROGRAM)
    }
}

impl AgentBackend for SshAddBackend {
    fn list(&self) -> Result<Vec<LoadedKey>, AgentError> {
        let output = self.run(
            Command::new(&self.program)
                .arg("-L")
                .stdin(Stdio::null()),
        )?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // Status 1 with this message is an empty agent, not a failure.
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.status.code() == Some(1)
                && (stdout.contains("no identities") || stderr.contains("no identities"))
            {
                return Ok(Vec::new());
            }
            return Err(self.failure(&output));
        }

        Ok(stdout
            .lines()
            .filter_map(LoadedKey::from_public_line)
            .collect())
    }

    fn add(&self, private_key: &Path, interactive: bool) -> Result<(), AgentError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(private_key);
        if !interactive {
            cmd.stdin(Stdio::null()).env("SSH_ASKPASS_REQUIRE", "never");
        }

        tracing::debug!("{} {}", self.program.display(), private_key.display());
        let output = self.run(&mut cmd)?;
        if output.status.success() {
            return Ok(());
        }

        let err = self.failure(&output);
        if !interactive {
            if let AgentError::Failed { stderr, .. } = &err {
                if stderr.to_lowercase().contains("passphrase") {
                    return Err(AgentError::PassphraseRequired(private_key.to_path_buf()));
                }
            }
        }
        Err(err)
    }

    fn remove(&self, key: &LoadedKey) -> Result<(), AgentError> {
        // ssh-add -d takes a file, so the public key goes through a temp file.
        let mut file = tempfile::Builder::new()
            .prefix("keyhop-")
            .suffix(".pub")
            .tempfile()
            .map_err(|source| AgentError::Spawn {
                program: self.program_name(),
                source,
            })?;
        writeln!(file, "{}", key.public_key).map_err(|source| AgentError::Spawn {
            program: self.program_name(),
            source,
        })?;

        let output = self.run(
            Command::new(&self.program)
                .arg("-d")
                .arg(file.path())
                .stdin(Stdio::null()),
        )?;
        if output.status.success() {
            Ok(())
        } else {
            Err(self.failure(&output))
        }
    }
}

/// Agent operations with availability checks.
#[derive(Debug)]
pub struct AgentController<B> {
    backend: B,
    endpoint: Option<AgentEndpoint>,
    passphrase_channel: bool,
}

impl<B: AgentBackend> AgentController<B> {
    /// Creates a controller with no passphrase channel.
    pub fn new(backend: B, endpoint: Option<AgentEndpoint>) -> Self {
        Self {
            backend,
            endpoint,
            passphrase_channel: false,
        }
    }

    /// Creates a controller from the process environment; a passphrase can
    /// be asked for when stdin is a terminal.
    pub fn from_env(backend: B) -> Self {
        Self::new(backend, AgentEndpoint::from_env())
            .with_passphrase_channel(atty::is(atty::Stream::Stdin))
    }

    #[must_use]
    pub fn with_passphrase_channel(mut self, available: bool) -> Self {
        self.passphrase_channel = available;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<&AgentEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn ensure_reachable(&self) -> Result<&AgentEndpoint, AgentError> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            AgentError::Unavailable(format!("{} is not set", AUTH_SOCK_ENV))
        })?;
        endpoint.check_reachable().map_err(AgentError::Unavailable)?;
        Ok(endpoint)
    }

    /// Lists loaded keys.
    pub fn list(&self) -> Result<Vec<LoadedKey>, AgentError> {
        self.ensure_reachable()?;
        self.backend.list()
    }

    /// Fingerprints of the loaded keys.
    pub fn list_loaded(&self) -> Result<BTreeSet<String>, AgentError> {
        Ok(self
            .list()?
            .into_iter()
            .map(|k| k.fingerprint)
            .collect())
    }

    /// Loads a private key into the agent.
    pub fn add(&self, private_key: &Path) -> Result<(), AgentError> {
        self.ensure_reachable()?;

        let text = match std::fs::read_to_string(private_key) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AgentError::MissingKey(private_key.to_path_buf()));
            }
            Err(e) => {
                tracing::debug!("cannot read {}: {}", private_key.display(), e);
                String::new()
            }
        };

        // Unknown formats are left to the backend to judge.
        let encrypted = keyfile::is_encrypted(&text).unwrap_or(false);
        if encrypted && !self.passphrase_channel {
            return Err(AgentError::PassphraseRequired(private_key.to_path_buf()));
        }

        self.backend.add(private_key, self.passphrase_channel)?;
        tracing::info!("added {} to agent", private_key.display());
        Ok(())
    }

    /// Unloads the key with `fingerprint`.
    pub fn remove(&self, fingerprint: &str) -> Result<LoadedKey, AgentError> {
        let key = self
            .list()?
            .into_iter()
            .find(|k| k.fingerprint == fingerprint)
            .ok_or_else(|| AgentError::NotLoaded(fingerprint.to_string()))?;

        self.backend.remove(&key)?;
        tracing::info!("removed {} from agent", fingerprint);
        Ok(key)
    }
}
