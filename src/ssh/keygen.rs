//! Key generation capability.
//!
//! Key material is produced by an external tool. [`KeyGenerator`] is the
//! seam between the registry and that tool; [`OpenSshKeygen`] drives
//! `ssh-keygen`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default key generation program.
pub const DEFAULT_KEYGEN_PROGRAM: &str = "ssh-keygen";

/// RSA modulus size used for generated keys.
const RSA_BITS: u32 = 4096;

/// Key algorithms keyhop will ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    #[default]
    Ed25519,
    Ecdsa,
    Rsa,
}

impl KeyAlgorithm {
    /// Parses an algorithm name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ed25519" | "ssh-ed25519" => Some(Self::Ed25519),
            "ecdsa" => Some(Self::Ecdsa),
            "rsa" | "ssh-rsa" => Some(Self::Rsa),
            _ => None,
        }
    }

    /// Name passed to `ssh-keygen -t`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Ecdsa => "ecdsa",
            Self::Rsa => "rsa",
        }
    }

    /// Explicit key size, if the algorithm needs one.
    #[must_use]
    pub fn bits(&self) -> Option<u32> {
        match self {
            Self::Rsa => Some(RSA_BITS),
            Self::Ed25519 | Self::Ecdsa => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown key algorithm '{}' (ed25519, ecdsa, rsa)", s))
    }
}

/// How a new key's passphrase is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassphraseMode {
    /// No passphrase.
    #[default]
    Empty,
    /// The tool asks on the terminal.
    Prompt,
}

/// Parameters for one key generation.
#[derive(Debug, Clone)]
pub struct KeygenRequest<'a> {
    pub algorithm: KeyAlgorithm,
    pub comment: &'a str,
    /// Private key path; the public key is written next to it with `.pub`.
    pub output: &'a Path,
    pub passphrase: PassphraseMode,
}

/// Errors from the key generation tool.
#[derive(Debug, Error)]
pub enum KeygenError {
    /// The program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("{program} exited with {}{}", describe_status(.status), stderr_suffix(.stderr))]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The program reported success but an output file is absent.
    #[error("{program} did not produce {}", path.display())]
    MissingOutput { program: String, path: PathBuf },
}

fn describe_status(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_string(), |c| format!("status {}", c))
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// Capability to create and re-protect key pairs.
pub trait KeyGenerator {
    /// Writes a new key pair to `request.output` and `request.output.pub`.
    fn generate(&self, request: &KeygenRequest<'_>) -> Result<(), KeygenError>;

    /// Interactively changes the passphrase of an existing private key.
    fn change_passphrase(&self, private_key: &Path) -> Result<(), KeygenError>;

    /// Program name used in messages.
    fn program(&self) -> String;
}

/// [`KeyGenerator`] backed by OpenSSH `ssh-keygen`.
#[derive(Debug, Clone)]
pub struct OpenSshKeygen {
    program: PathBuf,
}

impl OpenSshKeygen {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Builds the argument list for a generation request.
    #[must_use]
    pub fn generate_args(request: &KeygenRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            "-t".to_string(),
            request.algorithm.as_str().to_string(),
        ];

        if let Some(bits) = request.algorithm.bits() {
            args.push("-b".to_string());
            args.push(bits.to_string());
        }

        args.push("-C".to_string());
        args.push(request.comment.to_string());
        args.push("-f".to_string());
        args.push(request.output.to_string_lossy().into_owned());

        // Without -N ssh-keygen prompts on the terminal.
        if request.passphrase == PassphraseMode::Empty {
            args.push("-N".to_string());
            args.push(String::new());
        }

        args
    }

    fn check(&self, status: ExitStatus, stderr: &[u8]) -> Result<(), KeygenError> {
        if status.success() {
            return Ok(());
        }
        Err(KeygenError::Failed {
            program: self.program(),
            status: status.code(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        })
    }

    fn spawn_error(&self) -> impl FnOnce(io::Error) -> KeygenError + '_ {
        move |source| KeygenError::Spawn {
            program: self.program(),
            source,
        }
    }
}

impl Default for OpenSshKeygen {
    fn default() -> Self {
        Self::new(DEFAULT_KEYGEN_PROGRAM)
    }
}

impl KeyGenerator for OpenSshKeygen {
    fn generate(&self, request: &KeygenRequest<'_>) -> Result<(), KeygenError> {
        let args = Self::generate_args(request);
        tracing::debug!(
            "{} -t {} -f {}",
            self.program.display(),
            request.algorithm,
            request.output.display()
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);

        match request.passphrase {
            PassphraseMode::Empty => {
                let output = cmd
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .map_err(self.spawn_error())?;
                self.check(output.status, &output.stderr)
            }
            PassphraseMode::Prompt => {
                let status = cmd.status().map_err(self.spawn_error())?;
                self.check(status, &[])
            }
        }
    }

    fn change_passphrase(&self, private_key: &Path) -> Result<(), KeygenError> {
        tracing::debug!("{} -p -f {}", self.program.display(), private_key.display());
        let status = Command::new(&self.program)
            .arg("-p")
            .arg("-f")
            .arg(private_key)
            .status()
            .map_err(self.spawn_error())?;
        self.check(status, &[])
    }

    fn program(&self) -> String {
        self.program.display().to_string()
    }
}
