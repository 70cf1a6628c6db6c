//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::ssh::KeyAlgorithm;

/// keyhop - SSH identities and host aliases for multi-account Git
#[derive(Parser, Debug)]
#[command(name = "keyhop", version)]
#[command(about = "Manage per-account SSH keys, host aliases and the SSH agent", long_about = None)]
pub struct Cli {
    /// SSH client config to manage (default: ~/.ssh/config)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for generated keys (default: ~/.ssh)
    #[arg(long, global = true, value_name = "DIR")]
    pub key_dir: Option<PathBuf>,

    /// Identity registry file (default: ~/.keyhop/identities.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub registry: Option<PathBuf>,

    /// keyhop settings file (default: ~/.keyhop/keyhoprc)
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Log to stderr as well (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a Host block for an account
    AddHost(AddHostArgs),

    /// Remove a Host block
    RemoveHost {
        alias: String,
    },

    /// List host aliases in file order
    ListHosts {
        #[arg(long)]
        json: bool,
    },

    /// Show one host alias
    ShowHost {
        alias: String,
        #[arg(long)]
        json: bool,
    },

    /// Generate a key pair and register it
    GenerateKey(GenerateKeyArgs),

    /// List registered identities
    ListKeys {
        #[arg(long)]
        json: bool,
    },

    /// Print an identity's public key
    ShowKey {
        name: String,
    },

    /// Forget an identity
    RemoveKey {
        name: String,
        /// Also delete the private and public key files
        #[arg(long)]
        delete_files: bool,
    },

    /// Change an identity's passphrase (interactive)
    RotatePassphrase {
        name: String,
    },

    /// Load a key into the SSH agent
    AgentAdd {
        /// Registered identity name or private key path
        key: String,
    },

    /// List keys loaded in the SSH agent
    AgentList {
        #[arg(long)]
        json: bool,
    },

    /// Unload a key from the SSH agent
    AgentRemove {
        /// Key fingerprint (SHA256:...)
        fingerprint: String,
    },

    /// Check every host entry
    Validate,
}

#[derive(Args, Debug, Clone)]
pub struct AddHostArgs {
    /// Alias used in place of the real host name
    pub alias: String,

    /// Real host name, e.g. gitlab.com
    #[arg(long)]
    pub hostname: String,

    /// Remote user (default: git)
    #[arg(long)]
    pub user: Option<String>,

    /// Private key file
    #[arg(long, value_name = "PATH", conflicts_with = "key", required_unless_present = "key")]
    pub identity_file: Option<PathBuf>,

    /// Registered identity name
    #[arg(long, value_name = "NAME")]
    pub key: Option<String>,

    /// Do not restrict authentication to this key
    #[arg(long)]
    pub no_identities_only: bool,

    /// Forward the agent to the remote host
    #[arg(long)]
    pub forward_agent: bool,

    /// Extra directive, repeatable
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub options: Vec<(String, String)>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateKeyArgs {
    /// Identity name, used in the key file name
    pub name: String,

    /// Key algorithm
    #[arg(short = 't', long, value_parser = parse_algorithm)]
    pub algorithm: Option<KeyAlgorithm>,

    /// Key comment (default: the name)
    #[arg(short = 'C', long)]
    pub comment: Option<String>,

    /// Ask for a passphrase instead of leaving the key unencrypted
    #[arg(long)]
    pub passphrase: bool,

    /// Replace an existing key pair and registry entry
    #[arg(long)]
    pub force: bool,
}

fn parse_algorithm(value: &str) -> Result<KeyAlgorithm, String> {
    value.parse()
}

/// Parses `Key=Value` or `Key Value`.
fn parse_option(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .or_else(|| value.split_once(char::is_whitespace))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", value))?;
    let (key, val) = (key.trim(), val.trim());
    if key.is_empty() || val.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("expected KEY=VALUE, got '{}'", value));
    }
    Ok((key.to_string(), val.to_string()))
}
