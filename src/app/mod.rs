//! Command orchestration.
//!
//! Every command that edits the SSH config runs the same sequence: take the
//! lock, load, mutate in memory, validate, write atomically, report. The lock
//! is an RAII guard, so it is released on every exit path.

mod agent_ops;
mod host_ops;
mod key_ops;
mod output;

use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::cli::Command;
use crate::config::{platform, Config};
use crate::error::{Error, Result};
use crate::ssh::{
    codec, AgentBackend, AgentController, ConfigFile, HostEntry, IdentityRegistry, KeyGenerator,
    OpenSshKeygen, SshAddBackend, SshConfig,
};

/// Command runner, generic over the external programs it drives.
pub struct App<K = OpenSshKeygen, B = SshAddBackend> {
    config: Config,
    keygen: K,
    agent: AgentController<B>,
    home: PathBuf,
}

impl App {
    /// Creates an app that drives the configured OpenSSH programs and the
    /// agent named by the environment.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let keygen = OpenSshKeygen::new(config.keygen_program.clone());
        let agent = AgentController::from_env(SshAddBackend::new(config.agent_program.clone()));
        Self::new(config, keygen, agent)
    }
}

impl<K: KeyGenerator, B: AgentBackend> App<K, B> {
    pub fn new(config: Config, keygen: K, agent: AgentController<B>) -> Self {
        Self {
            config,
            keygen,
            agent,
            home: platform::home_dir(),
        }
    }

    /// Overrides the directory `~` refers to when writing paths into the config.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one command, writing its report to `out`.
    ///
    /// # Errors
    /// Returns the command's failure; nothing has been written to the SSH
    /// config when an error is returned.
    pub fn run(&mut self, command: Command, out: &mut dyn Write) -> Result<()> {
        debug!("running {:?}", command);
        match command {
            Command::AddHost(args) => self.add_host(&args, out),
            Command::RemoveHost { alias } => self.remove_host(&alias, out),
            Command::ListHosts { json } => self.list_hosts(json, out),
            Command::ShowHost { alias, json } => self.show_host(&alias, json, out),
            Command::GenerateKey(args) => self.generate_key(&args, out),
            Command::ListKeys { json } => self.list_keys(json, out),
            Command::ShowKey { name } => self.show_key(&name, out),
            Command::RemoveKey { name, delete_files } => self.remove_key(&name, delete_files, out),
            Command::RotatePassphrase { name } => self.rotate_passphrase(&name, out),
            Command::AgentAdd { key } => self.agent_add(&key, out),
            Command::AgentList { json } => self.agent_list(json, out),
            Command::AgentRemove { fingerprint } => self.agent_remove(&fingerprint, out),
            Command::Validate => self.validate(out),
        }
    }

    fn config_file(&self) -> ConfigFile {
        ConfigFile::new(&self.config.ssh_config)
    }

    fn load_registry(&self) -> Result<IdentityRegistry> {
        Ok(IdentityRegistry::load(&self.config.registry)?)
    }

    /// Loads the SSH config without taking the lock, for read-only commands.
    fn read_config(&self) -> Result<SshConfig> {
        Ok(self.config_file().load()?)
    }

    /// Runs `mutate` inside the config's critical section.
    ///
    /// `mutate` returns the aliases it added or changed; those entries must
    /// be complete and point at identity files that exist. The serialized
    /// text must parse back to the same aliases. Nothing is written if
    /// `mutate` or validation fails.
    fn edit_config<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut SshConfig) -> Result<Vec<String>>,
    {
        let file = self.config_file();
        let lock = file.lock()?;
        let mut config = file.load()?;

        let touched = mutate(&mut config)?;

        if let Some(alias) = config.duplicate_alias() {
            return Err(crate::ssh::DuplicateAliasError(alias.to_string()).into());
        }
        for alias in &touched {
            if let Some(entry) = config.get(alias) {
                entry.check()?;
                self.check_identity_file(entry)?;
            }
        }

        let reread = codec::parse(&codec::serialize(&config))
            .map_err(|e| Error::Validation(format!("edited config would not parse: {}", e)))?;
        if reread.aliases() != config.aliases() {
            return Err(Error::Validation(
                "edited config would not parse back to the same hosts".to_string(),
            ));
        }

        file.save(&lock, &config)?;
        Ok(())
    }

    /// Fails unless the entry's `IdentityFile` exists on disk.
    fn check_identity_file(&self, entry: &HostEntry) -> Result<()> {
        let Some(value) = entry.identity_file() else {
            return Err(Error::Validation(format!(
                "host '{}' has no IdentityFile",
                entry.alias()
            )));
        };

        let path = platform::expand_home_with(value, &self.home);
        if path.is_file() {
            Ok(())
        } else {
            Err(Error::MissingIdentityFile {
                alias: entry.alias().to_string(),
                path,
            })
        }
    }

    /// Resolves a user-supplied key path against the current directory and `~`.
    fn resolve_path(&self, value: &str) -> PathBuf {
        let path = platform::expand_home_with(value, &self.home);
        std::path::absolute(&path).unwrap_or(path)
    }
}
