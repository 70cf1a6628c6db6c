//! Identity (key pair) commands.

use std::io::Write;

use tracing::info;

use crate::cli::GenerateKeyArgs;
use crate::config::platform;
use crate::error::Result;
use crate::ssh::{
    AgentBackend, GenerateOptions, KeyGenerator, PassphraseMode, RegistryError,
};

use super::output::{self, IdentityView};
use super::App;

impl<K: KeyGenerator, B: AgentBackend> App<K, B> {
    /// Generates a key pair through the key generator and registers it.
    pub(super) fn generate_key(&self, args: &GenerateKeyArgs, out: &mut dyn Write) -> Result<()> {
        let options = GenerateOptions {
            name: args.name.clone(),
            algorithm: args.algorithm.unwrap_or(self.config.default_algorithm),
            comment: args.comment.clone().unwrap_or_else(|| args.name.clone()),
            key_dir: self.config.key_dir.clone(),
            passphrase: if args.passphrase {
                PassphraseMode::Prompt
            } else {
                PassphraseMode::Empty
            },
            force: args.force,
        };

        let mut registry = self.load_registry()?;
        let identity = registry.generate(&self.keygen, &options)?;
        registry.save()?;

        writeln!(out, "Generated {} key '{}'", identity.algorithm, identity.name)
            .map_err(output::io)?;
        writeln!(out, "  private key: {}", identity.private_key_path.display())
            .map_err(output::io)?;
        writeln!(out, "  public key:  {}", identity.public_key_path.display())
            .map_err(output::io)?;
        if let Some(fingerprint) = identity.fingerprint() {
            writeln!(out, "  fingerprint: {}", fingerprint).map_err(output::io)?;
        }
        writeln!(
            out,
            "Upload the public key to your Git host (keyhop show-key {}), then run \
             keyhop add-host <alias> --hostname <host> --key {}",
            identity.name, identity.name
        )
        .map_err(output::io)?;
        Ok(())
    }

    /// Lists registered identities sorted by name.
    pub(super) fn list_keys(&self, json: bool, out: &mut dyn Write) -> Result<()> {
        let registry = self.load_registry()?;

        if json {
            let views: Vec<IdentityView<'_>> = registry
                .list()
                .map(|identity| IdentityView {
                    identity,
                    fingerprint: identity.fingerprint(),
                })
                .collect();
            return output::write_json(out, &views);
        }

        if registry.is_empty() {
            return writeln!(out, "No identities registered").map_err(output::io);
        }

        let rows: Vec<Vec<String>> = registry
            .list()
            .map(|i| {
                vec![
                    i.name.clone(),
                    i.algorithm.to_string(),
                    output::yes_no(i.has_passphrase).to_string(),
                    i.fingerprint().unwrap_or_else(|| "(public key missing)".to_string()),
                    platform::contract_home_with(&i.private_key_path, &self.home),
                ]
            })
            .collect();
        output::write_table(
            out,
            &["NAME", "TYPE", "PASSPHRASE", "FINGERPRINT", "PRIVATE KEY"],
            &rows,
        )
    }

    /// Prints an identity's public key line.
    pub(super) fn show_key(&self, name: &str, out: &mut dyn Write) -> Result<()> {
        let registry = self.load_registry()?;
        let identity = registry
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let key = identity.public_key()?;
        writeln!(out, "{}", key.to_line()).map_err(output::io)
    }

    /// Forgets an identity, deleting its key files only when asked to.
    pub(super) fn remove_key(&self, name: &str, delete_files: bool, out: &mut dyn Write) -> Result<()> {
        let mut registry = self.load_registry()?;
        let identity = registry.remove(name, delete_files)?;
        registry.save()?;

        info!("removed identity {} (delete_files={})", name, delete_files);
        writeln!(out, "Removed identity '{}'", identity.name).map_err(output::io)?;
        if delete_files {
            writeln!(
                out,
                "Deleted {} and {}",
                identity.private_key_path.display(),
                identity.public_key_path.display()
            )
            .map_err(output::io)?;
        } else {
            writeln!(
                out,
                "Key files kept: {}",
                identity.private_key_path.display()
            )
            .map_err(output::io)?;
        }

        // Hosts that still point at the key keep working only if the files stay.
        if let Ok(config) = self.read_config() {
            for entry in config.hosts() {
                let uses_key = entry.identity_file().is_some_and(|value| {
                    platform::expand_home_with(value, &self.home) == identity.private_key_path
                });
                if uses_key {
                    writeln!(out, "Note: host '{}' still uses this key", entry.alias())
                        .map_err(output::io)?;
                }
            }
        }
        Ok(())
    }

    /// Changes an identity's passphrase through the key generator.
    pub(super) fn rotate_passphrase(&self, name: &str, out: &mut dyn Write) -> Result<()> {
        let mut registry = self.load_registry()?;
        let has_passphrase = registry
            .rotate_passphrase(&self.keygen, name)?
            .has_passphrase;
        registry.save()?;

        writeln!(
            out,
            "Passphrase for '{}' updated ({})",
            name,
            if has_passphrase { "encrypted" } else { "no passphrase" }
        )
        .map_err(output::io)
    }
}
