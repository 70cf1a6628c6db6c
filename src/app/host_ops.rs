//! Host alias commands.

use std::io::Write;

use tracing::{info, warn};

use crate::cli::AddHostArgs;
use crate::config::platform;
use crate::error::{Error, Result};
use crate::ssh::host::keyword;
use crate::ssh::{AgentBackend, HostEntry, KeyGenerator, RegistryError};

use super::output::{self, HostView};
use super::App;

/// Characters that would turn an alias into a pattern or break the line.
const ALIAS_FORBIDDEN: &[char] = &['*', '?', '!', ',', '#', '"', '='];

/// Checks that `alias` is a single concrete host name.
pub(super) fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() {
        return Err(Error::Validation("host alias is empty".to_string()));
    }
    if alias.contains(|c: char| c.is_whitespace() || c.is_control())
        || alias.contains(ALIAS_FORBIDDEN)
    {
        return Err(Error::Validation(format!(
            "invalid host alias {:?}: whitespace, control characters and * ? ! , # \" = are not allowed",
            alias
        )));
    }
    Ok(())
}

/// Rejects `-o` options that have a dedicated flag or would open a new block.
fn validate_option(key: &str) -> Result<()> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!("invalid option name {:?}", key)));
    }
    let reserved = keyword::MODELED
        .iter()
        .chain([keyword::HOST, keyword::MATCH].iter())
        .any(|k| k.eq_ignore_ascii_case(key));
    if reserved {
        return Err(Error::Validation(format!(
            "'{}' cannot be set with -o; use the dedicated flag",
            key
        )));
    }
    Ok(())
}

impl<K: KeyGenerator, B: AgentBackend> App<K, B> {
    /// Adds a `Host` block for one account.
    pub(super) fn add_host(&self, args: &AddHostArgs, out: &mut dyn Write) -> Result<()> {
        validate_alias(&args.alias)?;
        if args.hostname.trim().is_empty() {
            return Err(Error::Validation("--hostname is empty".to_string()));
        }
        for (key, _) in &args.options {
            validate_option(key)?;
        }

        let identity_file = match (&args.key, &args.identity_file) {
            (Some(name), _) => {
                let registry = self.load_registry()?;
                registry
                    .get(name)
                    .map(|i| i.private_key_path.clone())
                    .ok_or_else(|| RegistryError::NotFound(name.clone()))?
            }
            (None, Some(path)) => self.resolve_path(&path.to_string_lossy()),
            (None, None) => {
                return Err(Error::Validation(
                    "either --identity-file or --key is required".to_string(),
                ));
            }
        };

        let user = args
            .user
            .clone()
            .unwrap_or_else(|| self.config.default_user.clone());
        let identity_value = platform::contract_home_with(&identity_file, &self.home);

        let mut entry = HostEntry::new(&args.alias, &args.hostname, &user, &identity_value);
        if !args.no_identities_only {
            entry.set_identities_only(true);
        }
        if args.forward_agent {
            entry.set_forward_agent(true);
        }
        for (key, value) in &args.options {
            entry.set_option(key, value);
        }

        let alias = args.alias.clone();
        self.edit_config(move |config| {
            config.add_host(entry)?;
            Ok(vec![alias])
        })?;

        info!("added host {} ({})", args.alias, args.hostname);
        writeln!(
            out,
            "Added host '{}': {}@{} using {}",
            args.alias, user, args.hostname, identity_value
        )
        .map_err(output::io)?;
        writeln!(out, "Clone with: git clone {}@{}:<group>/<repo>.git", user, args.alias)
            .map_err(output::io)?;
        Ok(())
    }

    /// Removes a `Host` block and the comments written above it.
    pub(super) fn remove_host(&self, alias: &str, out: &mut dyn Write) -> Result<()> {
        self.edit_config(|config| {
            config
                .remove_host(alias)
                .map(|_| Vec::new())
                .ok_or_else(|| Error::HostNotFound(alias.to_string()))
        })?;

        info!("removed host {}", alias);
        writeln!(out, "Removed host '{}'", alias).map_err(output::io)
    }

    /// Lists host aliases in file order.
    pub(super) fn list_hosts(&self, json: bool, out: &mut dyn Write) -> Result<()> {
        let config = self.read_config()?;

        if json {
            let hosts: Vec<HostView<'_>> = config.hosts().map(HostView::from).collect();
            return output::write_json(out, &hosts);
        }

        if config.hosts().next().is_none() {
            return writeln!(
                out,
                "No host aliases in {}",
                self.config.ssh_config.display()
            )
            .map_err(output::io);
        }

        let rows: Vec<Vec<String>> = config
            .hosts()
            .map(|h| {
                vec![
                    h.alias().to_string(),
                    h.hostname().unwrap_or("-").to_string(),
                    h.user().unwrap_or("-").to_string(),
                    h.identity_file().unwrap_or("-").to_string(),
                ]
            })
            .collect();
        output::write_table(out, &["ALIAS", "HOSTNAME", "USER", "IDENTITY FILE"], &rows)
    }

    /// Shows one host alias.
    pub(super) fn show_host(&self, alias: &str, json: bool, out: &mut dyn Write) -> Result<()> {
        let config = self.read_config()?;
        let entry = config
            .get(alias)
            .ok_or_else(|| Error::HostNotFound(alias.to_string()))?;

        if json {
            output::write_json(out, &HostView::from(entry))
        } else {
            output::write_host(out, entry)
        }
    }

    /// Checks every host entry and registered identity.
    pub(super) fn validate(&self, out: &mut dyn Write) -> Result<()> {
        let config = self.read_config()?;
        let registry = self.load_registry()?;
        let mut problems = 0usize;

        for entry in config.hosts() {
            match self.check_identity_file(entry) {
                Ok(()) => writeln!(out, "ok       host {}", entry.alias()).map_err(output::io)?,
                Err(e) => {
                    problems += 1;
                    writeln!(out, "problem  {}", e).map_err(output::io)?;
                }
            }
        }

        for identity in registry.list() {
            let missing = [&identity.private_key_path, &identity.public_key_path]
                .into_iter()
                .find(|p| !p.is_file());
            match missing {
                None => writeln!(out, "ok       key {}", identity.name).map_err(output::io)?,
                Some(path) => {
                    problems += 1;
                    writeln!(
                        out,
                        "problem  key '{}': {} does not exist",
                        identity.name,
                        path.display()
                    )
                    .map_err(output::io)?;
                }
            }
        }

        if problems > 0 {
            warn!("validation found {} problem(s)", problems);
            return Err(Error::Validation(format!(
                "{} problem(s) found",
                problems
            )));
        }

        writeln!(
            out,
            "{} host(s) and {} key(s) are consistent",
            config.len(),
            registry.len()
        )
        .map_err(output::io)
    }
}
