//! SSH agent commands.

use std::io::Write;

use tracing::warn;

use crate::error::Result;
use crate::ssh::{AgentBackend, IdentityRegistry, KeyGenerator};

use super::output::{self, AgentKeyView};
use super::App;

impl<K: KeyGenerator, B: AgentBackend> App<K, B> {
    /// Loads a key into the agent. `key` is a registered name or a path.
    pub(super) fn agent_add(&self, key: &str, out: &mut dyn Write) -> Result<()> {
        // An unreadable registry means `key` can only be a path.
        let registry = self.load_registry().unwrap_or_else(|e| {
            warn!("cannot read identity registry: {}", e);
            IdentityRegistry::new(&self.config.registry)
        });
        let path = match registry.get(key) {
            Some(identity) => identity.private_key_path.clone(),
            None => self.resolve_path(key),
        };

        self.agent.add(&path)?;

        writeln!(out, "Added {} to the agent", path.display()).map_err(output::io)
    }

    /// Lists keys held by the agent, naming the identities keyhop knows.
    pub(super) fn agent_list(&self, json: bool, out: &mut dyn Write) -> Result<()> {
        let keys = self.agent.list()?;

        // A broken registry only costs the identity column.
        let registry = self.load_registry().unwrap_or_else(|e| {
            warn!("cannot read identity registry: {}", e);
            IdentityRegistry::new(&self.config.registry)
        });
        let views: Vec<AgentKeyView<'_>> = keys
            .iter()
            .map(|key| AgentKeyView {
                key,
                identity: registry
                    .find_by_fingerprint(&key.fingerprint)
                    .map(|i| i.name.as_str()),
            })
            .collect();

        if json {
            return output::write_json(out, &views);
        }

        if views.is_empty() {
            return writeln!(out, "The agent has no identities").map_err(output::io);
        }

        let rows: Vec<Vec<String>> = views
            .iter()
            .map(|v| {
                vec![
                    v.key.fingerprint.clone(),
                    v.key.key_type.clone(),
                    v.identity.unwrap_or("-").to_string(),
                    v.key.comment.clone(),
                ]
            })
            .collect();
        output::write_table(out, &["FINGERPRINT", "TYPE", "IDENTITY", "COMMENT"], &rows)
    }

    /// Unloads the key with `fingerprint` from the agent.
    pub(super) fn agent_remove(&self, fingerprint: &str, out: &mut dyn Write) -> Result<()> {
        let key = self.agent.remove(fingerprint)?;
        let written = if key.comment.is_empty() {
            writeln!(out, "Removed {} from the agent", key.fingerprint)
        } else {
            writeln!(out, "Removed {} ({}) from the agent", key.fingerprint, key.comment)
        };
        written.map_err(output::io)
    }
}
