//! Command output: plain text tables and `--json` views.

use std::io::{self, Write};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::ssh::{HostEntry, Identity, LoadedKey};

/// JSON view of a host entry.
#[derive(Debug, Serialize)]
pub struct HostView<'a> {
    pub alias: &'a str,
    pub hostname: Option<&'a str>,
    pub user: Option<&'a str>,
    pub identity_file: Option<&'a str>,
    pub identities_only: bool,
    pub forward_agent: bool,
    pub options: Vec<OptionView<'a>>,
}

#[derive(Debug, Serialize)]
pub struct OptionView<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

impl<'a> From<&'a HostEntry> for HostView<'a> {
    fn from(entry: &'a HostEntry) -> Self {
        Self {
            alias: entry.alias(),
            hostname: entry.hostname(),
            user: entry.user(),
            identity_file: entry.identity_file(),
            identities_only: entry.identities_only(),
            forward_agent: entry.forward_agent(),
            options: entry
                .extra_options()
                .map(|(key, value)| OptionView { key, value })
                .collect(),
        }
    }
}

/// JSON view of a registered identity.
#[derive(Debug, Serialize)]
pub struct IdentityView<'a> {
    #[serde(flatten)]
    pub identity: &'a Identity,
    pub fingerprint: Option<String>,
}

/// JSON view of an agent key, with the identity it belongs to if known.
#[derive(Debug, Serialize)]
pub struct AgentKeyView<'a> {
    #[serde(flatten)]
    pub key: &'a LoadedKey,
    pub identity: Option<&'a str>,
}

/// Wraps a failed write to stdout.
pub fn io(e: io::Error) -> Error {
    Error::Output(e)
}

/// Writes `value` as pretty JSON followed by a newline.
pub fn write_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out).map_err(io)
}

/// Writes rows as left-aligned columns separated by two spaces.
pub fn write_table(out: &mut dyn Write, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let render = |cells: Vec<&str>| -> String {
        let last = cells.len().saturating_sub(1);
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if i == last {
                    (*cell).to_string()
                } else {
                    format!("{:<width$}", cell, width = widths.get(i).copied().unwrap_or(0))
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
    };

    writeln!(out, "{}", render(header.to_vec())).map_err(io)?;
    for row in rows {
        writeln!(out, "{}", render(row.iter().map(String::as_str).collect())).map_err(io)?;
    }
    Ok(())
}

/// Writes a host entry as `Key: value` lines.
pub fn write_host(out: &mut dyn Write, entry: &HostEntry) -> Result<()> {
    let or_dash = |v: Option<&str>| v.unwrap_or("-").to_string();
    writeln!(out, "Host:           {}", entry.alias()).map_err(io)?;
    writeln!(out, "HostName:       {}", or_dash(entry.hostname())).map_err(io)?;
    writeln!(out, "User:           {}", or_dash(entry.user())).map_err(io)?;
    writeln!(out, "IdentityFile:   {}", or_dash(entry.identity_file())).map_err(io)?;
    writeln!(out, "IdentitiesOnly: {}", yes_no(entry.identities_only())).map_err(io)?;
    writeln!(out, "ForwardAgent:   {}", yes_no(entry.forward_agent())).map_err(io)?;
    for (key, value) in entry.extra_options() {
        writeln!(out, "{:<15} {}", format!("{}:", key), value).map_err(io)?;
    }
    Ok(())
}

pub fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
