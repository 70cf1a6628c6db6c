//! SSH client configuration model.
//!
//! An [`SshConfig`] mirrors the layout of an OpenSSH client config file:
//! global lines before the first block, an ordered list of blocks and the
//! comment lines left after the last block. Comment and blank lines
//! ("trivia") are carried verbatim so a file edited by hand survives a
//! load/save cycle.

use std::collections::HashSet;

use thiserror::Error;

/// Indentation used for blocks that do not carry their own.
pub const DEFAULT_INDENT: &str = "    ";

/// Directive keywords the model gives typed access to.
pub mod keyword {
    pub const HOST: &str = "Host";
    pub const MATCH: &str = "Match";
    pub const HOSTNAME: &str = "HostName";
    pub const USER: &str = "User";
    pub const IDENTITY_FILE: &str = "IdentityFile";
    pub const IDENTITIES_ONLY: &str = "IdentitiesOnly";
    pub const FORWARD_AGENT: &str = "ForwardAgent";

    /// Directives every host entry must carry.
    pub const REQUIRED: [&str; 3] = [HOSTNAME, USER, IDENTITY_FILE];

    /// Directives exposed through typed accessors.
    pub const MODELED: [&str; 5] = [HOSTNAME, USER, IDENTITY_FILE, IDENTITIES_ONLY, FORWARD_AGENT];
}

/// Attempt to add a host whose alias is already taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host alias '{0}' already exists")]
pub struct DuplicateAliasError(pub String);

/// A host entry that cannot be written back as one block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEntryError {
    #[error("host '{alias}': {field} contains a line break or control character")]
    ControlCharacter { alias: String, field: String },

    #[error("host '{alias}': {keyword} must not be empty")]
    EmptyValue { alias: String, keyword: String },
}

/// A single `Keyword value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Keyword as spelled in the file.
    pub key: String,
    /// Raw value, including surrounding quotes if any.
    pub value: String,
}

impl Directive {
    /// Creates a directive, quoting the value when it contains whitespace.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl AsRef<str>) -> Self {
        Self {
            key: key.into(),
            value: quote_value(value.as_ref()),
        }
    }

    /// Creates a directive from text already in file form.
    #[must_use]
    pub fn raw(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns true if this directive uses `keyword` (case-insensitive).
    #[must_use]
    pub fn is(&self, keyword: &str) -> bool {
        self.key.eq_ignore_ascii_case(keyword)
    }

    /// Returns the value with surrounding double quotes removed.
    #[must_use]
    pub fn unquoted(&self) -> &str {
        unquote(&self.value)
    }
}

/// One line of a block body or of the preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A keyword/value pair.
    Directive(Directive),
    /// A comment or blank line, kept exactly as read.
    Trivia(String),
}

impl Line {
    /// Returns the directive if this line is one.
    #[must_use]
    pub fn as_directive(&self) -> Option<&Directive> {
        match self {
            Self::Directive(d) => Some(d),
            Self::Trivia(_) => None,
        }
    }
}

/// Strips one pair of surrounding double quotes.
#[must_use]
pub fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Quotes a value that contains whitespace and is not already quoted.
#[must_use]
pub fn quote_value(value: &str) -> String {
    let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
    if value.chars().any(char::is_whitespace) && !quoted {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// Characters that would end or corrupt a config line. Tabs are allowed.
fn is_line_control(c: char) -> bool {
    c.is_control() && c != '\t'
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// A `Host <alias>` block with a single concrete alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    /// `Host` keyword as spelled in the file.
    keyword: String,
    alias: String,
    indent: String,
    leading: Vec<String>,
    body: Vec<Line>,
}

impl HostEntry {
    /// Creates an entry with the three required directives.
    #[must_use]
    pub fn new(
        alias: impl Into<String>,
        hostname: impl AsRef<str>,
        user: impl AsRef<str>,
        identity_file: impl AsRef<str>,
    ) -> Self {
        let mut entry = Self::empty(alias);
        entry.set_hostname(hostname);
        entry.set_user(user);
        entry.set_identity_file(identity_file);
        entry
    }

    /// Creates an entry with no directives.
    #[must_use]
    pub fn empty(alias: impl Into<String>) -> Self {
        Self {
            keyword: keyword::HOST.to_string(),
            alias: alias.into(),
            indent: DEFAULT_INDENT.to_string(),
            leading: Vec::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        keyword: String,
        alias: String,
        indent: String,
        leading: Vec<String>,
        body: Vec<Line>,
    ) -> Self {
        Self {
            keyword,
            alias,
            indent,
            leading,
            body,
        }
    }

    /// Sets `IdentitiesOnly`.
    #[must_use]
    pub fn with_identities_only(mut self, enabled: bool) -> Self {
        self.set_identities_only(enabled);
        self
    }

    /// Sets `ForwardAgent`.
    #[must_use]
    pub fn with_forward_agent(mut self, enabled: bool) -> Self {
        self.set_forward_agent(enabled);
        self
    }

    /// Appends a passthrough option.
    #[must_use]
    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.set_option(key, value);
        self
    }

    /// Replaces the comment/blank lines written above the `Host` line.
    #[must_use]
    pub fn with_leading(mut self, leading: Vec<String>) -> Self {
        self.leading = leading;
        self
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    #[must_use]
    pub fn indent(&self) -> &str {
        &self.indent
    }

    #[must_use]
    pub fn leading(&self) -> &[String] {
        &self.leading
    }

    pub(crate) fn leading_mut(&mut self) -> &mut Vec<String> {
        &mut self.leading
    }

    #[must_use]
    pub fn body(&self) -> &[Line] {
        &self.body
    }

    /// Iterates over directives in file order.
    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.body.iter().filter_map(Line::as_directive)
    }

    /// Returns the first directive with `keyword`.
    #[must_use]
    pub fn get(&self, keyword: &str) -> Option<&Directive> {
        self.directives().find(|d| d.is(keyword))
    }

    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.get(keyword::HOSTNAME).map(Directive::unquoted)
    }

    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.get(keyword::USER).map(Directive::unquoted)
    }

    #[must_use]
    pub fn identity_file(&self) -> Option<&str> {
        self.get(keyword::IDENTITY_FILE).map(Directive::unquoted)
    }

    #[must_use]
    pub fn identities_only(&self) -> bool {
        self.get(keyword::IDENTITIES_ONLY)
            .is_some_and(|d| d.unquoted().eq_ignore_ascii_case("yes"))
    }

    /// `ForwardAgent` may name a socket, so anything but `no` counts as on.
    #[must_use]
    pub fn forward_agent(&self) -> bool {
        self.get(keyword::FORWARD_AGENT)
            .is_some_and(|d| !d.unquoted().eq_ignore_ascii_case("no"))
    }

    /// Directives without a typed accessor, in file order.
    pub fn extra_options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.directives()
            .filter(|d| !keyword::MODELED.iter().any(|k| d.is(k)))
            .map(|d| (d.key.as_str(), d.value.as_str()))
    }

    /// Returns the first required directive that is absent or empty.
    #[must_use]
    pub fn missing_required(&self) -> Option<&'static str> {
        keyword::REQUIRED.into_iter().find(|k| {
            self.get(k)
                .is_none_or(|d| d.unquoted().trim().is_empty())
        })
    }

    /// Verifies the entry serializes to exactly one parseable block.
    ///
    /// # Errors
    /// Returns error if the alias, a keyword or a value holds a control
    /// character, or a directive value or required directive is empty.
    pub fn check(&self) -> Result<(), InvalidEntryError> {
        let control = |field: &str| InvalidEntryError::ControlCharacter {
            alias: self.alias.clone(),
            field: field.to_string(),
        };
        if self.alias.chars().any(char::is_control) {
            return Err(control(keyword::HOST));
        }
        let empty = |keyword: &str| InvalidEntryError::EmptyValue {
            alias: self.alias.clone(),
            keyword: keyword.to_string(),
        };
        for d in self.directives() {
            if d.key.chars().any(char::is_control) || d.value.contains(is_line_control) {
                return Err(control(&d.key));
            }
            if d.value.trim().is_empty() {
                return Err(empty(&d.key));
            }
        }
        match self.missing_required() {
            Some(keyword) => Err(empty(keyword)),
            None => Ok(()),
        }
    }

    pub fn set_hostname(&mut self, hostname: impl AsRef<str>) {
        self.set_option(keyword::HOSTNAME, hostname.as_ref());
    }

    pub fn set_user(&mut self, user: impl AsRef<str>) {
        self.set_option(keyword::USER, user.as_ref());
    }

    pub fn set_identity_file(&mut self, path: impl AsRef<str>) {
        self.set_option(keyword::IDENTITY_FILE, path.as_ref());
    }

    pub fn set_identities_only(&mut self, enabled: bool) {
        self.set_option(keyword::IDENTITIES_ONLY, yes_no(enabled));
    }

    pub fn set_forward_agent(&mut self, enabled: bool) {
        self.set_option(keyword::FORWARD_AGENT, yes_no(enabled));
    }

    /// Sets the first directive named `key` in place, or appends one.
    ///
    /// The keyword keeps the spelling already present in the block.
    pub fn set_option(&mut self, key: &str, value: &str) {
        let value = quote_value(value);
        for line in &mut self.body {
            if let Line::Directive(d) = line {
                if d.is(key) {
                    d.value = value;
                    return;
                }
            }
        }
        self.body.push(Line::Directive(Directive::raw(key, value)));
    }

    /// Removes every directive named `key`. Returns true if any was removed.
    pub fn remove_option(&mut self, key: &str) -> bool {
        let before = self.body.len();
        self.body
            .retain(|line| line.as_directive().is_none_or(|d| !d.is(key)));
        self.body.len() != before
    }
}

/// A block addressed by patterns rather than one alias: `Host *`,
/// `Host a b`, `Host !x` or any `Match` block. Kept opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternBlock {
    pub keyword: String,
    /// Everything after the keyword, e.g. `*.example.com` or `host foo exec "true"`.
    pub criteria: String,
    pub indent: String,
    pub leading: Vec<String>,
    pub body: Vec<Line>,
}

/// A top-level block of the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Host(HostEntry),
    Pattern(PatternBlock),
}

impl Block {
    #[must_use]
    pub fn leading(&self) -> &[String] {
        match self {
            Self::Host(h) => h.leading(),
            Self::Pattern(p) => &p.leading,
        }
    }

    #[must_use]
    pub fn body(&self) -> &[Line] {
        match self {
            Self::Host(h) => h.body(),
            Self::Pattern(p) => &p.body,
        }
    }

    #[must_use]
    pub fn indent(&self) -> &str {
        match self {
            Self::Host(h) => h.indent(),
            Self::Pattern(p) => &p.indent,
        }
    }

    /// Returns the `Host`/`Match` header line without indentation.
    #[must_use]
    pub fn header(&self) -> String {
        match self {
            Self::Host(h) => format!("{} {}", h.keyword(), h.alias()),
            Self::Pattern(p) => format!("{} {}", p.keyword, p.criteria),
        }
    }

    #[must_use]
    pub fn as_host(&self) -> Option<&HostEntry> {
        match self {
            Self::Host(h) => Some(h),
            Self::Pattern(_) => None,
        }
    }
}

/// In-memory SSH client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfig {
    preamble: Vec<Line>,
    blocks: Vec<Block>,
    trailing: Vec<String>,
}

impl SshConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(preamble: Vec<Line>, blocks: Vec<Block>, trailing: Vec<String>) -> Self {
        Self {
            preamble,
            blocks,
            trailing,
        }
    }

    /// Global lines before the first block.
    #[must_use]
    pub fn preamble(&self) -> &[Line] {
        &self.preamble
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Comment/blank lines after the last block.
    #[must_use]
    pub fn trailing(&self) -> &[String] {
        &self.trailing
    }

    /// Returns true if the file would be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.preamble.is_empty() && self.blocks.is_empty() && self.trailing.is_empty()
    }

    /// Host entries in file order.
    pub fn hosts(&self) -> impl Iterator<Item = &HostEntry> {
        self.blocks.iter().filter_map(Block::as_host)
    }

    /// Number of host entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts().count()
    }

    /// Host aliases in file order.
    #[must_use]
    pub fn aliases(&self) -> Vec<&str> {
        self.hosts().map(HostEntry::alias).collect()
    }

    /// Looks up a host entry by alias (case-insensitive).
    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&HostEntry> {
        self.hosts().find(|h| h.alias().eq_ignore_ascii_case(alias))
    }

    pub fn get_mut(&mut self, alias: &str) -> Option<&mut HostEntry> {
        self.blocks.iter_mut().find_map(|b| match b {
            Block::Host(h) if h.alias().eq_ignore_ascii_case(alias) => Some(h),
            _ => None,
        })
    }

    #[must_use]
    pub fn contains(&self, alias: &str) -> bool {
        self.get(alias).is_some()
    }

    /// Appends a host entry at the end of the file.
    ///
    /// Entries without leading trivia get a blank separator line when the
    /// file already has content.
    pub fn add_host(&mut self, mut entry: HostEntry) -> Result<(), DuplicateAliasError> {
        if self.contains(entry.alias()) {
            return Err(DuplicateAliasError(entry.alias().to_string()));
        }

        if entry.leading().is_empty() && !self.is_empty() {
            entry.leading_mut().push(String::new());
        }

        // Trailing trivia stays at the end of the file.
        self.blocks.push(Block::Host(entry));
        Ok(())
    }

    /// Removes a host entry and the comments written above it.
    pub fn remove_host(&mut self, alias: &str) -> Option<HostEntry> {
        let index = self.blocks.iter().position(|b| {
            b.as_host()
                .is_some_and(|h| h.alias().eq_ignore_ascii_case(alias))
        })?;
        match self.blocks.remove(index) {
            Block::Host(h) => Some(h),
            Block::Pattern(_) => None,
        }
    }

    /// Returns the first alias that appears more than once.
    #[must_use]
    pub fn duplicate_alias(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.hosts()
            .map(HostEntry::alias)
            .find(|alias| !seen.insert(alias.to_ascii_lowercase()))
    }
}
