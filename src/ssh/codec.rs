//! Text codec for the OpenSSH client config format.
//!
//! Parsing keeps comments, blank lines, keyword spelling and directive order
//! so that `serialize(parse(x))` differs from `x` only in whitespace inside
//! directive lines. Directives the model has no field for pass through as
//! opaque key/value pairs.

use std::collections::HashMap;

use thiserror::Error;

use super::host::{keyword, Block, Directive, HostEntry, Line, PatternBlock, SshConfig, DEFAULT_INDENT};

/// Malformed configuration text. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// `Host` with nothing after it.
    #[error("line {line}: Host keyword without an alias")]
    MissingAlias { line: usize },

    /// A keyword with no value.
    #[error("line {line}: '{keyword}' has no value")]
    MissingValue { line: usize, keyword: String },

    /// A host entry lacks one of HostName, User or IdentityFile.
    #[error("line {line}: host '{alias}' is missing {directive}")]
    MissingDirective {
        line: usize,
        alias: String,
        directive: &'static str,
    },

    /// The same alias introduces two host blocks.
    #[error("line {line}: host alias '{alias}' already defined on line {first_line}")]
    DuplicateAlias {
        line: usize,
        first_line: usize,
        alias: String,
    },
}

impl ParseError {
    /// Returns the line the error was found on.
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::MissingAlias { line }
            | Self::MissingValue { line, .. }
            | Self::MissingDirective { line, .. }
            | Self::DuplicateAlias { line, .. } => *line,
        }
    }
}

/// Returns true for `Host` values that name one concrete alias.
fn is_single_alias(value: &str) -> bool {
    let mut tokens = value.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(token), None) => !token.contains(['*', '?', '!', '"']),
        _ => false,
    }
}

/// Splits `Key value`, `Key=value` or `Key = value`.
fn split_directive(line: &str) -> (&str, &str) {
    let end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let (key, rest) = line.split_at(end);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest);
    (key, rest.trim())
}

fn leading_whitespace(raw: &str) -> &str {
    let end = raw.len() - raw.trim_start().len();
    &raw[..end]
}

/// A block being accumulated while its body lines are read.
struct OpenBlock {
    line: usize,
    keyword: String,
    head: String,
    indent: Option<String>,
    leading: Vec<String>,
    body: Vec<Line>,
}

impl OpenBlock {
    fn finish(self) -> Result<Block, ParseError> {
        let indent = self.indent.unwrap_or_else(|| DEFAULT_INDENT.to_string());

        if !self.keyword.eq_ignore_ascii_case(keyword::HOST) || !is_single_alias(&self.head) {
            return Ok(Block::Pattern(PatternBlock {
                keyword: self.keyword,
                criteria: self.head,
                indent,
                leading: self.leading,
                body: self.body,
            }));
        }

        let entry = HostEntry::from_parts(self.keyword, self.head, indent, self.leading, self.body);
        if let Some(directive) = entry.missing_required() {
            return Err(ParseError::MissingDirective {
                line: self.line,
                alias: entry.alias().to_string(),
                directive,
            });
        }
        Ok(Block::Host(entry))
    }
}

/// Parses configuration text.
pub fn parse(text: &str) -> Result<SshConfig, ParseError> {
    let mut preamble = Vec::new();
    let mut blocks = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut current: Option<OpenBlock> = None;
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            pending.push(raw.to_string());
            continue;
        }

        let (key, value) = split_directive(trimmed);

        if key.eq_ignore_ascii_case(keyword::HOST) || key.eq_ignore_ascii_case(keyword::MATCH) {
            if let Some(open) = current.take() {
                blocks.push(open.finish()?);
            }

            if value.is_empty() {
                return Err(if key.eq_ignore_ascii_case(keyword::HOST) {
                    ParseError::MissingAlias { line: line_no }
                } else {
                    ParseError::MissingValue {
                        line: line_no,
                        keyword: key.to_string(),
                    }
                });
            }

            if key.eq_ignore_ascii_case(keyword::HOST) && is_single_alias(value) {
                let folded = value.to_ascii_lowercase();
                if let Some(&first_line) = seen.get(&folded) {
                    return Err(ParseError::DuplicateAlias {
                        line: line_no,
                        first_line,
                        alias: value.to_string(),
                    });
                }
                seen.insert(folded, line_no);
            }

            current = Some(OpenBlock {
                line: line_no,
                keyword: key.to_string(),
                head: value.to_string(),
                indent: None,
                leading: std::mem::take(&mut pending),
                body: Vec::new(),
            });
            continue;
        }

        if value.is_empty() {
            return Err(ParseError::MissingValue {
                line: line_no,
                keyword: key.to_string(),
            });
        }

        let directive = Line::Directive(Directive::raw(key, value));
        match current.as_mut() {
            Some(open) => {
                if open.indent.is_none() {
                    open.indent = Some(leading_whitespace(raw).to_string());
                }
                open.body.extend(pending.drain(..).map(Line::Trivia));
                open.body.push(directive);
            }
            None => {
                preamble.extend(pending.drain(..).map(Line::Trivia));
                preamble.push(directive);
            }
        }
    }

    if let Some(open) = current.take() {
        blocks.push(open.finish()?);
    }

    tracing::trace!(blocks = blocks.len(), "parsed ssh config");
    Ok(SshConfig::from_parts(preamble, blocks, pending))
}

fn write_line(out: &mut String, indent: &str, line: &Line) {
    match line {
        Line::Directive(d) => {
            out.push_str(indent);
            out.push_str(&d.key);
            // A value starting with '=' needs an explicit separator to survive reparsing.
            out.push_str(if d.value.starts_with('=') { " = " } else { " " });
            out.push_str(&d.value);
        }
        Line::Trivia(raw) => out.push_str(raw),
    }
    out.push('\n');
}

/// Serializes a configuration back to text.
#[must_use]
pub fn serialize(config: &SshConfig) -> String {
    let mut out = String::new();

    for line in config.preamble() {
        write_line(&mut out, "", line);
    }

    for block in config.blocks() {
        for raw in block.leading() {
            out.push_str(raw);
            out.push('\n');
        }
        out.push_str(&block.header());
        out.push('\n');
        for line in block.body() {
            write_line(&mut out, block.indent(), line);
        }
    }

    for raw in config.trailing() {
        out.push_str(raw);
        out.push('\n');
    }

    out
}
