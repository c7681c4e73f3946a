//! Address-list header parsing.
//!
//! Turns header values such as `"Doe, Jane" <jane@example.com>, bob@example.org`
//! into individual mailboxes. Order and duplicates are preserved because the
//! envelope issues one `RCPT` per parsed entry.

use std::fmt;

/// A single mailbox from an address-list header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name, unquoted.
    pub name: Option<String>,
    /// Bare address (`local@domain`).
    pub address: String,
}

impl Mailbox {
    /// Creates a mailbox without a display name.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    /// Creates a mailbox with a display name.
    #[must_use]
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Returns true if the address has a non-empty local part and domain.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self.address.rsplit_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !self
                        .address
                        .chars()
                        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>'))
            }
            None => false,
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if needs_quoting(name) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => f.write_str(&self.address),
        }
    }
}

fn needs_quoting(name: &str) -> bool {
    name.chars()
        .any(|c| matches!(c, ',' | ';' | ':' | '<' | '>' | '@' | '"' | '(' | ')' | '[' | ']' | '\\' | '.'))
}

/// Parses an address-list header value.
///
/// Absent or blank input yields an empty list. Group syntax
/// (`team: a@x.com, b@x.com;`) contributes its members; an empty group such
/// as `undisclosed-recipients:;` contributes nothing.
#[must_use]
pub fn parse_list(header: &str) -> Vec<Mailbox> {
    split_entries(header)
        .iter()
        .filter_map(|entry| parse_mailbox(entry))
        .collect()
}

/// Parses an optional header value; `None` is treated as empty.
#[must_use]
pub fn parse_optional(header: Option<&str>) -> Vec<Mailbox> {
    header.map(parse_list).unwrap_or_default()
}

/// Splits at top-level commas and semicolons, dropping group labels.
fn split_entries(header: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut angle = 0usize;
    let mut comment = 0usize;

    for c in header.chars() {
        if escaped {
            if comment == 0 {
                current.push(c);
            }
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes || comment > 0 => {
                if comment == 0 {
                    current.push(c);
                }
                escaped = true;
            }
            '"' if comment == 0 => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => comment += 1,
            ')' if !in_quotes && comment > 0 => comment -= 1,
            _ if comment > 0 => {}
            '<' if !in_quotes => {
                angle += 1;
                current.push(c);
            }
            '>' if !in_quotes && angle > 0 => {
                angle -= 1;
                current.push(c);
            }
            ',' | ';' if !in_quotes && angle == 0 => {
                entries.push(std::mem::take(&mut current));
            }
            ':' if !in_quotes && angle == 0 => current.clear(),
            _ => current.push(c),
        }
    }
    entries.push(current);
    entries
}

fn parse_mailbox(entry: &str) -> Option<Mailbox> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    let Some(open) = find_unquoted(entry, '<') else {
        return Some(Mailbox::new(entry));
    };
    // `>` ahead of the address means the entry is not `name <addr>`; keep
    // it whole so it fails `is_well_formed` instead of losing the prefix.
    if find_unquoted(&entry[..open], '>').is_some() {
        return Some(Mailbox::new(entry));
    }
    let rest = &entry[open + 1..];
    let address = rest.find('>').map_or(rest, |close| &rest[..close]).trim();
    if address.is_empty() {
        return None;
    }

    let name = unquote(entry[..open].trim());
    Some(Mailbox {
        name: (!name.is_empty()).then_some(name),
        address: address.to_string(),
    })
}

fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn unquote(name: &str) -> String {
    let Some(inner) = name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) else {
        return name.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
