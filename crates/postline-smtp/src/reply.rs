//! Server replies.
//!
//! A reply is one or more lines sharing a three-digit code. Every line but
//! the last uses `-` after the code, the last uses a space:
//!
//! ```text
//! 250-smtp.example.com
//! 250-PIPELINING
//! 250 AUTH PLAIN LOGIN
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// Three-digit SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_OK: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 550 Mailbox unavailable
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);

    /// Creates a reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// 2xx
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 / 100 == 2
    }

    /// 3xx
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 / 100 == 3
    }

    /// 4xx
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 / 100 == 4
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 / 100 == 5
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code shared by all lines.
    pub code: ReplyCode,
    /// Text of each line with the code and separator stripped.
    pub lines: Vec<String>,
}

impl Reply {
    /// Assembles a reply from raw lines (CRLF already stripped).
    ///
    /// # Errors
    ///
    /// Returns a protocol error if there are no lines, a line is too short,
    /// the code is not numeric, or the lines disagree on the code.
    pub fn parse(raw: &[String]) -> Result<Self> {
        let first = raw
            .first()
            .ok_or_else(|| Error::Protocol("empty reply".into()))?;
        let code = parse_code(first)?;

        let mut lines = Vec::with_capacity(raw.len());
        for line in raw {
            if parse_code(line)? != code {
                return Err(Error::Protocol(format!(
                    "reply code changed mid-reply: {line}"
                )));
            }
            lines.push(line.get(4..).unwrap_or_default().to_string());
        }

        Ok(Self { code, lines })
    }

    /// Returns true for a 2xx reply.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code.is_positive()
    }

    /// Joins every line into a single string.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Converts a reply into an error unless its code satisfies `accept`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Smtp`] carrying the reply code and text.
    pub fn require(self, accept: impl FnOnce(ReplyCode) -> bool) -> Result<Self> {
        if accept(self.code) {
            Ok(self)
        } else {
            Err(Error::smtp(self.code.as_u16(), self.text()))
        }
    }
}

/// Returns true if `line` is the final line of a reply.
#[must_use]
pub fn is_last_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() == 3 || (bytes.len() > 3 && bytes[3] == b' ')
}

fn parse_code(line: &str) -> Result<ReplyCode> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Protocol(format!("malformed reply line: {line:?}")))?;
    if line.len() > 3 && !matches!(line.as_bytes()[3], b' ' | b'-') {
        return Err(Error::Protocol(format!("malformed reply line: {line:?}")));
    }
    digits
        .parse()
        .map(ReplyCode)
        .map_err(|_| Error::Protocol(format!("invalid reply code: {digits}")))
}
