//! SMTP commands issued by the transport.

use std::fmt;

/// A single SMTP command line.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - fallback greeting for servers without ESMTP.
    Helo(String),
    /// EHLO - extended greeting.
    Ehlo(String),
    /// STARTTLS - upgrade the connection to TLS.
    StartTls,
    /// AUTH PLAIN with an initial response (base64 of `\0user\0pass`).
    AuthPlain(String),
    /// MAIL FROM with an already bracketed reverse path.
    Mail(String),
    /// RCPT TO with an already bracketed forward path.
    Rcpt(String),
    /// DATA
    Data,
    /// RSET
    Rset,
    /// QUIT
    Quit,
}

impl Command {
    /// Serializes the command, including the trailing CRLF.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut line = self.wire_text();
        line.push_str("\r\n");
        line.into_bytes()
    }

    /// The verb as it appears on the wire.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo(_) => "HELO",
            Self::Ehlo(_) => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::AuthPlain(_) => "AUTH",
            Self::Mail(_) => "MAIL",
            Self::Rcpt(_) => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Quit => "QUIT",
        }
    }

    fn wire_text(&self) -> String {
        match self {
            Self::Helo(host) | Self::Ehlo(host) => format!("{} {host}", self.verb()),
            Self::AuthPlain(response) => format!("AUTH PLAIN {response}"),
            Self::Mail(path) => format!("MAIL FROM:{path}"),
            Self::Rcpt(path) => format!("RCPT TO:{path}"),
            Self::StartTls | Self::Data | Self::Rset | Self::Quit => self.verb().to_string(),
        }
    }
}

// Credentials must never reach the logs.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthPlain(_) => f.write_str("AUTH PLAIN <redacted>"),
            other => f.write_str(&other.wire_text()),
        }
    }
}
