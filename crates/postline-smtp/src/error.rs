//! Error types for SMTP transport operations.

use std::io;
use std::time::Duration;

/// Result type alias for SMTP transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP transport error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Server returned an unexpected reply.
    #[error("SMTP error {code}: {message}")]
    Smtp {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text from server.
        message: String,
    },

    /// Malformed reply or unexpected protocol sequence.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connect or command did not finish in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Operation requires an open connection.
    #[error("Not connected")]
    NotConnected,

    /// Server does not offer a required extension.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Login was requested without credentials.
    #[error("Authentication required but no credentials configured")]
    AuthRequired,
}

impl Error {
    /// Creates an SMTP error from a reply code and text.
    #[must_use]
    pub fn smtp(code: u16, message: impl Into<String>) -> Self {
        Self::Smtp {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Smtp { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Smtp { code, .. } if *code >= 400 && *code < 500)
    }

    /// Returns true if the connection cannot be used after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Tls(_) | Self::Timeout(_) | Self::NotConnected
        )
    }
}
