//! Error types reported to send callbacks.

use std::fmt;
use std::io;

/// Boxed transport error, kept as the source of [`Error`] variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for send operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Envelope step that a server rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// `MAIL FROM`
    Mail,
    /// `RCPT TO`
    Rcpt,
    /// `DATA`
    Data,
    /// The final `.` after the body.
    EndData,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mail => "MAIL FROM",
            Self::Rcpt => "RCPT TO",
            Self::Data => "DATA",
            Self::EndData => "end of data",
        })
    }
}

/// Why a message was not sent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The message is structurally unsendable or failed its own validation.
    /// It never entered the queue.
    #[error("message rejected: {0}")]
    Validation(String),

    /// Connecting, greeting or logging in failed. Only the message that
    /// triggered the attempt is failed; the next one reconnects.
    #[error("connection failed: {0}")]
    Connection(#[source] BoxError),

    /// The server rejected an envelope step. The transaction was reset and
    /// the connection stays open for the next message.
    #[error("server rejected {step}: {source}")]
    Protocol {
        /// Step that failed.
        step: Step,
        /// Transport error carrying the server reply.
        #[source]
        source: BoxError,
    },

    /// The message body could not be produced mid-DATA. The connection was
    /// closed because the transaction cannot be aborted in-protocol.
    #[error("message body failed: {0}")]
    Stream(#[source] io::Error),

    /// The client's worker has stopped.
    #[error("client is closed")]
    Closed,
}

impl Error {
    /// Wraps a transport error from the connect sequence.
    pub fn connection(err: impl Into<BoxError>) -> Self {
        Self::Connection(err.into())
    }

    /// Wraps a transport error from an envelope step.
    pub fn protocol(step: Step, err: impl Into<BoxError>) -> Self {
        Self::Protocol {
            step,
            source: err.into(),
        }
    }

    /// Returns true if this was a validation failure.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns the rejected step for protocol failures.
    #[must_use]
    pub const fn step(&self) -> Option<Step> {
        match self {
            Self::Protocol { step, .. } => Some(*step),
            _ => None,
        }
    }
}
