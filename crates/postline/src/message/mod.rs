//! Messages as seen by the send queue.
//!
//! The queue only needs a handful of things from a message: its envelope
//! headers, a way to check itself, and a body it can stream into `DATA`.
//! [`Message`] captures exactly that; [`Email`] is the built-in implementation.

mod body;
mod draft;
mod email;

use std::future::Future;

pub use body::{BodyStream, BodyWriter, DEFAULT_CAPACITY};
pub use draft::{Attachment, Draft, Source};
pub use email::Email;

/// A message that can be queued for sending.
///
/// Header accessors return raw header values; the queue parses them into
/// envelope addresses.
pub trait Message: Send + Sync + 'static {
    /// Checks the message before it is queued.
    ///
    /// Returns a human-readable reason on failure.
    fn validate(&self) -> impl Future<Output = Result<(), String>> + Send;

    /// `From` header.
    fn from(&self) -> Option<&str>;

    /// `To` header.
    fn to(&self) -> Option<&str>;

    /// `Cc` header.
    fn cc(&self) -> Option<&str>;

    /// `Bcc` header.
    fn bcc(&self) -> Option<&str>;

    /// `Return-Path` header; overrides `From` for `MAIL FROM` when it
    /// contains an address.
    fn return_path(&self) -> Option<&str>;

    /// Starts producing the wire form of the message.
    ///
    /// Called once per send attempt, from inside the tokio runtime.
    fn body(&self) -> BodyStream;
}
