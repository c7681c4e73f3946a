//! The connection the queue drives.
//!
//! [`Transport`] is the seam between orchestration and protocol: the worker
//! only ever talks to the server through it. [`postline_smtp::Connection`]
//! is the production implementation; tests substitute a scripted one.

use std::future::Future;

use bytes::Bytes;
pub use postline_smtp::ConnectionState;

/// A single reusable SMTP connection.
///
/// Paths passed to [`mail`](Self::mail) and [`rcpt`](Self::rcpt) are already
/// wrapped as `<address>`. Only one call is ever outstanding at a time.
pub trait Transport: Send + 'static {
    /// Error reported by every fallible operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// True when no login is needed on the current connection.
    fn is_authorized(&self) -> bool;

    /// Opens the connection and reads the server greeting.
    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Authenticates, greeting first if needed.
    fn login(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Sends EHLO/HELO unless already done on this connection.
    fn greet_if_needed(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// `MAIL FROM`.
    fn mail(&mut self, reverse_path: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// `RCPT TO`.
    fn rcpt(&mut self, forward_path: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// `DATA`; on success the body follows.
    fn data(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Writes raw body bytes.
    fn send_chunk(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Terminates the body and waits for the server to accept it.
    fn end_data(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// `RSET`.
    fn reset(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Graceful shutdown.
    fn quit(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Drops the connection without a protocol exchange.
    fn force_close(&mut self);
}

impl Transport for postline_smtp::Connection {
    type Error = postline_smtp::Error;

    fn state(&self) -> ConnectionState {
        Self::state(self)
    }

    fn is_authorized(&self) -> bool {
        Self::is_authorized(self)
    }

    async fn connect(&mut self) -> Result<(), Self::Error> {
        Self::connect(self).await
    }

    async fn login(&mut self) -> Result<(), Self::Error> {
        Self::login(self).await
    }

    async fn greet_if_needed(&mut self) -> Result<(), Self::Error> {
        Self::greet_if_needed(self).await
    }

    async fn mail(&mut self, reverse_path: &str) -> Result<(), Self::Error> {
        Self::mail(self, reverse_path).await
    }

    async fn rcpt(&mut self, forward_path: &str) -> Result<(), Self::Error> {
        Self::rcpt(self, forward_path).await
    }

    async fn data(&mut self) -> Result<(), Self::Error> {
        Self::data(self).await
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), Self::Error> {
        Self::send_chunk(self, &chunk).await
    }

    async fn end_data(&mut self) -> Result<(), Self::Error> {
        Self::end_data(self).await
    }

    async fn reset(&mut self) -> Result<(), Self::Error> {
        Self::reset(self).await
    }

    async fn quit(&mut self) -> Result<(), Self::Error> {
        Self::quit(self).await
    }

    fn force_close(&mut self) {
        Self::force_close(self);
    }
}
