//! # postline
//!
//! Queued SMTP sending over one reusable connection.
//!
//! A [`Client`] accepts messages from any number of tasks and delivers them
//! one at a time, in submission order, over a single [`Transport`]. It opens
//! the connection when there is work, logs in or greets as needed, and closes
//! it after a short idle period. A failure is reported to the message it
//! belongs to and the queue moves on:
//!
//! - a rejected `MAIL`/`RCPT`/`DATA` resets the transaction and keeps the
//!   connection;
//! - a body that fails mid-`DATA` closes the connection, and the next message
//!   reconnects;
//! - a failed connect or login fails only the message at the head of the
//!   queue.
//!
//! ## Quick Start
//!
//! ```ignore
//! use postline::{Client, ClientConfig, Draft};
//! use postline_smtp::{Config, Connection, Security};
//!
//! let smtp = Config::new("smtp.example.com")
//!     .security(Security::StartTls)
//!     .credentials("me@example.com", "app-password");
//! let client = Client::new(Connection::new(smtp), ClientConfig::default());
//!
//! client.submit_draft(
//!     Draft::new("Me <me@example.com>")
//!         .to("you@example.org")
//!         .subject("Hello")
//!         .text("Sent through postline."),
//!     |result, email| println!("{}: {result:?}", email.message_id()),
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod address;
mod client;
mod config;
mod connect;
mod envelope;
mod error;
mod idle;
pub mod message;
mod queue;
pub mod transport;
mod validate;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{BoxError, Error, Result, Step};
pub use message::{Attachment, BodyStream, Draft, Email, Message};
pub use queue::Queued;
pub use transport::{ConnectionState, Transport};
