//! # postline-smtp
//!
//! A single, reusable SMTP connection driven one command at a time.
//!
//! This crate is the transport half of `postline`: it knows how to open a
//! socket, read replies and issue individual commands, but it never decides
//! *when* to do any of that. The queueing, idle shutdown and error recovery
//! live in the `postline` crate, which drives a [`Connection`] through its
//! `Transport` trait.
//!
//! ## Quick Start
//!
//! ```ignore
//! use postline_smtp::{Config, Connection, Security};
//!
//! let config = Config::new("smtp.example.com")
//!     .security(Security::StartTls)
//!     .credentials("user@example.com", "password");
//!
//! let mut conn = Connection::new(config);
//! conn.connect().await?;
//! conn.login().await?;
//!
//! conn.mail("<user@example.com>").await?;
//! conn.rcpt("<friend@example.org>").await?;
//! conn.data().await?;
//! conn.send_chunk(b"Subject: Hi\r\n\r\nHello!\r\n").await?;
//! conn.end_data().await?;
//! conn.quit().await?;
//! ```
//!
//! ## Connection States
//!
//! ```text
//! NotConnected ── connect() ──→ Connecting ──(220 greeting)──→ Connected
//!       ↑                                                          │
//!       └──────── quit() / force_close() / any I/O failure ────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod config;
mod connection;
mod data;
mod error;
pub mod reply;
mod stream;

pub use config::{Config, Credentials, Security};
pub use connection::{Capabilities, Connection, ConnectionState};
pub use error::{Error, Result};
pub use reply::{Reply, ReplyCode};
