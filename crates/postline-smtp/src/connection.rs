//! A single reusable SMTP connection.
//!
//! Unlike a type-state client, [`Connection`] keeps its state at runtime: a
//! send queue drives one long-lived value through many transactions, and
//! needs to ask it where it stands after any failure.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::{Config, Security};
use crate::data::DataEncoder;
use crate::error::{Error, Result};
use crate::reply::{Reply, ReplyCode, is_last_line};
use crate::stream::SmtpStream;

/// Where the connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    NotConnected,
    /// Socket being opened, greeting not yet received.
    Connecting,
    /// Greeting received; commands can be issued.
    Connected,
}

/// Extensions advertised in the EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    keywords: BTreeMap<String, Vec<String>>,
}

impl Capabilities {
    /// Parses the EHLO reply; the first line is the server's greeting.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        let keywords = reply
            .lines
            .iter()
            .skip(1)
            .filter_map(|line| {
                let mut words = line.split_whitespace();
                let keyword = words.next()?.to_ascii_uppercase();
                Some((keyword, words.map(str::to_string).collect()))
            })
            .collect();
        Self { keywords }
    }

    /// Returns true if `keyword` (e.g. `STARTTLS`) was advertised.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.keywords.contains_key(&keyword.to_ascii_uppercase())
    }

    /// SASL mechanisms listed after `AUTH`.
    #[must_use]
    pub fn auth_mechanisms(&self) -> &[String] {
        self.keywords.get("AUTH").map_or(&[][..], Vec::as_slice)
    }

    /// Message size limit from `SIZE`, if any.
    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.keywords
            .get("SIZE")
            .and_then(|params| params.first())
            .and_then(|size| size.parse().ok())
            .filter(|&size| size > 0)
    }
}

/// One SMTP connection, opened and reopened on demand.
#[derive(Debug)]
pub struct Connection {
    config: Config,
    stream: Option<SmtpStream>,
    state: ConnectionState,
    greeted: bool,
    authenticated: bool,
    capabilities: Capabilities,
    encoder: DataEncoder,
}

impl Connection {
    /// Creates an unconnected connection.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stream: None,
            state: ConnectionState::NotConnected,
            greeted: false,
            authenticated: false,
            capabilities: Capabilities::default(),
            encoder: DataEncoder::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Extensions from the most recent EHLO.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// True when no credentials are configured or AUTH already succeeded.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        self.config.credentials.is_none() || self.authenticated
    }

    /// Opens the socket and reads the greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened within the connect
    /// timeout or the greeting is not 220. The connection is left closed.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;

        let (host, port) = (self.config.host.clone(), self.config.port);
        let security = self.config.security;
        let limit = self.config.connect_timeout;
        let opened = with_timeout(limit, async {
            let mut stream = match security {
                Security::Implicit => SmtpStream::tls(&host, port).await?,
                Security::None | Security::StartTls => SmtpStream::tcp(&host, port).await?,
            };
            let greeting = read_reply(&mut stream).await?;
            greeting.require(|code| code == ReplyCode::SERVICE_READY)?;
            Ok(stream)
        })
        .await;

        match opened {
            Ok(stream) => {
                info!(%host, port, ?security, "SMTP connection established");
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!(%host, port, error = %e, "SMTP connect failed");
                self.close();
                Err(e)
            }
        }
    }

    /// Sends EHLO (or HELO), upgrading with STARTTLS when configured.
    ///
    /// Does nothing if the current session has already been greeted.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting is rejected, STARTTLS is required
    /// but not offered, or the TLS upgrade fails.
    pub async fn greet_if_needed(&mut self) -> Result<()> {
        if self.greeted {
            return Ok(());
        }
        self.hello().await?;

        let needs_tls = self.config.security == Security::StartTls
            && self.stream.as_ref().is_some_and(|s| !s.is_tls());
        if needs_tls {
            if !self.capabilities.supports("STARTTLS") {
                return Err(Error::NotSupported("STARTTLS".into()));
            }
            self.command(Command::StartTls)
                .await?
                .require(ReplyCode::is_positive)?;
            self.upgrade().await?;
            self.hello().await?;
        }

        self.greeted = true;
        Ok(())
    }

    /// Greets if needed, then authenticates with AUTH PLAIN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthRequired`] without credentials, or the server's
    /// rejection of the greeting or the credentials.
    pub async fn login(&mut self) -> Result<()> {
        self.greet_if_needed().await?;
        let Some(credentials) = self.config.credentials.clone() else {
            return Err(Error::AuthRequired);
        };

        let mechanisms = self.capabilities.auth_mechanisms();
        if !mechanisms.is_empty() && !mechanisms.iter().any(|m| m.eq_ignore_ascii_case("PLAIN")) {
            debug!(?mechanisms, "server does not list PLAIN; trying it anyway");
        }

        let token = format!("\0{}\0{}", credentials.username, credentials.password);
        let response = STANDARD.encode(token.as_bytes());
        self.command(Command::AuthPlain(response))
            .await?
            .require(ReplyCode::is_positive)?;

        info!(username = %credentials.username, "SMTP authentication succeeded");
        self.authenticated = true;
        Ok(())
    }

    /// Sends `MAIL FROM:` with an already bracketed path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the path contains a line break, or
    /// the server's rejection or an I/O error.
    pub async fn mail(&mut self, reverse_path: &str) -> Result<()> {
        single_line(reverse_path)?;
        self.command(Command::Mail(reverse_path.to_string()))
            .await?
            .require(ReplyCode::is_positive)
            .map(drop)
    }

    /// Sends `RCPT TO:` with an already bracketed path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the path contains a line break, or
    /// the server's rejection or an I/O error.
    pub async fn rcpt(&mut self, forward_path: &str) -> Result<()> {
        single_line(forward_path)?;
        self.command(Command::Rcpt(forward_path.to_string()))
            .await?
            .require(ReplyCode::is_positive)
            .map(drop)
    }

    /// Sends `DATA` and waits for 354.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or an I/O error.
    pub async fn data(&mut self) -> Result<()> {
        self.command(Command::Data)
            .await?
            .require(|code| code == ReplyCode::START_DATA)?;
        self.encoder = DataEncoder::new();
        Ok(())
    }

    /// Writes one chunk of message content during DATA.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; the connection is then closed.
    pub async fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let encoded = self.encoder.encode(chunk);
        self.write(&encoded).await
    }

    /// Terminates DATA and waits for the server to accept the message.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or an I/O error.
    pub async fn end_data(&mut self) -> Result<()> {
        let terminator = self.encoder.finish();
        self.write(&terminator).await?;
        let limit = self.config.command_timeout;
        let reply = match self.stream.as_mut() {
            Some(stream) => with_timeout(limit, read_reply(stream)).await,
            None => Err(Error::NotConnected),
        };
        self.settle(reply)?.require(ReplyCode::is_positive).map(drop)
    }

    /// Sends `RSET` to abandon the current transaction.
    ///
    /// # Errors
    ///
    /// Returns the server's rejection or an I/O error.
    pub async fn reset(&mut self) -> Result<()> {
        self.command(Command::Rset)
            .await?
            .require(ReplyCode::is_positive)
            .map(drop)
    }

    /// Sends `QUIT` and closes the socket whatever the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if QUIT is rejected; the connection is closed anyway.
    pub async fn quit(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }
        let result = match self.command(Command::Quit).await {
            Ok(reply) => reply.require(ReplyCode::is_positive).map(drop),
            Err(e) => Err(e),
        };
        if let Some(stream) = self.stream.as_mut() {
            stream.shutdown().await;
        }
        self.close();
        info!(host = %self.config.host, "SMTP connection closed");
        result
    }

    /// Drops the socket without a protocol exchange.
    pub fn force_close(&mut self) {
        if self.stream.is_some() {
            warn!(host = %self.config.host, "SMTP connection force-closed");
        }
        self.close();
    }

    async fn hello(&mut self) -> Result<()> {
        let name = self.config.hello_name.clone();
        let reply = self.command(Command::Ehlo(name.clone())).await?;
        if reply.is_positive() {
            self.capabilities = Capabilities::from_ehlo(&reply);
            return Ok(());
        }
        if !reply.code.is_permanent() {
            return reply.require(ReplyCode::is_positive).map(drop);
        }

        debug!(code = %reply.code, "EHLO rejected, falling back to HELO");
        self.command(Command::Helo(name))
            .await?
            .require(ReplyCode::is_positive)?;
        self.capabilities = Capabilities::default();
        Ok(())
    }

    async fn upgrade(&mut self) -> Result<()> {
        let stream = self.stream.take().ok_or(Error::NotConnected)?;
        let host = self.config.host.clone();
        let upgraded = with_timeout(self.config.connect_timeout, stream.upgrade(&host)).await;
        match upgraded {
            Ok(stream) => {
                debug!(%host, "STARTTLS upgrade complete");
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    async fn command(&mut self, command: Command) -> Result<Reply> {
        debug!(?command, "SMTP >");
        let limit = self.config.command_timeout;
        let reply = match self.stream.as_mut() {
            Some(stream) => {
                with_timeout(limit, async {
                    stream.write_all(&command.to_bytes()).await?;
                    read_reply(stream).await
                })
                .await
            }
            None => Err(Error::NotConnected),
        };
        let reply = self.settle(reply)?;
        debug!(code = %reply.code, verb = command.verb(), "SMTP <");
        if reply.code == ReplyCode::SERVICE_UNAVAILABLE {
            self.close();
        }
        Ok(reply)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let limit = self.config.command_timeout;
        let written = match self.stream.as_mut() {
            Some(stream) => with_timeout(limit, stream.write_all(bytes)).await,
            None => Err(Error::NotConnected),
        };
        self.settle(written)
    }

    /// Closes the connection if `result` leaves it unusable.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            debug!(error = %e, "dropping unusable SMTP connection");
            self.close();
        }
        result
    }

    fn close(&mut self) {
        self.stream = None;
        self.state = ConnectionState::NotConnected;
        self.greeted = false;
        self.authenticated = false;
        self.capabilities = Capabilities::default();
        self.encoder = DataEncoder::new();
    }
}

/// A path with CR or LF would end the command line early.
fn single_line(path: &str) -> Result<()> {
    if path.contains(['\r', '\n']) {
        return Err(Error::Protocol(format!("line break in path {path:?}")));
    }
    Ok(())
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        let last = is_last_line(&line);
        lines.push(line);
        if last {
            return Reply::parse(&lines);
        }
    }
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(Error::Timeout(limit)))
}
