//! The public handle and the worker that owns the connection.
//!
//! Every [`Client`] clone talks to one worker task over a channel. The worker
//! is the only owner of the queue, the idle timer and the transport, and it
//! re-evaluates what to do next after each event:
//!
//! ```text
//! submit ──► queue ──► poll ──┬─► connect job ──┐
//!                    ▲        ├─► send job ─────┤
//!                    │        └─► arm idle timer│
//!                    └──────── job finished ◄───┘
//! ```
//!
//! While a job runs the transport is moved into it, so a second connect or
//! send cannot start until the first hands the transport back.
//!
//! Submissions are validated alongside everything else: a slow
//! [`Message::validate`] holds back only the messages submitted after it,
//! never the job, the idle timer or `backlog()`.

use std::collections::VecDeque;
use std::future::Future;
use std::panic;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::connect;
use crate::envelope;
use crate::error::{Error, Result};
use crate::idle::IdleTimer;
use crate::message::{Draft, Email, Message};
use crate::queue::{Callback, PendingSend, Queued, SendQueue};
use crate::transport::{ConnectionState, Transport};
use crate::validate;

enum Command<M> {
    Submit { message: M, callback: Callback<M> },
    Backlog(oneshot::Sender<Vec<Queued>>),
}

/// Queues messages for delivery over a single SMTP connection.
///
/// Messages are sent one at a time in submission order. The connection is
/// opened on demand, reused while the queue has work, and closed after
/// the configured idle timeout. A failure only affects the
/// message it happened to.
///
/// Dropping every clone lets the worker finish the queue, quit the
/// connection and exit.
pub struct Client<M: Message = Email> {
    commands: mpsc::UnboundedSender<Command<M>>,
}

impl<M: Message> Clone for Client<M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<M: Message> std::fmt::Debug for Client<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl<M: Message> Client<M> {
    /// Spawns the worker for `transport`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new<T: Transport>(transport: T, config: ClientConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(Worker::new(transport, config, rx).run());
        Self { commands }
    }

    /// Queues `message`; `callback` receives the outcome exactly once.
    ///
    /// The message is validated first. If validation fails, or the worker
    /// has stopped, the callback gets the error and nothing is queued.
    ///
    /// The callback runs on the worker task and should return quickly. A
    /// panic inside it is caught and logged.
    pub fn submit<F>(&self, message: M, callback: F)
    where
        F: FnOnce(Result<()>, M) + Send + 'static,
    {
        let command = Command::Submit {
            message,
            callback: Box::new(callback),
        };
        if let Err(mpsc::error::SendError(Command::Submit { message, callback })) =
            self.commands.send(command)
        {
            callback(Err(Error::Closed), message);
        }
    }

    /// Queues `message` and waits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns whatever error the message was completed with.
    pub async fn send(&self, message: M) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(message, move |result, _| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(Error::Closed))
    }

    /// Messages waiting to be sent, head first.
    ///
    /// The message currently being sent, and messages still being
    /// validated, are not included.
    pub async fn backlog(&self) -> Vec<Queued> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Backlog(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of messages waiting to be sent.
    pub async fn backlog_len(&self) -> usize {
        self.backlog().await.len()
    }

    /// Returns true once the worker has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl Client<Email> {
    /// Builds an [`Email`] from `draft` and queues it.
    ///
    /// A draft without a sender, recipients or body is rejected before this
    /// returns: the callback has already run and the queue is untouched.
    pub fn submit_draft<F>(&self, draft: Draft, callback: F)
    where
        F: FnOnce(Result<()>, Email) + Send + 'static,
    {
        match draft.check() {
            Ok(()) => self.submit(Email::new(draft), callback),
            Err(err) => {
                debug!(error = %err, "draft rejected");
                callback(Err(err), Email::new(draft));
            }
        }
    }
}

enum Outcome<M> {
    Connected(Result<()>),
    Sent(PendingSend<M>, Result<()>),
    Quit,
}

type Job<T, M> = JoinHandle<(T, Outcome<M>)>;
type Admission<M> = Pin<Box<dyn Future<Output = Option<PendingSend<M>>> + Send>>;

struct Worker<T, M> {
    config: ClientConfig,
    commands: mpsc::UnboundedReceiver<Command<M>>,
    open: bool,
    /// Submissions still validating, in submission order.
    admissions: VecDeque<Admission<M>>,
    queue: SendQueue<M>,
    /// Present whenever no job is running.
    transport: Option<T>,
    job: Option<Job<T, M>>,
    ready: bool,
    sending: bool,
    idle: IdleTimer,
}

impl<T: Transport, M: Message> Worker<T, M> {
    fn new(transport: T, config: ClientConfig, commands: mpsc::UnboundedReceiver<Command<M>>) -> Self {
        Self {
            config,
            commands,
            open: true,
            admissions: VecDeque::new(),
            queue: SendQueue::new(),
            transport: Some(transport),
            job: None,
            ready: false,
            sending: false,
            idle: IdleTimer::default(),
        }
    }

    async fn run(mut self) {
        loop {
            let changed = tokio::select! {
                biased;
                admitted = next(self.admissions.front_mut()), if !self.admissions.is_empty() => {
                    self.admissions.pop_front();
                    match admitted {
                        Some(pending) => {
                            self.queue.push(pending);
                            trace!(queued = self.queue.len(), "message queued");
                            true
                        }
                        None => false,
                    }
                },
                command = self.commands.recv(), if self.open => match command {
                    Some(command) => {
                        self.handle(command);
                        false
                    }
                    None => {
                        debug!("all handles dropped; draining queue");
                        self.open = false;
                        true
                    }
                },
                joined = next(self.job.as_mut()), if self.job.is_some() => {
                    self.job = None;
                    if !self.finish(joined) {
                        return;
                    }
                    true
                },
                () = self.idle.expired(), if self.idle.is_armed() => {
                    self.quit_idle();
                    false
                },
                else => {
                    warn!(queued = self.queue.len(), "no way to make progress; failing queued messages");
                    self.queue.fail_all(|| Error::Closed);
                    break;
                },
            };

            if !self.open && self.admissions.is_empty() && self.queue.is_empty() && self.job.is_none() {
                break;
            }
            if changed {
                self.poll();
            }
        }

        self.idle.cancel();
        if let Some(transport) = self.transport.as_mut()
            && transport.state() != ConnectionState::NotConnected
        {
            info!("closing connection");
            if let Err(err) = transport.quit().await {
                debug!(error = %err, "quit failed");
            }
        }
        debug!("worker stopped");
    }

    fn handle(&mut self, command: Command<M>) {
        match command {
            Command::Submit { message, callback } => {
                self.admissions.push_back(Box::pin(validate::prepare(message, callback)));
            }
            Command::Backlog(reply) => {
                let _ = reply.send(self.queue.snapshot());
            }
        }
    }

    /// Decides the next step. Safe to call at any time.
    fn poll(&mut self) {
        self.idle.cancel();

        let Some(state) = self.transport.as_ref().map(Transport::state) else {
            trace!("exchange in flight");
            return;
        };

        if self.queue.is_empty() {
            if state == ConnectionState::Connected {
                trace!(timeout = ?self.config.idle_timeout, "queue empty; idle timer armed");
                self.idle.arm(self.config.idle_timeout);
            }
            return;
        }

        match state {
            ConnectionState::NotConnected => self.start_connect(),
            ConnectionState::Connected if self.ready && !self.sending => self.start_send(),
            state => trace!(?state, ready = self.ready, sending = self.sending, "waiting"),
        }
    }

    fn start_connect(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        self.ready = false;
        info!("connecting");
        self.job = Some(tokio::spawn(async move {
            let result = connect::establish(&mut transport).await;
            (transport, Outcome::Connected(result))
        }));
    }

    fn start_send(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let Some(mut pending) = self.queue.pop() else {
            self.transport = Some(transport);
            return;
        };
        self.sending = true;
        debug!(?pending, "sending");
        self.job = Some(tokio::spawn(async move {
            let result = envelope::deliver(&mut transport, &mut pending).await;
            (transport, Outcome::Sent(pending, result))
        }));
    }

    fn quit_idle(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        info!("idle; closing connection");
        self.job = Some(tokio::spawn(async move {
            if let Err(err) = transport.quit().await {
                debug!(error = %err, "quit failed");
            }
            (transport, Outcome::Quit)
        }));
    }

    /// Takes back the transport and reports the job's result. Returns false
    /// if the worker has to stop.
    fn finish(&mut self, joined: std::result::Result<(T, Outcome<M>), JoinError>) -> bool {
        let (transport, outcome) = match joined {
            Ok(done) => done,
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => {
                warn!(error = %err, "exchange cancelled; failing queued messages");
                self.queue.fail_all(|| Error::Closed);
                return false;
            }
        };
        self.transport = Some(transport);

        match outcome {
            Outcome::Connected(Ok(())) => self.ready = true,
            Outcome::Connected(Err(err)) => {
                if let Some(head) = self.queue.pop() {
                    head.complete(Err(err));
                }
            }
            Outcome::Sent(pending, result) => {
                self.sending = false;
                match &result {
                    Ok(()) => info!("message sent"),
                    Err(err) => warn!(error = %err, "message failed"),
                }
                pending.complete(result);
            }
            Outcome::Quit => {}
        }
        true
    }
}

/// Waits on `future` if there is one, otherwise forever.
async fn next<F: Future + Unpin>(future: Option<&mut F>) -> F::Output {
    match future {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
