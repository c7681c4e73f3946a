//! The send backlog.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Completion callback for one message.
pub(crate) type Callback<M> = Box<dyn FnOnce(Result<()>, M) + Send + 'static>;

/// Runs a completion callback on the worker. A panic in it is caught and
/// logged so the remaining callbacks still fire.
pub(crate) fn notify<M>(callback: Callback<M>, result: Result<()>, message: M) {
    if panic::catch_unwind(AssertUnwindSafe(move || callback(result, message))).is_err() {
        warn!("completion callback panicked");
    }
}

/// A validated message waiting for, or going through, its envelope.
pub(crate) struct PendingSend<M> {
    message: M,
    sender: String,
    recipients: VecDeque<String>,
    return_path: Option<String>,
    callback: Callback<M>,
}

impl<M> PendingSend<M> {
    pub(crate) fn new(
        message: M,
        sender: String,
        recipients: impl IntoIterator<Item = String>,
        return_path: Option<String>,
        callback: Callback<M>,
    ) -> Self {
        Self {
            message,
            sender,
            recipients: recipients.into_iter().collect(),
            return_path,
            callback,
        }
    }

    pub(crate) const fn message(&self) -> &M {
        &self.message
    }

    /// `MAIL FROM` path: the return path if set, otherwise the sender.
    pub(crate) fn reverse_path(&self) -> String {
        format!("<{}>", self.return_path.as_deref().unwrap_or(&self.sender))
    }

    /// Removes the next recipient in envelope order.
    pub(crate) fn next_recipient(&mut self) -> Option<String> {
        self.recipients.pop_front()
    }

    pub(crate) fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }

    /// Reports the outcome. Consumes the entry, so this happens once.
    pub(crate) fn complete(self, result: Result<()>) {
        notify(self.callback, result, self.message);
    }

    fn snapshot(&self) -> Queued {
        Queued {
            sender: self.sender.clone(),
            return_path: self.return_path.clone(),
            recipients: self.recipients.iter().cloned().collect(),
        }
    }
}

impl<M> fmt::Debug for PendingSend<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSend")
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .field("return_path", &self.return_path)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Queued {
    /// Envelope sender parsed from `From`.
    pub sender: String,
    /// Envelope sender override parsed from `Return-Path`.
    pub return_path: Option<String>,
    /// Recipients in `RCPT` order.
    pub recipients: Vec<String>,
}

/// FIFO of pending sends. Insertion order is send order.
pub(crate) struct SendQueue<M> {
    items: VecDeque<PendingSend<M>>,
}

impl<M> SendQueue<M> {
    pub(crate) const fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, pending: PendingSend<M>) {
        self.items.push_back(pending);
    }

    pub(crate) fn pop(&mut self) -> Option<PendingSend<M>> {
        self.items.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Queued> {
        self.items.iter().map(PendingSend::snapshot).collect()
    }

    /// Removes every entry, completing each with a fresh copy of `err`.
    pub(crate) fn fail_all(&mut self, err: impl Fn() -> crate::Error) {
        for pending in self.items.drain(..) {
            pending.complete(Err(err()));
        }
    }
}
