//! Admission checks that run before a message joins the queue.

use tracing::debug;

use crate::address::{self, Mailbox};
use crate::error::Error;
use crate::message::Message;
use crate::queue::{self, Callback, PendingSend};

/// Validates `message` and builds its queue entry.
///
/// Besides [`Message::validate`], every address that will reach the
/// envelope must be well formed, since the queue also accepts messages
/// that never went through [`Email`](crate::Email)'s own checks. On failure
/// the callback is completed with [`Error::Validation`] and `None` is
/// returned.
pub(crate) async fn prepare<M: Message>(message: M, callback: Callback<M>) -> Option<PendingSend<M>> {
    if let Err(reason) = message.validate().await {
        return reject(message, callback, reason);
    }

    let senders = address::parse_optional(message.from());
    let Some(sender) = senders.into_iter().next() else {
        return reject(message, callback, "missing sender".into());
    };
    let recipients: Vec<Mailbox> = [message.to(), message.cc(), message.bcc()]
        .into_iter()
        .flat_map(address::parse_optional)
        .collect();
    if recipients.is_empty() {
        return reject(message, callback, "no recipients".into());
    }
    let return_path = address::parse_optional(message.return_path()).into_iter().next();

    if let Some(bad) = std::iter::once(&sender)
        .chain(&return_path)
        .chain(&recipients)
        .find(|mailbox| !mailbox.is_well_formed())
    {
        let reason = format!("malformed address: {:?}", bad.address);
        return reject(message, callback, reason);
    }

    debug!(sender = %sender.address, recipients = recipients.len(), "message accepted");
    Some(PendingSend::new(
        message,
        sender.address,
        recipients.into_iter().map(|mailbox| mailbox.address),
        return_path.map(|mailbox| mailbox.address),
        callback,
    ))
}

fn reject<M>(message: M, callback: Callback<M>, reason: String) -> Option<PendingSend<M>> {
    debug!(%reason, "message failed validation");
    queue::notify(callback, Err(Error::Validation(reason)), message);
    None
}
