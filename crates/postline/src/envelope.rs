//! One message's trip through MAIL, RCPT, DATA and the body.
//!
//! The exchange is a small state machine. Every stage produces either the
//! next stage or a [`Failure`], and all failures leave through
//! [`recover`], so a rejected `RCPT` and a rejected `MAIL` are cleaned up
//! the same way.

use std::io;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{Error, Result, Step};
use crate::message::{BodyStream, Message};
use crate::queue::PendingSend;
use crate::transport::Transport;

enum Stage {
    Mail,
    Rcpt,
    Data,
    Stream(BodyStream),
    EndData,
    Done,
}

enum Failure<E> {
    /// The server refused a step; the transaction can be reset.
    Rejected(Step, E),
    /// The body could not be produced mid-DATA.
    Body(io::Error),
    /// Writing body bytes failed mid-DATA.
    Write(E),
}

/// Sends `pending` over an open, ready connection.
///
/// # Panics
///
/// Panics if the entry reaches `RCPT` with no recipients, which admission
/// rules out.
pub(crate) async fn deliver<T, M>(transport: &mut T, pending: &mut PendingSend<M>) -> Result<()>
where
    T: Transport,
    M: Message,
{
    let mut stage = Stage::Mail;
    loop {
        let next = match stage {
            Stage::Mail => {
                let path = pending.reverse_path();
                debug!(%path, "MAIL FROM");
                transport
                    .mail(&path)
                    .await
                    .map(|()| Stage::Rcpt)
                    .map_err(|err| Failure::Rejected(Step::Mail, err))
            }
            Stage::Rcpt => {
                let Some(address) = pending.next_recipient() else {
                    unreachable!("envelope reached RCPT with no recipients left");
                };
                let path = format!("<{address}>");
                debug!(%path, "RCPT TO");
                transport
                    .rcpt(&path)
                    .await
                    .map(|()| if pending.has_recipients() { Stage::Rcpt } else { Stage::Data })
                    .map_err(|err| Failure::Rejected(Step::Rcpt, err))
            }
            Stage::Data => {
                debug!("DATA");
                match transport.data().await {
                    Ok(()) => Ok(Stage::Stream(pending.message().body())),
                    Err(err) => Err(Failure::Rejected(Step::Data, err)),
                }
            }
            Stage::Stream(mut body) => match body.next().await {
                Some(Ok(chunk)) => forward(transport, chunk).await.map(|()| Stage::Stream(body)),
                Some(Err(err)) => Err(Failure::Body(err)),
                None => Ok(Stage::EndData),
            },
            Stage::EndData => {
                debug!("end of data");
                transport
                    .end_data()
                    .await
                    .map(|()| Stage::Done)
                    .map_err(|err| Failure::Rejected(Step::EndData, err))
            }
            Stage::Done => return Ok(()),
        };

        stage = match next {
            Ok(stage) => stage,
            Err(failure) => return Err(recover(transport, failure).await),
        };
    }
}

async fn forward<T: Transport>(transport: &mut T, chunk: Bytes) -> std::result::Result<(), Failure<T::Error>> {
    if chunk.is_empty() {
        return Ok(());
    }
    transport.send_chunk(chunk).await.map_err(Failure::Write)
}

/// Puts the connection back into a usable state and names the error.
async fn recover<T: Transport>(transport: &mut T, failure: Failure<T::Error>) -> Error {
    match failure {
        Failure::Rejected(step, err) => {
            warn!(%step, error = %err, "step rejected; resetting transaction");
            if let Err(reset) = transport.reset().await {
                debug!(error = %reset, "reset failed");
            }
            Error::protocol(step, err)
        }
        Failure::Body(err) => {
            warn!(error = %err, "body failed mid-DATA; closing connection");
            transport.force_close();
            Error::Stream(err)
        }
        Failure::Write(err) => {
            warn!(error = %err, "body write failed; closing connection");
            transport.force_close();
            Error::connection(err)
        }
    }
}
