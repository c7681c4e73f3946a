//! Opening a connection ready for envelopes.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::transport::{ConnectionState, Transport};

/// Connects, then logs in or greets.
///
/// A failed login or greeting closes the socket again, so the next attempt
/// starts from a fresh connection.
pub(crate) async fn establish<T: Transport>(transport: &mut T) -> Result<()> {
    if let Err(err) = transport.connect().await {
        warn!(error = %err, "connect failed");
        if transport.state() != ConnectionState::NotConnected {
            transport.force_close();
        }
        return Err(Error::connection(err));
    }

    let handshake = if transport.is_authorized() {
        transport.greet_if_needed().await
    } else {
        transport.login().await
    };
    if let Err(err) = handshake {
        warn!(error = %err, "handshake failed");
        transport.force_close();
        return Err(Error::connection(err));
    }

    info!("connection ready");
    Ok(())
}
