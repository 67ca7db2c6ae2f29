//! Sender side of the exchange.
//!
//! Announces the passphrase once, then answers every request with the
//! passphrase again until a receiver acknowledges it.

use super::{receive_buffer, DatagramChannel, ExchangeError};
use crate::config::ExchangeConfig;
use crate::protocol::Message;
use std::fmt;
use std::io;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How a responder run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponderOutcome {
    /// A receiver acknowledged the passphrase.
    Acknowledged,
    /// Too many retry windows passed without an acknowledgment.
    Unacknowledged,
}

impl fmt::Display for ResponderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponderOutcome::Acknowledged => write!(f, "acknowledged"),
            ResponderOutcome::Unacknowledged => write!(f, "unacknowledged"),
        }
    }
}

/// Deliver `passphrase` to whichever receiver asks for it.
///
/// Gives up with [`ResponderOutcome::Unacknowledged`] after
/// `config.max_attempts()` retry windows pass in silence.
pub async fn respond_with_passphrase<C: DatagramChannel>(
    channel: &C,
    passphrase: &[u8],
    config: &ExchangeConfig,
) -> Result<ResponderOutcome, ExchangeError> {
    config.validate()?;
    let wire = Message::passphrase(passphrase)?.encode();
    let mut buf = receive_buffer(config);
    let window = config.retry_interval();
    let max_attempts = config.max_attempts();

    channel.send(&wire).await.map_err(ExchangeError::Send)?;
    debug!(len = passphrase.len(), "Announced passphrase");

    let mut silent_windows = 0u32;
    loop {
        match timeout(window, channel.recv(&mut buf)).await {
            Err(_elapsed) => {
                silent_windows += 1;
                if silent_windows >= max_attempts {
                    warn!(attempts = silent_windows, "No receiver acknowledged the passphrase");
                    return Ok(ResponderOutcome::Unacknowledged);
                }
                debug!(silent_windows, "Still waiting for a request");
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => return Err(ExchangeError::Receive(e)),
            Ok(Ok(len)) => match Message::decode(&buf[..len]) {
                Some(Message::Request) => {
                    info!("Passphrase requested, sending");
                    channel.send(&wire).await.map_err(ExchangeError::Send)?;
                }
                Some(Message::Received) => {
                    info!("Passphrase acknowledged");
                    return Ok(ResponderOutcome::Acknowledged);
                }
                // Another sender's passphrase or noise
                _ => debug!(len, "Ignoring datagram"),
            },
        }
    }
}
