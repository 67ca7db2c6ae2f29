//! Passphrase Exchange Protocol
//!
//! The receiving side broadcasts a request on a timer until some peer
//! answers with a passphrase, acknowledges it and hands the payload back.
//!
//! The retry loop is an explicit state machine:
//!
//! ```text
//! Requesting -> Waiting -> Matched
//!                       -> TimedOut    -> Requesting
//!                       -> Interrupted -> Waiting
//!                       -> (any other datagram) -> Requesting
//! ```
//!
//! A datagram that is not a passphrase, including a request echoed by
//! another listener, always goes back through `Requesting`, so every
//! non-matching datagram causes a fresh request broadcast.

pub mod responder;
pub mod socket;

pub use responder::{respond_with_passphrase, ResponderOutcome};
pub use socket::{MulticastSocket, SocketError};

use crate::config::{ConfigError, ExchangeConfig};
use crate::protocol::{Message, Passphrase, ProtocolError};
use std::io::{self, Write};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Errors that end an exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("failed to send datagram: {0}")]
    Send(#[source] io::Error),

    #[error("failed to receive datagram: {0}")]
    Receive(#[source] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A bidirectional datagram endpoint with a fixed destination.
#[allow(async_fn_in_trait)]
pub trait DatagramChannel {
    /// Send one datagram to the channel's destination.
    async fn send(&self, datagram: &[u8]) -> io::Result<usize>;

    /// Receive one datagram into `buf`, returning its length.
    ///
    /// Datagrams longer than `buf` are truncated.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Receiver state.
#[derive(Debug, PartialEq, Eq)]
pub enum ExchangeState {
    /// About to broadcast a request.
    Requesting,
    /// Waiting for a datagram within the retry window.
    Waiting,
    /// A passphrase arrived.
    Matched(Passphrase),
    /// The retry window elapsed without a datagram.
    TimedOut,
    /// The wait was interrupted by a signal.
    Interrupted,
}

impl ExchangeState {
    /// Transition taken when a datagram arrives while waiting.
    pub fn after_datagram(datagram: &[u8]) -> Self {
        match Message::decode(datagram) {
            Some(Message::Passphrase(passphrase)) => ExchangeState::Matched(passphrase),
            Some(other) => {
                debug!(command = %other.command(), "Ignoring datagram, re-requesting");
                ExchangeState::Requesting
            }
            None => {
                debug!(len = datagram.len(), "Ignoring datagram without a valid command");
                ExchangeState::Requesting
            }
        }
    }
}

/// One passphrase acquisition over a joined channel.
pub struct ExchangeSession<'a, C> {
    channel: &'a C,
    config: &'a ExchangeConfig,
    requests_sent: u64,
}

impl<'a, C: DatagramChannel> ExchangeSession<'a, C> {
    pub fn new(channel: &'a C, config: &'a ExchangeConfig) -> Self {
        Self {
            channel,
            config,
            requests_sent: 0,
        }
    }

    /// Run until a passphrase arrives or a send/receive fails.
    ///
    /// There is no overall timeout. Fails up front if the configuration
    /// does not validate.
    pub async fn run(mut self) -> Result<Passphrase, ExchangeError> {
        self.config.validate()?;
        let mut buf = receive_buffer(self.config);
        let window = self.config.retry_interval();
        let mut state = ExchangeState::Requesting;

        loop {
            state = match state {
                ExchangeState::Requesting => {
                    self.ring_bell();
                    self.channel
                        .send(&Message::Request.encode())
                        .await
                        .map_err(ExchangeError::Send)?;
                    self.requests_sent += 1;
                    debug!(requests = self.requests_sent, "Sent passphrase request");
                    ExchangeState::Waiting
                }
                ExchangeState::Waiting => match timeout(window, self.channel.recv(&mut buf)).await {
                    Err(_elapsed) => ExchangeState::TimedOut,
                    Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                        ExchangeState::Interrupted
                    }
                    Ok(Err(e)) => return Err(ExchangeError::Receive(e)),
                    Ok(Ok(len)) => ExchangeState::after_datagram(&buf[..len]),
                },
                ExchangeState::TimedOut => {
                    debug!(window_secs = window.as_secs(), "No reply, re-requesting");
                    ExchangeState::Requesting
                }
                ExchangeState::Interrupted => {
                    debug!("Wait interrupted, resuming");
                    ExchangeState::Waiting
                }
                ExchangeState::Matched(passphrase) => {
                    if let Err(e) = self.channel.send(&Message::Received.encode()).await {
                        warn!(error = %e, "Failed to acknowledge passphrase");
                    }
                    info!(
                        len = passphrase.len(),
                        requests = self.requests_sent,
                        "Passphrase received"
                    );
                    return Ok(passphrase);
                }
            };
        }
    }

    fn ring_bell(&self) {
        if self.config.bell() {
            let mut stderr = io::stderr();
            let _ = stderr.write_all(b"\x07").and_then(|()| stderr.flush());
        }
    }
}

/// Receive buffer sized from the configuration.
///
/// It may hold a passphrase, so it is wiped on drop.
pub(crate) fn receive_buffer(config: &ExchangeConfig) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(vec![0u8; config.buffer_size()])
}

/// Acquire one passphrase over an already bound and joined channel.
pub async fn acquire_passphrase<C: DatagramChannel>(
    channel: &C,
    config: &ExchangeConfig,
) -> Result<Passphrase, ExchangeError> {
    ExchangeSession::new(channel, config).run().await
}
