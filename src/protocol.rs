//! Passphrase Exchange Wire Protocol
//!
//! Every datagram is a single message: byte 0 is the command tag, the
//! remaining bytes (if any) are the payload. There is no length prefix,
//! checksum or sequence number; the datagram boundary is the message
//! boundary.

use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Well-known UDP port for the exchange.
pub const DEFAULT_PORT: u16 = 30621;

/// Default multicast group (all-nodes, link-local scope).
pub const DEFAULT_GROUP: &str = "ff02::1";

/// Receive buffer size, tag byte included.
pub const MAX_DATAGRAM_LEN: usize = 2048;

/// Largest passphrase that fits in one datagram.
pub const MAX_PASSPHRASE_LEN: usize = MAX_DATAGRAM_LEN - 1;

/// Errors related to protocol message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("passphrase too long: max {max}, got {got}")]
    PassphraseTooLong { max: usize, got: usize },
}

// ============================================================================
// Command Tags
// ============================================================================

/// Command tag carried in the first byte of every datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Passphrase delivery. Payload is the secret bytes.
    Passphrase = 0,
    /// Receiver asking any listening sender for the passphrase.
    Request = 1,
    /// Receiver acknowledging a passphrase.
    Received = 2,
}

impl Command {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Command::Passphrase),
            1 => Some(Command::Request),
            2 => Some(Command::Received),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Passphrase => "PassphraseCmd",
            Command::Request => "RequestCmd",
            Command::Received => "ReceivedCmd",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Passphrase
// ============================================================================

/// Secret bytes recovered from the network.
///
/// The buffer is wiped when dropped and never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(Zeroizing<Vec<u8>>);

impl Passphrase {
    /// Wrap raw passphrase bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase({} bytes)", self.0.len())
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A decoded exchange datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Passphrase delivery with its payload.
    Passphrase(Passphrase),
    /// Request for a passphrase.
    Request,
    /// Acknowledgment of a delivered passphrase.
    Received,
}

impl Message {
    /// The command tag for this message.
    pub fn command(&self) -> Command {
        match self {
            Message::Passphrase(_) => Command::Passphrase,
            Message::Request => Command::Request,
            Message::Received => Command::Received,
        }
    }

    /// Build a passphrase message, rejecting payloads that would not fit
    /// in a single receive buffer.
    pub fn passphrase(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_PASSPHRASE_LEN {
            return Err(ProtocolError::PassphraseTooLong {
                max: MAX_PASSPHRASE_LEN,
                got: bytes.len(),
            });
        }
        Ok(Message::Passphrase(Passphrase::new(bytes.to_vec())))
    }

    /// Encode to wire format.
    ///
    /// The returned buffer holds a copy of the secret for passphrase
    /// messages, so it is wiped on drop as well.
    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let payload: &[u8] = match self {
            Message::Passphrase(p) => p.as_bytes(),
            Message::Request | Message::Received => &[],
        };
        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(self.command().to_byte());
        buf.extend_from_slice(payload);
        Zeroizing::new(buf)
    }

    /// Decode a received datagram.
    ///
    /// Returns `None` for an empty datagram or an unknown tag. Any
    /// trailing bytes after a `Request` or `Received` tag are ignored.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        let (&tag, payload) = datagram.split_first()?;
        match Command::from_byte(tag)? {
            Command::Passphrase => Some(Message::Passphrase(Passphrase::new(payload.to_vec()))),
            Command::Request => Some(Message::Request),
            Command::Received => Some(Message::Received),
        }
    }
}
