//! netkey: network passphrase delivery for early boot
//!
//! Brings a network interface up, waits until the kernel reports it usable,
//! then obtains a passphrase from a peer on the same link by broadcasting
//! requests to an IPv6 link-local multicast group.

pub mod config;
pub mod exchange;
pub mod interface;
pub mod protocol;

// Re-export config types
pub use config::{Config, ConfigError, ExchangeConfig, InterfaceConfig};

// Re-export exchange types
pub use exchange::{
    acquire_passphrase, respond_with_passphrase, DatagramChannel, ExchangeError, ExchangeSession,
    ExchangeState, MulticastSocket, ResponderOutcome, SocketError,
};

// Re-export interface types
pub use interface::{
    bring_down, ensure_up_and_ready, interface_index, InterfaceError, InterfaceFlags,
    InterfaceState,
};

// Re-export protocol types
pub use protocol::{Command, Message, Passphrase, ProtocolError};
