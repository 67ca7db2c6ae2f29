//! Multicast datagram socket for the exchange.

use super::DatagramChannel;
use crate::config::{ConfigError, ExchangeConfig};
use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{info, trace};

/// Errors setting up the exchange socket.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to join multicast group {group}: {source}")]
    JoinGroup { group: Ipv6Addr, source: io::Error },

    #[error("failed to configure socket: {0}")]
    Configure(#[source] io::Error),

    #[error(transparent)]
    InvalidGroup(#[from] ConfigError),
}

/// UDP socket bound to the exchange port and joined to the group.
///
/// Outgoing datagrams always go to the group address. Multicast loopback is
/// disabled so our own requests never come back to us.
pub struct MulticastSocket {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl MulticastSocket {
    /// Bind `[::]:port`, join the group on `interface_index` and disable
    /// multicast loopback.
    ///
    /// An index of 0 lets the kernel pick the interface.
    pub async fn bind(config: &ExchangeConfig, interface_index: u32) -> Result<Self, SocketError> {
        let group = config.group()?;
        let port = config.port();

        let bind_addr = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| SocketError::Bind {
                addr: bind_addr,
                source: e,
            })?;

        socket
            .join_multicast_v6(&group, interface_index)
            .map_err(|e| SocketError::JoinGroup { group, source: e })?;
        socket
            .set_multicast_loop_v6(false)
            .map_err(SocketError::Configure)?;

        let destination = SocketAddr::V6(SocketAddrV6::new(group, port, 0, interface_index));

        info!(
            local_addr = %bind_addr,
            group = %group,
            interface_index,
            "Joined multicast group"
        );

        Ok(Self {
            socket,
            destination,
        })
    }

    /// Wrap an already bound socket with an explicit destination.
    pub fn from_socket(socket: UdpSocket, destination: SocketAddr) -> Self {
        Self {
            socket,
            destination,
        }
    }

    /// Get the local bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Where outgoing datagrams are sent.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl DatagramChannel for MulticastSocket {
    async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        let sent = self.socket.send_to(datagram, self.destination).await?;
        trace!(remote_addr = %self.destination, bytes = sent, "Datagram sent");
        Ok(sent)
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, remote_addr) = self.socket.recv_from(buf).await?;
        trace!(remote_addr = %remote_addr, bytes = len, "Datagram received");
        Ok(len)
    }
}

impl std::fmt::Debug for MulticastSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastSocket")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("destination", &self.destination)
            .finish()
    }
}
