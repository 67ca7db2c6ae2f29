//! Kernel link/address notifications.
//!
//! A route netlink socket subscribed to the link and IPv6 address groups
//! delivers datagrams holding one or more `nlmsghdr`-framed records. Each
//! datagram is decoded lazily into [`LinkEvent`]s; the header of every record
//! is bounds-checked before its body is looked at.

use super::InterfaceError;
use netlink_packet_core::NetlinkBuffer;
use netlink_packet_route::address::AddressMessageBuffer;
use netlink_packet_route::link::LinkMessageBuffer;
use netlink_sys::protocols::NETLINK_ROUTE;
use netlink_sys::{Socket, SocketAddr};
use std::io;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

/// Size of `struct nlmsghdr`.
const NLMSG_HEADER_LEN: usize = 16;

const NLMSG_ERROR: u16 = libc::NLMSG_ERROR as u16;
const NLMSG_DONE: u16 = libc::NLMSG_DONE as u16;

/// A decoded kernel notification record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Link state changed (`RTM_NEWLINK`).
    LinkChanged { index: u32, running: bool },
    /// Address assigned (`RTM_NEWADDR`).
    AddressAdded { index: u32 },
    /// End of a multipart dump.
    Done,
    /// Kernel error report.
    Error,
}

/// Lazy iterator over the records of one notification datagram.
///
/// Unknown record types are skipped. Iteration stops after a `Done` or
/// `Error` record, or at the first record whose header does not fit.
pub struct Records<'a> {
    buf: &'a [u8],
    finished: bool,
}

/// Decode the records of a single datagram.
pub fn records(datagram: &[u8]) -> Records<'_> {
    Records {
        buf: datagram,
        finished: false,
    }
}

impl<'a> Records<'a> {
    /// Split the next framed record off the front of the buffer.
    ///
    /// Returns the message type and body.
    fn next_record(&mut self) -> Option<(u16, &'a [u8])> {
        let buf = self.buf;
        let header = match NetlinkBuffer::new_checked(buf) {
            Ok(header) => header,
            Err(e) => {
                trace!(error = %e, remaining = buf.len(), "Truncated notification record");
                return None;
            }
        };
        let len = header.length() as usize;
        let message_type = header.message_type();
        if len < NLMSG_HEADER_LEN || len > buf.len() {
            return None;
        }

        let body = &buf[NLMSG_HEADER_LEN..len];
        let aligned = (len + 3) & !3;
        self.buf = buf.get(aligned..).unwrap_or(&[]);
        Some((message_type, body))
    }
}

impl Iterator for Records<'_> {
    type Item = LinkEvent;

    fn next(&mut self) -> Option<LinkEvent> {
        while !self.finished && !self.buf.is_empty() {
            let Some((message_type, body)) = self.next_record() else {
                self.finished = true;
                break;
            };

            match message_type {
                NLMSG_DONE => {
                    self.finished = true;
                    return Some(LinkEvent::Done);
                }
                NLMSG_ERROR => {
                    self.finished = true;
                    return Some(LinkEvent::Error);
                }
                libc::RTM_NEWLINK => {
                    if let Ok(link) = LinkMessageBuffer::new_checked(body) {
                        return Some(LinkEvent::LinkChanged {
                            index: link.link_index(),
                            running: link.flags() & libc::IFF_RUNNING as u32 != 0,
                        });
                    }
                    trace!(len = body.len(), "Short link record");
                }
                libc::RTM_NEWADDR => {
                    if let Ok(addr) = AddressMessageBuffer::new_checked(body) {
                        return Some(LinkEvent::AddressAdded {
                            index: addr.index(),
                        });
                    }
                    trace!(len = body.len(), "Short address record");
                }
                other => {
                    trace!(message_type = other, "Ignoring notification record");
                }
            }
        }
        None
    }
}

/// Accumulates "seen running" and "seen address" across datagrams.
///
/// Both marks only ever go from false to true.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadinessTracker {
    index: Option<u32>,
    seen_running: bool,
    seen_address: bool,
}

impl ReadinessTracker {
    /// Track events for one interface index, or for any interface if `None`.
    pub fn new(index: Option<u32>) -> Self {
        Self {
            index,
            seen_running: false,
            seen_address: false,
        }
    }

    fn is_ours(&self, index: u32) -> bool {
        self.index.map_or(true, |ours| ours == index)
    }

    /// Fold a single event into the accumulated state.
    pub fn observe(&mut self, event: &LinkEvent) {
        match *event {
            LinkEvent::LinkChanged { index, running } if self.is_ours(index) => {
                self.seen_running |= running;
            }
            LinkEvent::AddressAdded { index } if self.is_ours(index) => {
                self.seen_address = true;
            }
            _ => {}
        }
    }

    /// Fold every record of a datagram into the accumulated state.
    ///
    /// Returns whether the interface is now ready.
    pub fn observe_datagram(&mut self, datagram: &[u8]) -> bool {
        for event in records(datagram) {
            trace!(?event, "Link event");
            self.observe(&event);
        }
        self.is_ready()
    }

    pub fn seen_running(&self) -> bool {
        self.seen_running
    }

    pub fn seen_address(&self) -> bool {
        self.seen_address
    }

    /// Both running and address have been observed.
    pub fn is_ready(&self) -> bool {
        self.seen_running && self.seen_address
    }
}

/// A stream of raw notification datagrams.
#[allow(async_fn_in_trait)]
pub trait NotificationSource {
    /// Wait for the next datagram.
    ///
    /// An `Interrupted` error is retried by the caller; any other error is
    /// fatal.
    async fn recv_datagram(&mut self) -> io::Result<Vec<u8>>;
}

/// Route netlink socket subscribed to link and IPv6 address changes.
///
/// The socket is closed when this value is dropped.
pub struct NetlinkSource {
    socket: AsyncFd<Socket>,
}

impl NetlinkSource {
    /// Open and subscribe. Must be called from within a tokio runtime.
    pub fn subscribe() -> Result<Self, InterfaceError> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(InterfaceError::NotificationChannel)?;

        let groups = (libc::RTMGRP_LINK | libc::RTMGRP_IPV6_IFADDR) as u32;
        socket
            .bind(&SocketAddr::new(0, groups))
            .map_err(InterfaceError::NotificationChannel)?;
        socket
            .set_non_blocking(true)
            .map_err(InterfaceError::NotificationChannel)?;

        let socket = AsyncFd::new(socket).map_err(InterfaceError::NotificationChannel)?;
        debug!(groups, "Subscribed to link notifications");

        Ok(Self { socket })
    }
}

impl NotificationSource for NetlinkSource {
    async fn recv_datagram(&mut self) -> io::Result<Vec<u8>> {
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv_from_full()) {
                Ok(result) => return result.map(|(datagram, _)| datagram),
                Err(_would_block) => continue,
            }
        }
    }
}
