//! Interface flag control.
//!
//! Reads the flag word of a network interface from its link header and
//! toggles the administrative up flag through route netlink requests.

use super::InterfaceError;
use futures::TryStreamExt;
use netlink_packet_route::link::{LinkFlag, LinkMessage};
use rtnetlink::{new_connection, Handle};
use std::fmt;
use tracing::debug;

/// Kernel interface flag word (`IFF_*`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterfaceFlags(u32);

impl InterfaceFlags {
    const UP: u32 = libc::IFF_UP as u32;
    const RUNNING: u32 = libc::IFF_RUNNING as u32;

    /// Create from a raw flag word.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Collect the flags reported in a link header.
    pub fn from_link_flags(flags: &[LinkFlag]) -> Self {
        let bits = flags.iter().fold(0, |bits, flag| match flag {
            LinkFlag::Up => bits | Self::UP,
            LinkFlag::Running => bits | Self::RUNNING,
            _ => bits,
        });
        Self(bits)
    }

    /// Get the raw flag word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Administratively up.
    pub fn is_up(self) -> bool {
        self.0 & Self::UP != 0
    }

    /// Operationally running (carrier detected).
    pub fn is_running(self) -> bool {
        self.0 & Self::RUNNING != 0
    }

    /// Same flags with the administrative up bit set.
    pub fn with_up(self) -> Self {
        Self(self.0 | Self::UP)
    }
}

impl fmt::Display for InterfaceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let admin = if self.is_up() { "up" } else { "down" };
        let oper = if self.is_running() { "running" } else { "no-carrier" };
        write!(f, "{},{}", admin, oper)
    }
}

/// Query/set facility for interface flags.
///
/// The readiness monitor is generic over this so it can be driven without
/// touching real interfaces.
#[allow(async_fn_in_trait)]
pub trait InterfaceControl {
    /// Read the current flag word.
    async fn flags(&self, name: &str) -> Result<InterfaceFlags, InterfaceError>;

    /// Set or clear the administrative up flag.
    async fn set_up(&self, name: &str, up: bool) -> Result<(), InterfaceError>;

    /// Resolve the kernel interface index.
    async fn index(&self, name: &str) -> Result<u32, InterfaceError>;
}

/// Reject names the kernel could never match.
fn validate_name(name: &str) -> Result<(), InterfaceError> {
    if name.is_empty() || name.len() >= libc::IFNAMSIZ || name.contains('\0') {
        return Err(InterfaceError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Interface control over an rtnetlink connection.
///
/// The connection task ends once this value is dropped.
pub struct NetlinkControl {
    handle: Handle,
}

impl NetlinkControl {
    /// Open the connection. Must be called from within a tokio runtime.
    pub fn open() -> Result<Self, InterfaceError> {
        let (connection, handle, _) = new_connection().map_err(InterfaceError::ControlSocket)?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Fetch the link message for `name`.
    async fn link(&self, name: &str) -> Result<LinkMessage, InterfaceError> {
        validate_name(name)?;
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();

        match links.try_next().await {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(InterfaceError::NotFound(name.to_string())),
            Err(rtnetlink::Error::NetlinkError(msg))
                if msg.code.map(|code| code.get()) == Some(-libc::ENODEV) =>
            {
                Err(InterfaceError::NotFound(name.to_string()))
            }
            Err(e) => Err(InterfaceError::QueryFlags {
                name: name.to_string(),
                source: e,
            }),
        }
    }
}

impl InterfaceControl for NetlinkControl {
    async fn flags(&self, name: &str) -> Result<InterfaceFlags, InterfaceError> {
        let link = self.link(name).await?;
        let flags = InterfaceFlags::from_link_flags(&link.header.flags);
        debug!(interface = name, flags = %flags, "Read interface flags");
        Ok(flags)
    }

    async fn set_up(&self, name: &str, up: bool) -> Result<(), InterfaceError> {
        let index = self.link(name).await?.header.index;
        let request = self.handle.link().set(index);
        let request = if up { request.up() } else { request.down() };
        request
            .execute()
            .await
            .map_err(|e| InterfaceError::SetFlags {
                name: name.to_string(),
                source: e,
            })?;
        debug!(interface = name, up, "Wrote interface flags");
        Ok(())
    }

    async fn index(&self, name: &str) -> Result<u32, InterfaceError> {
        Ok(self.link(name).await?.header.index)
    }
}

impl fmt::Debug for NetlinkControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetlinkControl").finish_non_exhaustive()
    }
}

/// Resolve an interface name to its kernel index.
pub async fn interface_index(name: &str) -> Result<u32, InterfaceError> {
    NetlinkControl::open()?.index(name).await
}
