//! Interface Readiness Monitor
//!
//! Brings a network interface administratively up and waits, without
//! polling, until the kernel reports it operationally running with an
//! address assigned.
//!
//! The notification channel is opened before the interface flags are
//! inspected or changed. A bring-up that completes between the flag check
//! and the subscription would otherwise never be announced and the wait
//! would hang forever.

mod control;
mod notify;

pub use control::{interface_index, InterfaceControl, InterfaceFlags, NetlinkControl};
pub use notify::{records, LinkEvent, NetlinkSource, NotificationSource, ReadinessTracker, Records};

use std::fmt;
use std::io;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while controlling or watching an interface.
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("invalid interface name: {0:?}")]
    InvalidName(String),

    #[error("interface not found: {0}")]
    NotFound(String),

    #[error("failed to open interface control connection: {0}")]
    ControlSocket(#[source] io::Error),

    #[error("failed to read flags of {name}: {source}")]
    QueryFlags {
        name: String,
        source: rtnetlink::Error,
    },

    #[error("failed to set flags of {name}: {source}")]
    SetFlags {
        name: String,
        source: rtnetlink::Error,
    },

    #[error("failed to open link notification channel: {0}")]
    NotificationChannel(#[source] io::Error),

    #[error("failed to read link notification: {0}")]
    NotificationRead(#[source] io::Error),
}

/// Snapshot of an interface at the end of monitoring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceState {
    /// Interface name.
    pub name: String,
    /// Administrative up flag from the final flag query.
    pub admin_up: bool,
    /// Operational running flag from the final flag query.
    pub operationally_running: bool,
    /// An address notification was observed while waiting.
    pub has_address: bool,
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (admin {}, {}, address {})",
            self.name,
            if self.admin_up { "up" } else { "down" },
            if self.operationally_running { "running" } else { "not running" },
            if self.has_address { "seen" } else { "not seen" },
        )
    }
}

/// Drives one bring-up-and-wait over a notification source and a flag
/// control facility.
pub struct ReadinessMonitor<'a, S, C> {
    name: String,
    source: S,
    control: &'a C,
}

impl<'a, S, C> ReadinessMonitor<'a, S, C>
where
    S: NotificationSource,
    C: InterfaceControl,
{
    /// Create a monitor. `source` must already be subscribed.
    pub fn new(name: impl Into<String>, source: S, control: &'a C) -> Self {
        Self {
            name: name.into(),
            source,
            control,
        }
    }

    /// Bring the interface up and wait for it to become usable.
    ///
    /// Returns once the interface has been seen running and addressed, or
    /// immediately if it already reports running. A final flag re-check
    /// that still shows no carrier is logged and tolerated.
    pub async fn run(mut self) -> Result<InterfaceState, InterfaceError> {
        let name = self.name.as_str();
        let control = self.control;

        let mut flags = control.flags(name).await?;
        if !flags.is_up() {
            info!(interface = name, "Bringing interface up");
            control.set_up(name, true).await?;
            flags = flags.with_up();
        }

        let index = control.index(name).await?;
        let mut tracker = ReadinessTracker::new(Some(index));

        if !flags.is_running() {
            info!(interface = name, "Waiting for interface to come up");
            while !tracker.is_ready() {
                let datagram = match self.source.recv_datagram().await {
                    Ok(datagram) => datagram,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        debug!(interface = name, "Notification wait interrupted, retrying");
                        continue;
                    }
                    Err(e) => return Err(InterfaceError::NotificationRead(e)),
                };

                tracker.observe_datagram(&datagram);
                debug!(
                    interface = name,
                    len = datagram.len(),
                    running = tracker.seen_running(),
                    address = tracker.seen_address(),
                    "Link notification"
                );
            }
        }

        // Running/addressed before we subscribed is never re-announced
        let flags = control.flags(name).await?;
        if !flags.is_running() {
            warn!(interface = name, "Interface still not running, continuing anyway");
        }

        Ok(InterfaceState {
            name: self.name,
            admin_up: flags.is_up(),
            operationally_running: flags.is_running(),
            has_address: tracker.seen_address(),
        })
    }
}

/// Bring the named interface up and wait until it is usable.
///
/// Subscribes to kernel notifications first, then opens the control
/// connection. Both are closed on return, including on error.
pub async fn ensure_up_and_ready(name: &str) -> Result<(), InterfaceError> {
    let source = NetlinkSource::subscribe()?;
    let control = NetlinkControl::open()?;

    let state = ReadinessMonitor::new(name, source, &control).run().await?;
    info!(state = %state, "Interface ready");
    Ok(())
}

/// Clear the administrative up flag of the named interface.
///
/// Does nothing if the interface is already down.
pub async fn bring_down(name: &str) -> Result<(), InterfaceError> {
    let control = NetlinkControl::open()?;
    bring_down_with(name, &control).await
}

/// [`bring_down`] over an explicit control facility.
pub async fn bring_down_with<C: InterfaceControl>(
    name: &str,
    control: &C,
) -> Result<(), InterfaceError> {
    let flags = control.flags(name).await?;
    if flags.is_up() {
        info!(interface = name, "Bringing interface down");
        control.set_up(name, false).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
