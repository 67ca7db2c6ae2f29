use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use super::*;

const IFINDEX: u32 = 2;
const OTHER_IFINDEX: u32 = 7;

// ===== Notification datagram builders =====

fn nlmsg(message_type: u16, body: &[u8]) -> Vec<u8> {
    let len = 16 + body.len();
    let mut buf = Vec::with_capacity(len + 3);
    buf.extend_from_slice(&(len as u32).to_ne_bytes());
    buf.extend_from_slice(&message_type.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes()); // flags
    buf.extend_from_slice(&0u32.to_ne_bytes()); // seq
    buf.extend_from_slice(&0u32.to_ne_bytes()); // pid
    buf.extend_from_slice(body);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    buf
}

fn newlink(index: u32, running: bool) -> Vec<u8> {
    let mut flags = (libc::IFF_UP | libc::IFF_MULTICAST) as u32;
    if running {
        flags |= (libc::IFF_RUNNING | libc::IFF_LOWER_UP) as u32;
    }
    let mut body = Vec::with_capacity(16);
    body.push(libc::AF_UNSPEC as u8);
    body.push(0);
    body.extend_from_slice(&1u16.to_ne_bytes()); // ARPHRD_ETHER
    body.extend_from_slice(&index.to_ne_bytes());
    body.extend_from_slice(&flags.to_ne_bytes());
    body.extend_from_slice(&u32::MAX.to_ne_bytes()); // change mask
    nlmsg(libc::RTM_NEWLINK, &body)
}

fn newaddr(index: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.push(libc::AF_INET6 as u8);
    body.push(64); // prefix length
    body.push(0); // flags
    body.push(253); // RT_SCOPE_LINK
    body.extend_from_slice(&index.to_ne_bytes());
    nlmsg(libc::RTM_NEWADDR, &body)
}

fn done() -> Vec<u8> {
    nlmsg(libc::NLMSG_DONE as u16, &0i32.to_ne_bytes())
}

fn error() -> Vec<u8> {
    nlmsg(libc::NLMSG_ERROR as u16, &(-libc::EINVAL).to_ne_bytes())
}

fn datagram(records: &[Vec<u8>]) -> Vec<u8> {
    records.concat()
}

// ===== Test doubles =====

/// Flag control backed by a queue of flag words.
///
/// Each query pops the next word; the last one repeats forever. Writes of
/// the up flag are recorded.
struct FakeControl {
    flags: RefCell<VecDeque<InterfaceFlags>>,
    writes: RefCell<Vec<bool>>,
    fail_set: bool,
}

impl FakeControl {
    fn new(flags: &[u32]) -> Self {
        Self {
            flags: RefCell::new(flags.iter().copied().map(InterfaceFlags::from_bits).collect()),
            writes: RefCell::new(Vec::new()),
            fail_set: false,
        }
    }

    fn writes(&self) -> Vec<bool> {
        self.writes.borrow().clone()
    }
}

impl InterfaceControl for FakeControl {
    async fn flags(&self, name: &str) -> Result<InterfaceFlags, InterfaceError> {
        let mut queue = self.flags.borrow_mut();
        if queue.len() > 1 {
            return Ok(queue.pop_front().unwrap());
        }
        queue.front().copied().ok_or_else(|| InterfaceError::QueryFlags {
            name: name.to_string(),
            source: rtnetlink::Error::RequestFailed,
        })
    }

    async fn set_up(&self, name: &str, up: bool) -> Result<(), InterfaceError> {
        if self.fail_set {
            return Err(InterfaceError::SetFlags {
                name: name.to_string(),
                source: rtnetlink::Error::RequestFailed,
            });
        }
        self.writes.borrow_mut().push(up);
        Ok(())
    }

    async fn index(&self, _name: &str) -> Result<u32, InterfaceError> {
        Ok(IFINDEX)
    }
}

/// Notification source replaying a fixed script.
///
/// Reading past the end fails, which surfaces as a fatal read error.
struct ScriptedSource {
    script: VecDeque<io::Result<Vec<u8>>>,
    reads: Rc<Cell<usize>>,
}

impl ScriptedSource {
    fn new(script: Vec<io::Result<Vec<u8>>>) -> (Self, Rc<Cell<usize>>) {
        let reads = Rc::new(Cell::new(0));
        (
            Self {
                script: script.into(),
                reads: reads.clone(),
            },
            reads,
        )
    }
}

impl NotificationSource for ScriptedSource {
    async fn recv_datagram(&mut self) -> io::Result<Vec<u8>> {
        self.reads.set(self.reads.get() + 1);
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "script exhausted")))
    }
}

/// Source that must never be read.
struct UnreadSource;

impl NotificationSource for UnreadSource {
    async fn recv_datagram(&mut self) -> io::Result<Vec<u8>> {
        panic!("notification source read while interface already running");
    }
}

const DOWN: u32 = libc::IFF_MULTICAST as u32;
const UP: u32 = (libc::IFF_UP | libc::IFF_MULTICAST) as u32;
const RUNNING: u32 = (libc::IFF_UP | libc::IFF_MULTICAST | libc::IFF_RUNNING) as u32;

// ===== Record decoding =====

#[test]
fn test_decode_link_record() {
    let buf = newlink(IFINDEX, true);
    let events: Vec<_> = records(&buf).collect();
    assert_eq!(
        events,
        vec![LinkEvent::LinkChanged {
            index: IFINDEX,
            running: true
        }]
    );
}

#[test]
fn test_decode_multiple_records_in_order() {
    let buf = datagram(&[newaddr(IFINDEX), newlink(IFINDEX, false), newlink(IFINDEX, true)]);
    let events: Vec<_> = records(&buf).collect();
    assert_eq!(
        events,
        vec![
            LinkEvent::AddressAdded { index: IFINDEX },
            LinkEvent::LinkChanged {
                index: IFINDEX,
                running: false
            },
            LinkEvent::LinkChanged {
                index: IFINDEX,
                running: true
            },
        ]
    );
}

#[test]
fn test_decode_skips_unknown_records() {
    let route = nlmsg(libc::RTM_NEWROUTE, &[0u8; 12]);
    let buf = datagram(&[route, newaddr(IFINDEX)]);
    let events: Vec<_> = records(&buf).collect();
    assert_eq!(events, vec![LinkEvent::AddressAdded { index: IFINDEX }]);
}

#[test]
fn test_done_ends_datagram() {
    let buf = datagram(&[newlink(IFINDEX, true), done(), newaddr(IFINDEX)]);
    let events: Vec<_> = records(&buf).collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], LinkEvent::Done);
}

#[test]
fn test_error_ends_datagram() {
    let buf = datagram(&[error(), newlink(IFINDEX, true)]);
    let events: Vec<_> = records(&buf).collect();
    assert_eq!(events, vec![LinkEvent::Error]);
}

#[test]
fn test_truncated_header_yields_nothing() {
    let buf = newlink(IFINDEX, true);
    assert_eq!(records(&buf[..10]).count(), 0);
    assert_eq!(records(&[]).count(), 0);
}

#[test]
fn test_length_past_end_stops_decoding() {
    let mut buf = datagram(&[newaddr(IFINDEX), newlink(IFINDEX, true)]);
    // Drop the tail of the second record so its length field overruns
    buf.truncate(buf.len() - 4);
    let events: Vec<_> = records(&buf).collect();
    assert_eq!(events, vec![LinkEvent::AddressAdded { index: IFINDEX }]);
}

#[test]
fn test_short_body_skipped() {
    let short_link = nlmsg(libc::RTM_NEWLINK, &[0u8; 4]);
    let buf = datagram(&[short_link, newaddr(IFINDEX)]);
    let events: Vec<_> = records(&buf).collect();
    assert_eq!(events, vec![LinkEvent::AddressAdded { index: IFINDEX }]);
}

// ===== Readiness accumulation =====

#[test]
fn test_tracker_accumulates_across_datagrams() {
    let mut tracker = ReadinessTracker::new(Some(IFINDEX));
    assert!(!tracker.observe_datagram(&newlink(IFINDEX, true)));
    assert!(tracker.seen_running());
    assert!(tracker.observe_datagram(&newaddr(IFINDEX)));
}

#[test]
fn test_tracker_never_resets() {
    let mut tracker = ReadinessTracker::new(Some(IFINDEX));
    tracker.observe_datagram(&newlink(IFINDEX, true));
    tracker.observe_datagram(&newlink(IFINDEX, false));
    assert!(tracker.seen_running());
}

#[test]
fn test_tracker_ignores_other_interfaces() {
    let mut tracker = ReadinessTracker::new(Some(IFINDEX));
    let buf = datagram(&[newlink(OTHER_IFINDEX, true), newaddr(OTHER_IFINDEX)]);
    assert!(!tracker.observe_datagram(&buf));

    let mut any = ReadinessTracker::new(None);
    assert!(any.observe_datagram(&buf));
}

#[test]
fn test_tracker_ready_iff_running_and_address() {
    let candidates = [
        newlink(IFINDEX, true),
        newaddr(IFINDEX),
        newlink(IFINDEX, false),
        newlink(OTHER_IFINDEX, true),
        newaddr(OTHER_IFINDEX),
    ];

    for mask in 0u32..(1 << candidates.len()) {
        let chosen: Vec<&Vec<u8>> = candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, r)| r)
            .collect();
        let expected = mask & 0b11 == 0b11;

        for reversed in [false, true] {
            let mut ordered = chosen.clone();
            if reversed {
                ordered.reverse();
            }
            // Every way of splitting the sequence into two datagrams
            for split in 0..=ordered.len() {
                let first: Vec<u8> = ordered[..split].iter().flat_map(|r| r.iter().copied()).collect();
                let second: Vec<u8> = ordered[split..].iter().flat_map(|r| r.iter().copied()).collect();

                let mut tracker = ReadinessTracker::new(Some(IFINDEX));
                tracker.observe_datagram(&first);
                tracker.observe_datagram(&second);
                assert_eq!(
                    tracker.is_ready(),
                    expected,
                    "mask={:05b} reversed={} split={}",
                    mask,
                    reversed,
                    split
                );
            }
        }
    }
}

// ===== Monitor =====

#[tokio::test]
async fn test_already_running_returns_without_reading() {
    let control = FakeControl::new(&[RUNNING]);

    let state = ReadinessMonitor::new("eth0", UnreadSource, &control)
        .run()
        .await
        .unwrap();

    assert!(state.admin_up);
    assert!(state.operationally_running);
    assert!(control.writes().is_empty());
}

#[tokio::test]
async fn test_down_interface_is_brought_up_and_waited_for() {
    let control = FakeControl::new(&[DOWN, RUNNING]);
    let (source, reads) = ScriptedSource::new(vec![
        Ok(newlink(IFINDEX, true)),
        Ok(newaddr(IFINDEX)),
    ]);

    let state = ReadinessMonitor::new("eth0", source, &control)
        .run()
        .await
        .unwrap();

    assert_eq!(control.writes(), vec![true]);
    assert_eq!(reads.get(), 2);
    assert!(state.operationally_running);
    assert!(state.has_address);
}

#[tokio::test]
async fn test_up_but_not_running_is_not_rewritten() {
    let control = FakeControl::new(&[UP, RUNNING]);
    let (source, _reads) = ScriptedSource::new(vec![Ok(datagram(&[
        newaddr(IFINDEX),
        newlink(IFINDEX, true),
    ]))]);

    ReadinessMonitor::new("eth0", source, &control)
        .run()
        .await
        .unwrap();

    assert!(control.writes().is_empty());
}

#[tokio::test]
async fn test_running_without_address_keeps_waiting() {
    let control = FakeControl::new(&[UP, RUNNING]);
    let (source, reads) = ScriptedSource::new(vec![
        Ok(newlink(IFINDEX, true)),
        Ok(newaddr(OTHER_IFINDEX)),
    ]);

    // The script runs dry before an address for our interface arrives
    let result = ReadinessMonitor::new("eth0", source, &control).run().await;

    assert!(matches!(result, Err(InterfaceError::NotificationRead(_))));
    assert_eq!(reads.get(), 3);
}

#[tokio::test]
async fn test_interrupted_read_is_retried() {
    let control = FakeControl::new(&[UP, RUNNING]);
    let (source, reads) = ScriptedSource::new(vec![
        Err(io::Error::from(io::ErrorKind::Interrupted)),
        Ok(datagram(&[newlink(IFINDEX, true), newaddr(IFINDEX)])),
    ]);

    ReadinessMonitor::new("eth0", source, &control)
        .run()
        .await
        .unwrap();

    assert_eq!(reads.get(), 2);
}

#[tokio::test]
async fn test_read_failure_is_fatal() {
    let control = FakeControl::new(&[UP]);
    let (source, _reads) = ScriptedSource::new(vec![Err(io::Error::from_raw_os_error(libc::ENOBUFS))]);

    let result = ReadinessMonitor::new("eth0", source, &control).run().await;

    assert!(matches!(result, Err(InterfaceError::NotificationRead(_))));
}

#[tokio::test]
async fn test_set_failure_is_fatal() {
    let mut control = FakeControl::new(&[DOWN]);
    control.fail_set = true;

    let result = ReadinessMonitor::new("eth0", UnreadSource, &control).run().await;

    assert!(matches!(result, Err(InterfaceError::SetFlags { .. })));
}

#[tokio::test]
async fn test_query_failure_is_fatal() {
    let control = FakeControl::new(&[]);

    let result = ReadinessMonitor::new("eth0", UnreadSource, &control).run().await;

    assert!(matches!(result, Err(InterfaceError::QueryFlags { .. })));
}

#[tokio::test]
async fn test_not_running_after_wait_is_tolerated() {
    // Notifications say running, but the final re-check disagrees
    let control = FakeControl::new(&[UP, UP]);
    let (source, _reads) = ScriptedSource::new(vec![Ok(datagram(&[
        newlink(IFINDEX, true),
        newaddr(IFINDEX),
    ]))]);

    let state = ReadinessMonitor::new("eth0", source, &control)
        .run()
        .await
        .unwrap();

    assert!(!state.operationally_running);
    assert!(state.has_address);
}

// ===== Bring down =====

#[tokio::test]
async fn test_bring_down_clears_up_flag() {
    let control = FakeControl::new(&[RUNNING]);
    bring_down_with("eth0", &control).await.unwrap();

    assert_eq!(control.writes(), vec![false]);
}

#[tokio::test]
async fn test_bring_down_noop_when_down() {
    let control = FakeControl::new(&[DOWN]);
    bring_down_with("eth0", &control).await.unwrap();
    assert!(control.writes().is_empty());
}

#[test]
fn test_state_display() {
    let state = InterfaceState {
        name: "eth0".to_string(),
        admin_up: true,
        operationally_running: true,
        has_address: false,
    };
    assert_eq!(
        format!("{}", state),
        "eth0 (admin up, running, address not seen)"
    );
}
