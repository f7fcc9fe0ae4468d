//! OS readiness multiplexing.
//!
//! The event loop depends only on [`Poller`]; one implementation per OS
//! family is compiled in and exported as [`DefaultPoller`]:
//!
//! | Platform                      | Poller          |
//! |-------------------------------|-----------------|
//! | Linux, Android                | `EpollPoller`   |
//! | macOS, iOS, FreeBSD, OpenBSD  | `KqueuePoller`  |
//!
//! Pollers report raw readiness. Turning readiness into port events
//! (listening vs. stream semantics, EOF detection) happens in the loop so
//! every backend behaves the same.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use bitflags::bitflags;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EpollPoller;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueuePoller;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub type DefaultPoller = EpollPoller;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub type DefaultPoller = KqueuePoller;

bitflags! {
    /// Conditions a registration asks to be woken for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

bitflags! {
    /// Conditions a poller observed on a descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Readiness: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        /// The peer hung up or shut down its write side.
        const HANGUP = 1 << 2;
        const ERROR = 1 << 3;
    }
}

impl Interest {
    /// Interest matching the in/out bits of an event mask.
    pub fn from_event_mask(mask: u32) -> Interest {
        let mut interest = Interest::empty();
        if mask & (1 << crate::message::IN_EVENT) != 0 {
            interest |= Interest::READABLE;
        }
        if mask & (1 << crate::message::OUT_EVENT) != 0 {
            interest |= Interest::WRITABLE;
        }
        interest
    }
}

/// How often a poller reports an unchanged condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Every wait while the condition holds.
    Level,
    /// Once per transition.
    Edge,
}

/// One readiness report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub token: u64,
    pub readiness: Readiness,
}

/// A readiness multiplexer.
///
/// A descriptor is registered at most once; `modify` replaces its interest
/// and `unregister` forgets it. `wait` clears `events`, blocks up to
/// `timeout` (`None` waits forever) and returns the number of reports
/// appended. `EINTR` is returned as an `Interrupted` error for the caller
/// to retry.
pub trait Poller: Send + Sized + 'static {
    fn new(max_events: usize) -> io::Result<Self>;

    fn register(
        &mut self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: Trigger,
    ) -> io::Result<()>;

    fn modify(
        &mut self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: Trigger,
    ) -> io::Result<()>;

    fn unregister(&mut self, fd: RawFd) -> io::Result<()>;

    fn wait(&mut self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> io::Result<usize>;
}

/// Milliseconds for a wait call, rounding up so a short timeout never
/// degenerates into a busy poll.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_timeout_millis() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);
    }

    #[test]
    fn test_interest_from_mask() {
        assert_eq!(Interest::from_event_mask(0b01), Interest::READABLE);
        assert_eq!(Interest::from_event_mask(0b11), Interest::READABLE | Interest::WRITABLE);
        assert!(Interest::from_event_mask(0b100).is_empty());
    }

    #[test]
    fn test_default_poller_pipe_readiness() {
        let (read, write) = fd::pipe().unwrap();
        let mut poller = DefaultPoller::new(8).unwrap();
        poller.register(read.as_raw_fd(), 7, Interest::READABLE, Trigger::Level).unwrap();

        let mut events = Vec::new();
        assert_eq!(poller.wait(&mut events, Some(Duration::ZERO)).unwrap(), 0);

        fd::write_once(write.as_raw_fd(), b"!").unwrap();
        assert_eq!(poller.wait(&mut events, Some(Duration::from_secs(5))).unwrap(), 1);
        assert_eq!(events[0].token, 7);
        assert!(events[0].readiness.contains(Readiness::READABLE));

        // Level-triggered: still ready.
        assert_eq!(poller.wait(&mut events, Some(Duration::ZERO)).unwrap(), 1);

        poller.unregister(read.as_raw_fd()).unwrap();
        assert_eq!(poller.wait(&mut events, Some(Duration::ZERO)).unwrap(), 0);
    }

    #[test]
    fn test_default_poller_edge_trigger_and_modify() {
        let (read, write) = fd::pipe().unwrap();
        let mut poller = DefaultPoller::new(8).unwrap();
        poller.register(read.as_raw_fd(), 1, Interest::READABLE, Trigger::Edge).unwrap();

        let mut events = Vec::new();
        fd::write_once(write.as_raw_fd(), b"ab").unwrap();
        assert_eq!(poller.wait(&mut events, Some(Duration::from_secs(5))).unwrap(), 1);
        // Edge-triggered: no new transition.
        assert_eq!(poller.wait(&mut events, Some(Duration::ZERO)).unwrap(), 0);

        poller.modify(read.as_raw_fd(), 2, Interest::READABLE, Trigger::Level).unwrap();
        assert_eq!(poller.wait(&mut events, Some(Duration::ZERO)).unwrap(), 1);
        assert_eq!(events[0].token, 2);
    }

    #[test]
    fn test_hangup_reported() {
        let (read, write) = fd::pipe().unwrap();
        let mut poller = DefaultPoller::new(8).unwrap();
        poller.register(read.as_raw_fd(), 3, Interest::READABLE, Trigger::Level).unwrap();
        drop(write);

        let mut events = Vec::new();
        assert_eq!(poller.wait(&mut events, Some(Duration::from_secs(5))).unwrap(), 1);
        assert!(events[0].readiness.contains(Readiness::HANGUP));
    }
}
