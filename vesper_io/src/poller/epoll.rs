//! epoll backend.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use super::{Interest, PollEvent, Poller, Readiness, Trigger, timeout_millis};
use crate::fd::cvt;

pub struct EpollPoller {
    epoll: OwnedFd,
    buffer: Vec<libc::epoll_event>,
}

impl EpollPoller {
    fn ctl(
        &self,
        op: libc::c_int,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: Trigger,
    ) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: event_bits(interest, trigger),
            u64: token,
        };
        // SAFETY: `event` outlives the call; the kernel only reads it.
        cvt(unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) })?;
        Ok(())
    }
}

fn event_bits(interest: Interest, trigger: Trigger) -> u32 {
    let mut bits = libc::EPOLLRDHUP as u32;
    if interest.contains(Interest::READABLE) {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.contains(Interest::WRITABLE) {
        bits |= libc::EPOLLOUT as u32;
    }
    if trigger == Trigger::Edge {
        bits |= libc::EPOLLET as u32;
    }
    bits
}

fn readiness(bits: u32) -> Readiness {
    let mut readiness = Readiness::empty();
    if bits & libc::EPOLLIN as u32 != 0 {
        readiness |= Readiness::READABLE;
    }
    if bits & libc::EPOLLOUT as u32 != 0 {
        readiness |= Readiness::WRITABLE;
    }
    if bits & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0 {
        readiness |= Readiness::HANGUP;
    }
    if bits & libc::EPOLLERR as u32 != 0 {
        readiness |= Readiness::ERROR;
    }
    readiness
}

impl Poller for EpollPoller {
    fn new(max_events: usize) -> io::Result<Self> {
        // SAFETY: no memory is passed.
        let raw = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        // SAFETY: epoll_create1 returned a fresh descriptor we now own.
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(EpollPoller {
            epoll,
            buffer: vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }

    fn register(
        &mut self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: Trigger,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest, trigger)
    }

    fn modify(
        &mut self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: Trigger,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest, trigger)
    }

    fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        // Kernels before 2.6.9 require a non-null event even for DEL.
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, Interest::empty(), Trigger::Level)
    }

    fn wait(
        &mut self,
        events: &mut Vec<PollEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        events.clear();
        // SAFETY: the buffer holds `len` initialized events and the kernel
        // writes at most that many.
        let n = cvt(unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                self.buffer.as_mut_ptr(),
                self.buffer.len() as libc::c_int,
                timeout_millis(timeout),
            )
        })?;
        for event in &self.buffer[..n as usize] {
            let (bits, token) = (event.events, event.u64);
            events.push(PollEvent {
                token,
                readiness: readiness(bits),
            });
        }
        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bits() {
        let rdhup = libc::EPOLLRDHUP as u32;
        assert_eq!(event_bits(Interest::empty(), Trigger::Level), rdhup);
        assert_eq!(
            event_bits(Interest::READABLE, Trigger::Edge),
            rdhup | libc::EPOLLIN as u32 | libc::EPOLLET as u32
        );
        assert_eq!(
            event_bits(Interest::READABLE | Interest::WRITABLE, Trigger::Level),
            rdhup | libc::EPOLLIN as u32 | libc::EPOLLOUT as u32
        );
    }

    #[test]
    fn test_readiness_translation() {
        assert_eq!(readiness(libc::EPOLLIN as u32), Readiness::READABLE);
        assert_eq!(
            readiness((libc::EPOLLIN | libc::EPOLLRDHUP) as u32),
            Readiness::READABLE | Readiness::HANGUP
        );
        assert_eq!(
            readiness((libc::EPOLLERR | libc::EPOLLHUP) as u32),
            Readiness::ERROR | Readiness::HANGUP
        );
    }
}
