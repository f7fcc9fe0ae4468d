//! kqueue backend.
//!
//! Read and write interest are separate kernel filters, so one descriptor
//! can produce two reports per wait. The token rides in `udata`.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use super::{Interest, PollEvent, Poller, Readiness, Trigger};
use crate::fd::{cvt, set_close_on_exec};

pub struct KqueuePoller {
    kq: OwnedFd,
    buffer: Vec<libc::kevent>,
}

// SAFETY: `udata` in the buffered events carries a token, never a pointer
// that is dereferenced.
unsafe impl Send for KqueuePoller {}

fn change(fd: RawFd, filter: i16, flags: u16, token: u64) -> libc::kevent {
    // SAFETY: kevent is plain data; all-zero is a valid value.
    let mut event: libc::kevent = unsafe { std::mem::zeroed() };
    event.ident = fd as _;
    event.filter = filter as _;
    event.flags = flags as _;
    event.udata = token as usize as _;
    event
}

impl KqueuePoller {
    fn apply(&self, change: &libc::kevent) -> io::Result<()> {
        // SAFETY: one change in, no events out.
        cvt(unsafe {
            libc::kevent(self.kq.as_raw_fd(), change, 1, ptr::null_mut(), 0, ptr::null())
        })?;
        Ok(())
    }

    /// Delete a filter, ignoring filters that were never added.
    fn delete(&self, fd: RawFd, filter: i16) -> io::Result<()> {
        match self.apply(&change(fd, filter, libc::EV_DELETE as u16, 0)) {
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            other => other,
        }
    }

    fn set(&self, fd: RawFd, token: u64, interest: Interest, trigger: Trigger) -> io::Result<()> {
        let mut add = (libc::EV_ADD | libc::EV_ENABLE) as u16;
        if trigger == Trigger::Edge {
            add |= libc::EV_CLEAR as u16;
        }
        for (wanted, filter) in [
            (Interest::READABLE, libc::EVFILT_READ as i16),
            (Interest::WRITABLE, libc::EVFILT_WRITE as i16),
        ] {
            if interest.contains(wanted) {
                self.apply(&change(fd, filter, add, token))?;
            } else {
                self.delete(fd, filter)?;
            }
        }
        Ok(())
    }
}

fn readiness(event: &libc::kevent) -> Readiness {
    let mut readiness = Readiness::empty();
    let flags = event.flags as u16;
    if flags & libc::EV_ERROR as u16 != 0 {
        return Readiness::ERROR;
    }
    if event.filter as i16 == libc::EVFILT_READ as i16 {
        readiness |= Readiness::READABLE;
    } else if event.filter as i16 == libc::EVFILT_WRITE as i16 {
        readiness |= Readiness::WRITABLE;
    }
    if flags & libc::EV_EOF as u16 != 0 {
        readiness |= Readiness::HANGUP;
        // On EOF, fflags holds the socket error, if any.
        if event.fflags != 0 {
            readiness |= Readiness::ERROR;
        }
    }
    readiness
}

impl Poller for KqueuePoller {
    fn new(max_events: usize) -> io::Result<Self> {
        // SAFETY: no memory is passed.
        let raw = cvt(unsafe { libc::kqueue() })?;
        // SAFETY: kqueue returned a fresh descriptor we now own.
        let kq = unsafe { OwnedFd::from_raw_fd(raw) };
        set_close_on_exec(raw)?;
        // SAFETY: as in `change`.
        let empty: libc::kevent = unsafe { std::mem::zeroed() };
        Ok(KqueuePoller {
            kq,
            buffer: vec![empty; max_events.max(1)],
        })
    }

    fn register(
        &mut self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: Trigger,
    ) -> io::Result<()> {
        self.set(fd, token, interest, trigger)
    }

    fn modify(
        &mut self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        trigger: Trigger,
    ) -> io::Result<()> {
        self.set(fd, token, interest, trigger)
    }

    fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.delete(fd, libc::EVFILT_READ as i16)?;
        self.delete(fd, libc::EVFILT_WRITE as i16)
    }

    fn wait(
        &mut self,
        events: &mut Vec<PollEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        events.clear();
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as _,
        });
        let ts_ptr = ts.as_ref().map_or(ptr::null(), |t| t as *const libc::timespec);
        // SAFETY: the buffer holds `len` initialized events and the kernel
        // writes at most that many.
        let n = cvt(unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                ptr::null(),
                0,
                self.buffer.as_mut_ptr(),
                self.buffer.len() as libc::c_int,
                ts_ptr,
            )
        })?;
        for event in &self.buffer[..n as usize] {
            events.push(PollEvent {
                token: event.udata as usize as u64,
                readiness: readiness(event),
            });
        }
        Ok(events.len())
    }
}
