//! File descriptor helpers over `libc`.

use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Turn a `-1` return into the current OS error.
#[inline]
pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on an arbitrary descriptor either succeeds or reports
    // EBADF; it touches no memory.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    Ok(())
}

pub fn set_close_on_exec(fd: RawFd) -> io::Result<()> {
    // SAFETY: as above.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    Ok(())
}

/// A close-on-exec pipe as `(read, write)`.
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` has room for the two descriptors pipe() writes.
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    // SAFETY: pipe() succeeded, so both descriptors are open and unowned.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_close_on_exec(fds[0])?;
    set_close_on_exec(fds[1])?;
    Ok((read, write))
}

/// Bytes that can be read from `fd` without blocking.
pub fn available_bytes(fd: RawFd) -> io::Result<usize> {
    let mut available: libc::c_int = 0;
    // SAFETY: FIONREAD writes one c_int through the pointer.
    cvt(unsafe { libc::ioctl(fd, libc::FIONREAD, &mut available) })?;
    Ok(available.max(0) as usize)
}

/// What a non-consuming read found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// At least one byte is buffered.
    Data,
    /// The peer closed its end.
    Eof,
    /// Nothing to read yet.
    Empty,
    /// The descriptor is in an error state.
    Failed(i32),
}

/// Look at the head of a socket without consuming it. Descriptors that are
/// not sockets fall back to `FIONREAD`, where readable-but-empty means EOF.
pub fn peek(fd: RawFd) -> ReadState {
    let mut byte = 0u8;
    // SAFETY: one writable byte for a one-byte peek.
    let n = unsafe {
        libc::recv(
            fd,
            (&mut byte as *mut u8).cast(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    match n {
        0 => ReadState::Eof,
        n if n > 0 => ReadState::Data,
        _ => match io::Error::last_os_error().raw_os_error() {
            Some(libc::ENOTSOCK) => peek_stream(fd),
            Some(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK || e == libc::EINTR => {
                ReadState::Empty
            }
            Some(e) => ReadState::Failed(e),
            None => ReadState::Empty,
        },
    }
}

/// Readiness check for pipes and other non-socket streams.
pub fn peek_stream(fd: RawFd) -> ReadState {
    match available_bytes(fd) {
        Ok(0) => ReadState::Eof,
        Ok(_) => ReadState::Data,
        Err(e) => ReadState::Failed(e.raw_os_error().unwrap_or(libc::EIO)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
}

pub fn shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
    };
    // SAFETY: no memory is passed.
    cvt(unsafe { libc::shutdown(fd, how) })?;
    Ok(())
}

/// Close a descriptor the caller owns as a raw integer.
pub fn close(fd: RawFd) -> io::Result<()> {
    // SAFETY: the caller gives up `fd`; no memory is passed.
    cvt(unsafe { libc::close(fd) })?;
    Ok(())
}

/// Write all of `buf` with one `write` call, retrying on `EINTR`. Returns
/// the byte count the kernel accepted.
pub fn write_once(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `buf` is valid for `buf.len()` bytes.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Read into `buf`, retrying on `EINTR`. `Ok(None)` means the read would
/// block.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n >= 0 {
            return Ok(Some(n as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(None),
            _ => return Err(err),
        }
    }
}

/// Milliseconds on the monotonic clock. Timer deadlines use this scale.
pub fn monotonic_millis() -> i64 {
    // SAFETY: an all-zero timespec is valid and clock_gettime only writes it.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
        return 0;
    }
    ts.tv_sec as i64 * 1000 + ts.tv_nsec as i64 / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn socketpair() -> (OwnedFd, OwnedFd) {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn test_pipe_round_trip() {
        let (read, write) = pipe().unwrap();
        set_nonblocking(read.as_raw_fd()).unwrap();
        assert_eq!(read_nonblocking(read.as_raw_fd(), &mut [0u8; 4]).unwrap(), None);

        assert_eq!(write_once(write.as_raw_fd(), b"abc").unwrap(), 3);
        assert_eq!(available_bytes(read.as_raw_fd()).unwrap(), 3);
        assert_eq!(peek(read.as_raw_fd()), ReadState::Data);

        let mut buf = [0u8; 8];
        assert_eq!(read_nonblocking(read.as_raw_fd(), &mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], b"abc");

        drop(write);
        assert_eq!(peek(read.as_raw_fd()), ReadState::Eof);
    }

    #[test]
    fn test_socket_peek() {
        let (a, b) = socketpair();
        assert_eq!(peek(a.as_raw_fd()), ReadState::Empty);
        write_once(b.as_raw_fd(), b"x").unwrap();
        assert_eq!(peek(a.as_raw_fd()), ReadState::Data);
        // Peeking does not consume.
        assert_eq!(available_bytes(a.as_raw_fd()).unwrap(), 1);

        let (c, d) = socketpair();
        shutdown(d.as_raw_fd(), Shutdown::Write).unwrap();
        assert_eq!(peek(c.as_raw_fd()), ReadState::Eof);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(monotonic_millis() >= a + 5);
    }
}
