//! Interrupt messages and the event/command bit layout.
//!
//! Other threads talk to the handler thread only by writing fixed-size
//! [`InterruptMessage`] frames into the interrupt pipe. A frame is
//! `{ id, port, data }`:
//!
//! - `id >= 0` is a file descriptor and `data` is a command word.
//! - [`TIMER_ID`] sets or cancels the timer of `port`; `data` is the
//!   absolute deadline in monotonic milliseconds, negative to cancel.
//! - [`SHUTDOWN_ID`] stops the loop.
//!
//! The low bits of a command word and of every notification posted back to
//! a port share one numbering:
//!
//! ```text
//!  events              commands                 descriptor type
//!   0  IN               8  CLOSE                16  LISTENING
//!   1  OUT              9  SHUT_RD              17  PIPE
//!   2  CLOSE           10  SHUT_WR
//!   3  ERROR           11  TOKEN
//!   4  DESTROYED       12  SET_MASK
//! ```

use crate::port::Port;

// =============================================================================
// Bit Layout
// =============================================================================

pub const IN_EVENT: u32 = 0;
pub const OUT_EVENT: u32 = 1;
pub const CLOSE_EVENT: u32 = 2;
pub const ERROR_EVENT: u32 = 3;
pub const DESTROYED_EVENT: u32 = 4;

pub const CLOSE_COMMAND: u32 = 8;
pub const SHUTDOWN_READ_COMMAND: u32 = 9;
pub const SHUTDOWN_WRITE_COMMAND: u32 = 10;
pub const RETURN_TOKEN_COMMAND: u32 = 11;
pub const SET_EVENT_MASK_COMMAND: u32 = 12;

pub const LISTENING_SOCKET: u32 = 16;
pub const PIPE: u32 = 17;

/// Interest bits a set-event-mask command may carry.
pub const EVENT_MASK: u32 = (1 << CLOSE_EVENT) - 1;

/// Every response-side event bit.
pub const ALL_EVENTS: u32 = (1 << (DESTROYED_EVENT + 1)) - 1;

/// Bits of a return-token command that hold the count.
const TOKEN_COUNT_MASK: i64 = (1 << CLOSE_COMMAND) - 1;

/// Message id that updates a port's timer.
pub const TIMER_ID: isize = -1;

/// Message id that stops the handler loop.
pub const SHUTDOWN_ID: isize = -2;

/// Size of one encoded message.
pub const MESSAGE_SIZE: usize = 24;

/// POSIX guarantees pipe writes up to this size are atomic.
const POSIX_PIPE_BUF: usize = 512;

const _: () = assert!(MESSAGE_SIZE <= POSIX_PIPE_BUF);
const _: () = assert!(EVENT_MASK & (1 << CLOSE_EVENT) == 0);
const _: () = assert!(ALL_EVENTS < 1 << CLOSE_COMMAND);

#[inline]
pub const fn is_command(data: i64, command: u32) -> bool {
    data & (1 << command) != 0
}

#[inline]
pub const fn is_event(events: u32, event: u32) -> bool {
    events & (1 << event) != 0
}

#[inline]
pub const fn is_listening_socket(data: i64) -> bool {
    is_command(data, LISTENING_SOCKET)
}

#[inline]
pub const fn is_pipe(data: i64) -> bool {
    is_command(data, PIPE)
}

/// Tokens carried by a return-token command.
#[inline]
pub const fn token_count(data: i64) -> u32 {
    (data & TOKEN_COUNT_MASK) as u32
}

// =============================================================================
// InterruptMessage
// =============================================================================

/// One request to the handler thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptMessage {
    pub id: isize,
    pub port: Port,
    pub data: i64,
}

impl InterruptMessage {
    pub const fn new(id: isize, port: Port, data: i64) -> Self {
        InterruptMessage { id, port, data }
    }

    /// Set `port`'s timer to fire at `deadline_ms`; a negative deadline
    /// cancels it.
    pub const fn timer(port: Port, deadline_ms: i64) -> Self {
        InterruptMessage::new(TIMER_ID, port, deadline_ms)
    }

    pub const fn shutdown() -> Self {
        InterruptMessage::new(SHUTDOWN_ID, Port::ILLEGAL, 0)
    }

    /// Start delivering the events in `mask` for `fd` to `port`.
    pub const fn set_event_mask(fd: i32, port: Port, mask: u32) -> Self {
        InterruptMessage::new(
            fd as isize,
            port,
            (1 << SET_EVENT_MASK_COMMAND) | (mask & EVENT_MASK) as i64,
        )
    }

    /// Hand `count` notification tokens back to `fd`.
    pub const fn return_tokens(fd: i32, port: Port, count: u32) -> Self {
        InterruptMessage::new(
            fd as isize,
            port,
            (1 << RETURN_TOKEN_COMMAND) | (count as i64 & TOKEN_COUNT_MASK),
        )
    }

    /// Stop tracking `fd` for `port`, closing it once no port remains.
    pub const fn close(fd: i32, port: Port) -> Self {
        InterruptMessage::new(fd as isize, port, 1 << CLOSE_COMMAND)
    }

    pub const fn shutdown_read(fd: i32, port: Port) -> Self {
        InterruptMessage::new(fd as isize, port, 1 << SHUTDOWN_READ_COMMAND)
    }

    pub const fn shutdown_write(fd: i32, port: Port) -> Self {
        InterruptMessage::new(fd as isize, port, 1 << SHUTDOWN_WRITE_COMMAND)
    }

    /// Mark the descriptor as a listening socket.
    pub const fn listening(mut self) -> Self {
        self.data |= 1 << LISTENING_SOCKET;
        self
    }

    /// Mark the descriptor as a pipe.
    pub const fn pipe(mut self) -> Self {
        self.data |= 1 << PIPE;
        self
    }

    /// The file descriptor this message addresses, if any.
    pub fn fd(&self) -> Option<i32> {
        if self.id < 0 {
            return None;
        }
        i32::try_from(self.id).ok()
    }

    /// Native-endian frame.
    pub fn to_bytes(&self) -> [u8; MESSAGE_SIZE] {
        let mut bytes = [0u8; MESSAGE_SIZE];
        bytes[0..8].copy_from_slice(&(self.id as i64).to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.port.0.to_ne_bytes());
        bytes[16..24].copy_from_slice(&self.data.to_ne_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; MESSAGE_SIZE]) -> Self {
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&bytes[i..i + 8]);
            i64::from_ne_bytes(w)
        };
        InterruptMessage {
            id: word(0) as isize,
            port: Port(word(8)),
            data: word(16),
        }
    }
}
