//! Ports: where the handler delivers notifications.
//!
//! A port is an opaque 64-bit handle owned by the embedding runtime. The
//! handler never interprets it; it posts an event mask or a null message
//! through the [`PortSink`] the runtime supplies.

use std::fmt;

use vesper_core::{MapKey, hash_word};

/// Opaque message-port handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Port(pub i64);

impl Port {
    /// The "no port" handle.
    pub const ILLEGAL: Port = Port(0);

    #[inline]
    pub const fn is_illegal(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({:#x})", self.0)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// Timer queues index ports by value.
impl MapKey for Port {
    const NULL: Self = Port::ILLEGAL;

    #[inline]
    fn key_hash(self) -> u32 {
        hash_word(self.0 as u64)
    }
}

/// What the handler delivers to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A mask of event bits (see [`crate::message`]).
    Events(u32),
    /// The port's timer expired.
    Timeout,
}

/// Delivery into the embedding runtime.
///
/// Called only from the handler thread. A `false` return means the port is
/// gone; the handler logs it and carries on.
pub trait PortSink: Send + Sync + 'static {
    fn post_int32(&self, port: Port, value: i32) -> bool;

    fn post_null(&self, port: Port) -> bool;

    fn post(&self, port: Port, notification: Notification) -> bool {
        match notification {
            Notification::Events(mask) => self.post_int32(port, mask as i32),
            Notification::Timeout => self.post_null(port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Port, Notification)>>);

    impl PortSink for Recorder {
        fn post_int32(&self, port: Port, value: i32) -> bool {
            self.0.lock().push((port, Notification::Events(value as u32)));
            true
        }

        fn post_null(&self, port: Port) -> bool {
            self.0.lock().push((port, Notification::Timeout));
            !port.is_illegal()
        }
    }

    #[test]
    fn test_post_dispatch() {
        let sink = Recorder::default();
        assert!(sink.post(Port(5), Notification::Events(0b101)));
        assert!(!sink.post(Port::ILLEGAL, Notification::Timeout));
        assert_eq!(
            *sink.0.lock(),
            vec![
                (Port(5), Notification::Events(0b101)),
                (Port::ILLEGAL, Notification::Timeout)
            ]
        );
    }

    #[test]
    fn test_port_formatting() {
        assert_eq!(format!("{:?}", Port(255)), "Port(0xff)");
        assert_eq!(Port(16).to_string(), "0x10");
        assert!(Port::default().is_illegal());
    }
}
