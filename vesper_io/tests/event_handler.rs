//! End-to-end tests against a running handler thread.

use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use vesper_core::ThreadRegistry;
use vesper_io::message::{CLOSE_EVENT, DESTROYED_EVENT, IN_EVENT};
use vesper_io::{
    EventHandler, EventHandlerConfig, EventHandlerError, InterruptMessage, Notification, Port,
    PortSink, fd, monotonic_millis,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Inbox {
    notes: Mutex<Vec<(Port, Notification)>>,
    arrived: Condvar,
}

impl Inbox {
    /// Block until `count` notifications are queued, then take them all.
    fn wait_for(&self, count: usize) -> Vec<(Port, Notification)> {
        let deadline = Instant::now() + WAIT;
        let mut notes = self.notes.lock();
        while notes.len() < count {
            if self.arrived.wait_until(&mut notes, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut *notes)
    }

    /// Whatever arrives within `quiet`.
    fn settle(&self, quiet: Duration) -> Vec<(Port, Notification)> {
        std::thread::sleep(quiet);
        std::mem::take(&mut *self.notes.lock())
    }
}

impl PortSink for Inbox {
    fn post_int32(&self, port: Port, value: i32) -> bool {
        self.notes.lock().push((port, Notification::Events(value as u32)));
        self.arrived.notify_all();
        true
    }

    fn post_null(&self, port: Port) -> bool {
        self.notes.lock().push((port, Notification::Timeout));
        self.arrived.notify_all();
        true
    }
}

fn start() -> (EventHandler, Arc<Inbox>) {
    let inbox = Arc::new(Inbox::default());
    let handler = EventHandler::start(EventHandlerConfig::default(), inbox.clone()).unwrap();
    (handler, inbox)
}

/// A connected pair: the peer end we keep, and a raw end the handler will
/// own and close.
fn socketpair() -> (OwnedFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(rc, 0);
    fd::set_nonblocking(fds[0]).unwrap();
    (unsafe { OwnedFd::from_raw_fd(fds[1]) }, fds[0])
}

const IN: u32 = 1 << IN_EVENT;
const DESTROYED: u32 = 1 << DESTROYED_EVENT;

#[test]
fn readable_socket_notifies_once() {
    let (handler, inbox) = start();
    let (peer, fd) = socketpair();
    let port = Port(0x51);

    handler.send(InterruptMessage::set_event_mask(fd, port, IN)).unwrap();
    fd::write_once(peer.as_raw_fd(), b"abc").unwrap();

    assert_eq!(inbox.wait_for(1), vec![(port, Notification::Events(IN))]);
    assert!(inbox.settle(Duration::from_millis(50)).is_empty());

    handler.send(InterruptMessage::close(fd, port)).unwrap();
    assert_eq!(inbox.wait_for(1), vec![(port, Notification::Events(DESTROYED))]);
    handler.shutdown().unwrap();
}

#[test]
fn pipe_reports_data_then_close() {
    let (handler, inbox) = start();
    let (read, write) = fd::pipe().unwrap();
    fd::set_nonblocking(read.as_raw_fd()).unwrap();
    let read = read.into_raw_fd();
    let port = Port(0x52);

    handler.send(InterruptMessage::set_event_mask(read, port, IN).pipe()).unwrap();
    fd::write_once(write.as_raw_fd(), b"x").unwrap();
    assert_eq!(inbox.wait_for(1), vec![(port, Notification::Events(IN))]);

    drop(write);
    let notes = inbox.wait_for(1);
    assert_eq!(notes.len(), 1);
    let (to, Notification::Events(events)) = notes[0] else {
        panic!("unexpected {notes:?}");
    };
    assert_eq!(to, port);
    assert_ne!(events & (1 << CLOSE_EVENT), 0);

    handler.send(InterruptMessage::close(read, port).pipe()).unwrap();
    assert_eq!(inbox.wait_for(1), vec![(port, Notification::Events(DESTROYED))]);
}

#[test]
fn close_without_interest_is_destroyed_once() {
    let (handler, inbox) = start();
    let (_peer, fd) = socketpair();
    let port = Port(0x53);

    handler.send(InterruptMessage::close(fd, port)).unwrap();
    assert_eq!(inbox.wait_for(1), vec![(port, Notification::Events(DESTROYED))]);
    assert!(inbox.settle(Duration::from_millis(50)).is_empty());
    handler.shutdown().unwrap();
}

#[test]
fn timer_fires_once() {
    let (handler, inbox) = start();
    let port = Port(0x54);

    handler.update_timer(port, monotonic_millis() + 20).unwrap();
    assert_eq!(inbox.wait_for(1), vec![(port, Notification::Timeout)]);
    assert!(inbox.settle(Duration::from_millis(60)).is_empty());
}

#[test]
fn timer_for_illegal_port_is_rejected() {
    let (handler, inbox) = start();
    let deadline = monotonic_millis() + 10;

    assert!(matches!(
        handler.update_timer(Port::ILLEGAL, deadline),
        Err(EventHandlerError::IllegalPort)
    ));
    assert!(matches!(
        handler.send_data(-1, Port::ILLEGAL, deadline),
        Err(EventHandlerError::IllegalPort)
    ));

    handler.update_timer(Port(0x56), deadline).unwrap();
    assert_eq!(inbox.wait_for(1), vec![(Port(0x56), Notification::Timeout)]);
    handler.shutdown().unwrap();
}

#[test]
fn cancelled_timer_is_silent() {
    let (handler, inbox) = start();
    let port = Port(0x55);

    handler.update_timer(port, monotonic_millis() + 30).unwrap();
    handler.update_timer(port, -1).unwrap();
    assert!(inbox.settle(Duration::from_millis(80)).is_empty());
}

#[test]
fn shutdown_joins_and_rejects_later_messages() {
    let registry = ThreadRegistry::new();
    let inbox = Arc::new(Inbox::default());
    let config = EventHandlerConfig {
        registry: Some(registry.clone()),
        ..Default::default()
    };
    let handler = EventHandler::start(config, inbox).unwrap();
    assert!(handler.is_running());
    assert_eq!(registry.len(), 1);

    handler.shutdown().unwrap();
    assert!(!handler.is_running());
    assert!(registry.is_empty());
    assert!(matches!(handler.update_timer(Port(1), 0), Err(EventHandlerError::ShutDown)));

    // A second shutdown is a no-op.
    handler.shutdown().unwrap();
}

#[test]
fn start_fails_once_registry_is_shut_down() {
    let registry = ThreadRegistry::new();
    registry.shutdown();
    let config = EventHandlerConfig {
        registry: Some(registry),
        ..Default::default()
    };
    let result = EventHandler::start(config, Arc::new(Inbox::default()));
    assert!(matches!(result, Err(EventHandlerError::Registry(_))));
}
