//! The event handler thread.
//!
//! [`EventHandlerImplementation`] owns the poller, the descriptor table,
//! the timer queue and the read end of the interrupt pipe. Only its thread
//! touches them. [`EventHandler`] is the handle other threads hold: it owns
//! the write end of the pipe and the join handle.
//!
//! One wakeup runs in a fixed order:
//!
//! 1. Block in the poller until the soonest timer is due.
//! 2. Post a null message to every port whose timer expired.
//! 3. Translate and post each descriptor's readiness.
//! 4. Apply the commands waiting in the interrupt pipe.
//!
//! Commands go last so a close never overtakes data readiness that was
//! already reported for the same descriptor.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::config::EventHandlerConfig;
use crate::descriptor::{DescriptorInfo, DescriptorKind, DescriptorTable};
use crate::error::{EventHandlerError, EventHandlerResult};
use crate::fd::{self, ReadState, Shutdown};
use crate::message::{
    CLOSE_COMMAND, CLOSE_EVENT, DESTROYED_EVENT, ERROR_EVENT, EVENT_MASK, IN_EVENT,
    InterruptMessage, MESSAGE_SIZE, OUT_EVENT, RETURN_TOKEN_COMMAND, SET_EVENT_MASK_COMMAND,
    SHUTDOWN_ID, SHUTDOWN_READ_COMMAND, SHUTDOWN_WRITE_COMMAND, TIMER_ID, is_command,
    is_listening_socket, is_pipe, token_count,
};
use crate::poller::{DefaultPoller, Interest, PollEvent, Poller, Readiness, Trigger};
use crate::port::{Notification, Port, PortSink};
use crate::timeout::TimeoutQueue;

/// Poller token of the interrupt pipe; descriptor tokens are their fd.
const INTERRUPT_TOKEN: u64 = u64::MAX;

/// Frames read from the interrupt pipe per `read` call.
const MESSAGES_PER_READ: usize = 16;

// =============================================================================
// EventHandlerImplementation
// =============================================================================

/// The loop state. Runs on exactly one thread.
pub struct EventHandlerImplementation<P: Poller = DefaultPoller> {
    poller: P,
    descriptors: DescriptorTable,
    timeouts: TimeoutQueue,
    interrupt: OwnedFd,
    sink: Arc<dyn PortSink>,
    token_count: u32,
    events: Vec<PollEvent>,
    partial: Vec<u8>,
    shutdown: bool,
}

impl<P: Poller> EventHandlerImplementation<P> {
    /// Create the poller and watch `interrupt`, the read end of the
    /// interrupt pipe.
    pub fn new(
        config: &EventHandlerConfig,
        interrupt: OwnedFd,
        sink: Arc<dyn PortSink>,
    ) -> EventHandlerResult<Self> {
        fd::set_nonblocking(interrupt.as_raw_fd()).map_err(EventHandlerError::Pipe)?;
        let mut poller = P::new(config.max_events).map_err(EventHandlerError::Poller)?;
        poller
            .register(interrupt.as_raw_fd(), INTERRUPT_TOKEN, Interest::READABLE, Trigger::Level)
            .map_err(EventHandlerError::Poller)?;
        Ok(EventHandlerImplementation {
            poller,
            descriptors: DescriptorTable::new(),
            timeouts: TimeoutQueue::new(),
            interrupt,
            sink,
            token_count: config.token_count,
            events: Vec::with_capacity(config.max_events),
            partial: Vec::new(),
            shutdown: false,
        })
    }

    /// Loop until a shutdown message arrives.
    pub fn run(&mut self) {
        debug!("event handler running");
        while !self.shutdown {
            self.poll_once();
        }
        debug!(descriptors = self.descriptors.len(), "event handler stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    pub fn timeouts(&self) -> &TimeoutQueue {
        &self.timeouts
    }

    /// One wakeup.
    pub fn poll_once(&mut self) {
        self.poll_with_timeout(None);
    }

    /// One wakeup that waits at most `timeout`, or until the next timer if
    /// that is sooner.
    pub fn poll_with_timeout(&mut self, timeout: Option<Duration>) {
        let next_timer = self
            .timeouts
            .millis_until_next(fd::monotonic_millis())
            .map(|ms| Duration::from_millis(ms as u64));
        let timeout = match (timeout, next_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut events = std::mem::take(&mut self.events);
        match self.poller.wait(&mut events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => warn!(error = %e, "poller wait failed"),
        }

        self.handle_timeouts();

        let mut interrupted = false;
        for event in &events {
            if event.token == INTERRUPT_TOKEN {
                interrupted = true;
            } else {
                self.handle_descriptor_event(*event);
            }
        }
        self.events = events;

        if interrupted {
            self.drain_interrupts();
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn handle_timeouts(&mut self) {
        for port in self.timeouts.take_expired(fd::monotonic_millis()) {
            post(&*self.sink, port, Notification::Timeout);
        }
    }

    // =========================================================================
    // Descriptor Events
    // =========================================================================

    fn handle_descriptor_event(&mut self, event: PollEvent) {
        let Ok(fd) = RawFd::try_from(event.token) else {
            warn!(token = event.token, "readiness for an unknown token");
            return;
        };
        let Some(info) = self.descriptors.get_mut(fd) else {
            trace!(fd, "readiness for a closed descriptor");
            return;
        };

        let old_mask = info.mask();
        let events = translate_events(info, event.readiness);
        if events == 0 {
            return;
        }

        if events & (1 << ERROR_EVENT) != 0 {
            let ports = info.notify_all_ports(events);
            update_poller(&mut self.poller, &*self.sink, info, old_mask);
            for port in ports {
                post(&*self.sink, port, Notification::Events(events));
            }
        } else if let Some(port) = info.next_notify_port(events) {
            update_poller(&mut self.poller, &*self.sink, info, old_mask);
            post(&*self.sink, port, Notification::Events(events));
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn drain_interrupts(&mut self) {
        let mut buffer = [0u8; MESSAGE_SIZE * MESSAGES_PER_READ];
        loop {
            match fd::read_nonblocking(self.interrupt.as_raw_fd(), &mut buffer) {
                Ok(Some(0)) => {
                    warn!("interrupt pipe closed without a shutdown message");
                    self.shutdown = true;
                    return;
                }
                Ok(Some(n)) => {
                    self.partial.extend_from_slice(&buffer[..n]);
                    self.handle_pending_messages();
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "failed to read interrupt pipe");
                    return;
                }
            }
        }
    }

    fn handle_pending_messages(&mut self) {
        let complete = self.partial.len() - self.partial.len() % MESSAGE_SIZE;
        let messages: Vec<InterruptMessage> = self.partial[..complete]
            .chunks_exact(MESSAGE_SIZE)
            .filter_map(|chunk| <&[u8; MESSAGE_SIZE]>::try_from(chunk).ok())
            .map(InterruptMessage::from_bytes)
            .collect();
        self.partial.drain(..complete);
        for message in messages {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: InterruptMessage) {
        trace!(id = message.id, port = %message.port, data = message.data, "interrupt message");
        match message.id {
            TIMER_ID if message.port.is_illegal() => {
                warn!(deadline = message.data, "dropping timer for the illegal port");
            }
            TIMER_ID => self.timeouts.update_timeout(message.port, message.data),
            SHUTDOWN_ID => self.shutdown = true,
            id => match message.fd() {
                Some(fd) => self.handle_command(fd, message.port, message.data),
                None => warn!(id, "unknown control message"),
            },
        }
    }

    fn handle_command(&mut self, fd: RawFd, port: Port, data: i64) {
        let kind = if is_listening_socket(data) {
            DescriptorKind::ListeningSocket
        } else if is_pipe(data) {
            DescriptorKind::Pipe
        } else {
            DescriptorKind::Stream
        };
        let info = self.descriptors.get_or_insert(fd, kind, self.token_count);
        let old_mask = info.mask();

        if is_command(data, SHUTDOWN_READ_COMMAND) {
            if let Err(e) = fd::shutdown(fd, Shutdown::Read) {
                warn!(fd, error = %e, "shutdown(SHUT_RD) failed");
            }
        } else if is_command(data, SHUTDOWN_WRITE_COMMAND) {
            if let Err(e) = fd::shutdown(fd, Shutdown::Write) {
                warn!(fd, error = %e, "shutdown(SHUT_WR) failed");
            }
        } else if is_command(data, CLOSE_COMMAND) {
            if !port.is_illegal() {
                info.remove_port(port);
            }
            update_poller(&mut self.poller, &*self.sink, info, old_mask);
            // A listening socket shared with other ports stays open.
            let close = !info.is_listening_socket() || !info.has_listeners();
            if close {
                if let Some(info) = self.descriptors.remove(fd) {
                    if info.is_tracked() {
                        if let Err(e) = self.poller.unregister(fd) {
                            warn!(fd, error = %e, "failed to unregister closed descriptor");
                        }
                    }
                }
                if let Err(e) = fd::close(fd) {
                    warn!(fd, error = %e, "close failed");
                }
                debug!(fd, "descriptor closed");
            }
            if !port.is_illegal() {
                post(&*self.sink, port, Notification::Events(1 << DESTROYED_EVENT));
            }
        } else if is_command(data, RETURN_TOKEN_COMMAND) {
            info.return_tokens(port, token_count(data));
            update_poller(&mut self.poller, &*self.sink, info, old_mask);
        } else if is_command(data, SET_EVENT_MASK_COMMAND) {
            info.set_port_and_mask(port, data as u32 & EVENT_MASK);
            update_poller(&mut self.poller, &*self.sink, info, old_mask);
        } else {
            warn!(fd, data, "unknown descriptor command");
        }
    }
}

impl<P: Poller> Drop for EventHandlerImplementation<P> {
    fn drop(&mut self) {
        // Descriptors belong to the runtime until it sends a close.
        self.descriptors
            .clear_with(|info| trace!(fd = info.fd(), "descriptor still tracked at exit"));
    }
}

/// Event bits for `readiness` on `info`.
///
/// Listening sockets report incoming connections as `IN`. Stream
/// descriptors peek, because some platforms signal readability with no data
/// and no hangup; an empty peek there is EOF only when the peer closed.
fn translate_events(info: &DescriptorInfo, readiness: Readiness) -> u32 {
    if info.is_listening_socket() {
        return if readiness.contains(Readiness::READABLE) {
            if readiness.contains(Readiness::HANGUP) {
                1 << CLOSE_EVENT
            } else if readiness.contains(Readiness::ERROR) {
                1 << ERROR_EVENT
            } else {
                1 << IN_EVENT
            }
        } else if readiness.contains(Readiness::ERROR) {
            1 << ERROR_EVENT
        } else if readiness.contains(Readiness::HANGUP) {
            1 << CLOSE_EVENT
        } else {
            0
        };
    }

    if readiness.contains(Readiness::ERROR) {
        return 1 << ERROR_EVENT;
    }
    let mut events = 0;
    if readiness.contains(Readiness::READABLE) {
        let state = match info.kind() {
            DescriptorKind::Pipe => fd::peek_stream(info.fd()),
            _ => fd::peek(info.fd()),
        };
        match state {
            ReadState::Data => events |= 1 << IN_EVENT,
            ReadState::Eof => events |= 1 << CLOSE_EVENT,
            ReadState::Empty => {}
            ReadState::Failed(_) => return 1 << ERROR_EVENT,
        }
    }
    if readiness.contains(Readiness::HANGUP) {
        events |= 1 << CLOSE_EVENT;
    }
    if readiness.contains(Readiness::WRITABLE) {
        events |= 1 << OUT_EVENT;
    }
    events
}

/// Bring the poller in line with `info.mask()` after it moved from
/// `old_mask`. A descriptor the poller refuses is reported closed to its
/// ports.
fn update_poller<P: Poller>(
    poller: &mut P,
    sink: &dyn PortSink,
    info: &mut DescriptorInfo,
    old_mask: u32,
) {
    let new_mask = info.mask();
    let fd = info.fd();
    let token = fd as u64;
    let interest = Interest::from_event_mask(new_mask);
    // Listening sockets stay level-triggered so queued connections keep
    // being offered to the next reader.
    let trigger = if info.is_listening_socket() {
        Trigger::Level
    } else {
        Trigger::Edge
    };

    match (info.is_tracked(), new_mask != 0) {
        (false, true) => match poller.register(fd, token, interest, trigger) {
            Ok(()) => info.set_tracked(true),
            Err(e) => {
                warn!(fd, error = %e, "poller rejected descriptor");
                for port in info.notify_all_ports(1 << CLOSE_EVENT) {
                    post(sink, port, Notification::Events(1 << CLOSE_EVENT));
                }
            }
        },
        (true, false) => {
            if let Err(e) = poller.unregister(fd) {
                warn!(fd, error = %e, "failed to unregister descriptor");
            }
            info.set_tracked(false);
        }
        (true, true) if new_mask != old_mask => {
            if let Err(e) = poller.modify(fd, token, interest, trigger) {
                warn!(fd, error = %e, "failed to update descriptor interest");
            }
        }
        _ => {}
    }
}

fn post(sink: &dyn PortSink, port: Port, notification: Notification) {
    debug!(port = %port, ?notification, "notify");
    if !sink.post(port, notification) {
        error!(port = %port, ?notification, "failed to post notification");
    }
}

// =============================================================================
// EventHandler
// =============================================================================

/// Handle to a running event handler thread.
///
/// Every method may be called from any thread.
pub struct EventHandler {
    interrupt: OwnedFd,
    thread: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl EventHandler {
    /// Start a handler on the platform's default poller.
    pub fn start(config: EventHandlerConfig, sink: Arc<dyn PortSink>) -> EventHandlerResult<Self> {
        Self::start_with::<DefaultPoller>(config, sink)
    }

    /// Start a handler on poller `P`.
    pub fn start_with<P: Poller>(
        config: EventHandlerConfig,
        sink: Arc<dyn PortSink>,
    ) -> EventHandlerResult<Self> {
        let (read, write) = fd::pipe().map_err(EventHandlerError::Pipe)?;
        let mut implementation = EventHandlerImplementation::<P>::new(&config, read, sink)?;

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let registry = config.registry.clone();
        let name = config.thread_name.clone();
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let registration = match registry.as_ref().map(|r| r.register(name)).transpose() {
                    Ok(registration) => registration,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                implementation.run();
                drop(registration);
            })
            .map_err(EventHandlerError::Spawn)?;

        let started = match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EventHandlerError::Registry(e)),
            Err(_) => Err(EventHandlerError::Panicked),
        };
        if let Err(e) = started {
            let _ = thread.join();
            return Err(e);
        }

        debug!(thread = %config.thread_name, "event handler started");
        Ok(EventHandler {
            interrupt: write,
            thread: Mutex::new(Some(thread)),
            running: AtomicBool::new(true),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue a request for the handler thread: a descriptor command when
    /// `id` is a file descriptor, otherwise a control message.
    pub fn send_data(&self, id: isize, port: Port, data: i64) -> EventHandlerResult<()> {
        self.send(InterruptMessage::new(id, port, data))
    }

    /// Queue an encoded message.
    pub fn send(&self, message: InterruptMessage) -> EventHandlerResult<()> {
        if !self.is_running() {
            return Err(EventHandlerError::ShutDown);
        }
        if message.id == TIMER_ID && message.port.is_illegal() {
            return Err(EventHandlerError::IllegalPort);
        }
        let written = fd::write_once(self.interrupt.as_raw_fd(), &message.to_bytes())
            .map_err(EventHandlerError::Send)?;
        if written != MESSAGE_SIZE {
            return Err(EventHandlerError::ShortWrite { written });
        }
        Ok(())
    }

    /// Fire a null message at `port` once the monotonic clock reaches
    /// `deadline_ms`; a negative deadline cancels the timer. Timers need a
    /// real port.
    pub fn update_timer(&self, port: Port, deadline_ms: i64) -> EventHandlerResult<()> {
        self.send(InterruptMessage::timer(port, deadline_ms))
    }

    /// Stop the loop and wait for its thread. Later calls do nothing.
    pub fn shutdown(&self) -> EventHandlerResult<()> {
        let Some(thread) = self.thread.lock().take() else {
            return Ok(());
        };
        let sent = self.send(InterruptMessage::shutdown());
        self.running.store(false, Ordering::Release);
        sent?;
        thread.join().map_err(|_| EventHandlerError::Panicked)?;
        debug!("event handler shut down");
        Ok(())
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "event handler did not shut down cleanly");
        }
    }
}
