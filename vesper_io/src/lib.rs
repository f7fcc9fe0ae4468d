//! Readiness event handler for the Vesper VM.
//!
//! A single background thread multiplexes every socket and pipe the runtime
//! owns, together with per-port timers, and posts small integer messages to
//! runtime ports when something happens. Other threads talk to it only by
//! writing fixed-size [`InterruptMessage`]s into a pipe, through
//! [`EventHandler`].
//!
//! # Flow control
//!
//! Each port holds a number of tokens per descriptor. Every `IN` or `OUT`
//! notification costs one; when a port runs out, the descriptor is taken
//! out of the poller until the runtime returns tokens. Close, error and
//! destroyed notifications are free.
//!
//! # Platforms
//!
//! Linux and Android use epoll; the BSDs and Apple platforms use kqueue.
//! Both sit behind the [`Poller`] trait.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

#[cfg(not(unix))]
compile_error!("vesper_io supports only unix targets");

pub mod config;
pub mod descriptor;
pub mod error;
pub mod event_handler;
pub mod fd;
pub mod message;
pub mod poller;
pub mod port;
pub mod timeout;

pub use config::{EVENT_HANDLER_FLAGS, EventHandlerConfig};
pub use descriptor::{DescriptorInfo, DescriptorKind, DescriptorTable};
pub use error::{EventHandlerError, EventHandlerResult};
pub use event_handler::{EventHandler, EventHandlerImplementation};
pub use fd::monotonic_millis;
pub use message::InterruptMessage;
pub use poller::{DefaultPoller, Interest, PollEvent, Poller, Readiness, Trigger};
pub use port::{Notification, Port, PortSink};
pub use timeout::TimeoutQueue;
