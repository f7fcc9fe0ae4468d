//! Event handler errors.

use std::io;

use thiserror::Error;
use vesper_core::RegistryError;

/// Errors surfaced to the thread that owns an [`EventHandler`](crate::EventHandler).
///
/// Failures inside the loop are never returned; they are logged, or turned
/// into a close event on the affected descriptor's port.
#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error("failed to create interrupt pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("failed to create poller: {0}")]
    Poller(#[source] io::Error),

    #[error("failed to spawn event handler thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("event handler thread could not register: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to write interrupt message: {0}")]
    Send(#[source] io::Error),

    #[error("interrupt message truncated to {written} bytes")]
    ShortWrite { written: usize },

    #[error("timers cannot target the illegal port")]
    IllegalPort,

    #[error("event handler is shut down")]
    ShutDown,

    #[error("event handler thread panicked")]
    Panicked,
}

pub type EventHandlerResult<T> = Result<T, EventHandlerError>;
