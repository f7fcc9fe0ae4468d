//! Registry of runtime-owned OS threads.
//!
//! One `ThreadRegistry` is created at startup and shared by `Arc`. Threads
//! that the runtime spawns (the I/O event handler, compiler workers) hold a
//! [`ThreadRegistration`] for their lifetime; dropping it removes the entry.
//! `shutdown` closes the registry to new threads so teardown can wait for
//! the remaining ones without racing late arrivals.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

/// Errors returned by the thread registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("thread registry is shut down")]
    ShutDown,
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// A registered thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: u64,
    pub name: String,
    pub os_thread: ThreadId,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    threads: Vec<ThreadRecord>,
    shut_down: bool,
}

/// Process-wide list of runtime threads.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    state: Mutex<RegistryState>,
    emptied: Condvar,
}

impl ThreadRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(ThreadRegistry::default())
    }

    /// Register the calling thread under `name`.
    pub fn register(
        self: &Arc<Self>,
        name: impl Into<String>,
    ) -> RegistryResult<ThreadRegistration> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(RegistryError::ShutDown);
        }
        state.next_id += 1;
        let record = ThreadRecord {
            id: state.next_id,
            name: name.into(),
            os_thread: thread::current().id(),
        };
        debug!(id = record.id, name = %record.name, "thread registered");
        let id = record.id;
        state.threads.push(record);
        Ok(ThreadRegistration {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Copy of the current thread list.
    pub fn snapshot(&self) -> Vec<ThreadRecord> {
        self.state.lock().threads.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Refuse new registrations and return how many threads are still live.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.threads.len()
    }

    /// Block until every registered thread has dropped its registration.
    pub fn wait_until_empty(&self) {
        let mut state = self.state.lock();
        while !state.threads.is_empty() {
            self.emptied.wait(&mut state);
        }
    }

    fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(pos) = state.threads.iter().position(|t| t.id == id) {
            let record = state.threads.swap_remove(pos);
            debug!(id, name = %record.name, "thread unregistered");
        }
        if state.threads.is_empty() {
            self.emptied.notify_all();
        }
    }
}

/// Keeps a thread registered until dropped.
#[derive(Debug)]
pub struct ThreadRegistration {
    registry: Arc<ThreadRegistry>,
    id: u64,
}

impl ThreadRegistration {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ThreadRegistration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
