//! Vesper core runtime support.
//!
//! Foundational pieces shared by the code generator and the I/O event
//! handler:
//!
//! - [`SimpleHashMap`]: open-addressing table with linear probing and
//!   backward-shift deletion, keyed by caller-hashed words.
//! - [`PriorityQueue`]: binary min-heap with a side index from value to
//!   heap slot, supporting removal and re-prioritization by value.
//! - [`flags`]: the enumerated runtime flag schema.
//! - [`ThreadRegistry`]: process-wide registry of runtime-owned threads.
//!
//! None of these types are internally synchronized except the registry;
//! each is owned by exactly one thread at a time.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod flags;
pub mod hash_map;
pub mod priority_queue;
pub mod thread_registry;

pub use flags::{FlagError, FlagKind, FlagSpec, FlagValue, Flags};
pub use hash_map::{Entry, MapKey, SimpleHashMap, hash_word};
pub use priority_queue::{PriorityQueue, QueueEntry};
pub use thread_registry::{RegistryError, RegistryResult, ThreadRegistration, ThreadRegistry};
