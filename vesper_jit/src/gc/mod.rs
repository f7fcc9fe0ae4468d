//! GC integration for generated code.
//!
//! These modules add the code sequences through which generated code
//! cooperates with the collector:
//!
//! - **Safepoints**: lock-free enter/exit of a full safepoint around native
//!   calls, with a shared runtime stub for the contended case
//! - **Write barriers**: an inline header-bit test before calling the
//!   barrier stub
//! - **Allocation**: bump-pointer new-space allocation with a per-class
//!   tracing check
//!
//! ```text
//!   generated ──transition_generated_to_native──▶ native
//!       ▲        (exit frame, vm tag, state,         │
//!       │         enter_full_safepoint)              │
//!       └──────transition_native_to_generated────────┘
//!                (exit_full_safepoint, state, tag)
//! ```

pub mod alloc;
pub mod safepoint;
pub mod write_barrier;

pub use write_barrier::CanBeSmi;
