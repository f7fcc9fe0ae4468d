//! Code generation backends.
//!
//! Only x64 is implemented; its register conventions match the runtime's
//! thread and pool layout in [`crate::runtime`].

pub mod x64;
