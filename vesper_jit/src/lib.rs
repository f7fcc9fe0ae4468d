//! Vesper native code generation core.
//!
//! Components, leaves first:
//!
//! - [`backend::x64`]: instruction encoder, code buffer, labels, object pool
//!   and the `Assembler` with its runtime-aware macro sequences
//! - [`gc`]: safepoint transitions, write barriers and inline allocation
//! - [`locations`]: the `Location` model, `RegisterSet` and
//!   `LocationSummary` shared by the register allocator and code generator
//! - [`codegen`]: moves between allocated locations
//!
//! Generated code depends on the runtime's object and thread layout only
//! through the offset tables in [`runtime`], so the assembler can be driven
//! against any layout the embedder supplies.
//!
//! # Usage
//!
//! ```ignore
//! let mut asm = Assembler::new(AssemblerConfig::default());
//! asm.transition_generated_to_native(Gpr::Rax, Gpr::Rbx, Gpr::Rcx, true);
//! let code = asm.finalize();
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod backend;
pub mod codegen;
pub mod config;
pub mod gc;
pub mod locations;
pub mod runtime;

pub use backend::x64::{Assembler, Code, Gpr, JumpDistance, Label, Xmm};
pub use config::AssemblerConfig;
pub use gc::CanBeSmi;
pub use locations::{Location, LocationSummary, RegisterSet, Representation};
pub use runtime::RuntimeOffsets;
