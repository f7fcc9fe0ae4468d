//! x64 backend modules.
//!
//! - `registers`: registers, register sets and memory operands
//! - `encoder`: REX/ModR/M/SIB encoding and condition codes
//! - `buffer`, `label`: the growable code buffer and branch fixups
//! - `assembler`, `instructions`, `macros`: instruction emission, from raw
//!   encodings up to runtime-aware sequences
//! - `object_pool`: per-function constant pool

pub mod assembler;
pub mod buffer;
pub mod encoder;
pub mod instructions;
pub mod label;
pub mod macros;
pub mod object_pool;
pub mod registers;

pub use assembler::{Assembler, Code, CodeComment, OperandSize};
pub use buffer::CodeBuffer;
pub use encoder::{Condition, Immediate};
pub use label::{JumpDistance, Label};
pub use object_pool::{ObjectPool, ObjectPoolBuilder, Patchability, PoolEntry};
pub use registers::{Address, Gpr, GprSet, Scale, Xmm, XmmSet};
