//! Glue between allocated locations and the assembler.

pub mod moves;

pub use moves::emit_move;
