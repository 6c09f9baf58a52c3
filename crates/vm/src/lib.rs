//! Stack-and-accumulator virtual machine for microc.
//!
//! Executes the word-encoded instruction stream produced by the compiler:
//! a text segment of opcodes and inline operands, a data segment of string
//! literals and global cells, and a call/return discipline built on the
//! ENT/ADJ/LEV frame opcodes. Host I/O goes through the [`Host`] trait so
//! tests can run fully in memory.

pub mod executor;
pub mod host;
pub mod memory;
pub mod opcodes;
pub mod tracer;

pub use executor::{Image, Vm, VmError};
pub use host::{CaptureHost, Host, SystemHost};
pub use memory::{Memory, POOL_SIZE, WORD_SIZE};
pub use opcodes::Opcode;
pub use tracer::{TraceStep, Tracer};
