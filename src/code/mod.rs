//! Bytecode representation, parsing, and generation
//!
//! ### Structure
//!
//! Despite being pushed off into [just another method attribute](crate::class_file::Code), the
//! bytecode is the most important part of a class file. Method bodies are a CFG of basic blocks
//! operating on a stack and an array of locals. The [list of bytecode instructions][0] is split
//! in two groups:
//!
//!   - [`Instruction`] for straight-line instructions (the body of basic blocks)
//!   - [`BranchInstruction`] for instructions that end a basic block
//!
//! Outside of this module, code is a flat stream of [`CodeElement`]s: the instructions along with
//! [`Label`]s and pseudo-elements such as exception handlers and line numbers. [`parse_code`]
//! turns a `Code` attribute into such a stream, and [`assemble_code`] turns a stream back into a
//! `Code` attribute, inferring the stack map frames and resolving label offsets on the way.
//!
//! ### Code generation
//!
//! [`CodeBuilder`] is the convenient way to produce element streams: it hands out labels, checks
//! instruction operands as they are added, and has structured helpers (blocks, conditionals,
//! loops, `try`/`catch`, switches) that take care of the labels they need.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod assembler;
mod basic_block;
mod code_builder;
pub mod decode;
mod element;
mod instructions;
pub mod jump_encoding;
mod label;
mod parse;

pub use assembler::*;
pub use basic_block::*;
pub use code_builder::*;
pub use element::*;
pub use instructions::*;
pub use label::*;
pub use parse::*;
