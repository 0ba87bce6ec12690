//! Bytecode verification and stack map inference
//!
//! For any specific instruction inside a method body, the stack and locals must have the same
//! structure regardless of which control flow path reached that instruction. This structure is
//! the _stack map frame_ (see [`Frame`]), and the frames at every jump target of a method form
//! its _stack map table_. The "types" used (see [`VerificationType`]) are the usual value types,
//! augmented to track object initialization and `null`.
//!
//! Straight-line instructions are simple to check (see [`Frame::execute`]). Points reachable from
//! several places need the frames along every path to be unified, which is a fix-point problem:
//! [`infer_frames`] solves it when code is assembled, using a [`ClassHierarchyResolver`] to find
//! the common superclass of two reference types. [`verify`] does the opposite job for parsed
//! classes, checking every method against the frames the class declares.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1

mod check;
mod frame;
mod hierarchy;
mod inference;
mod types;

pub use check::*;
pub use frame::*;
pub use hierarchy::*;
pub use inference::*;
pub use types::*;
