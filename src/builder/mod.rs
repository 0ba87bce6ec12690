//! Builders producing class files from element streams
//!
//! Each level of the [model](crate::model) has a builder consuming its elements:
//!
//!   - [`ClassBuilder`] consumes [`ClassElement`](crate::model::ClassElement)s and writes the class
//!   - [`FieldBuilder`] consumes [`FieldElement`](crate::model::FieldElement)s
//!   - [`MethodBuilder`] consumes [`MethodElement`](crate::model::MethodElement)s
//!   - [`CodeBuilder`](crate::code::CodeBuilder) consumes [`CodeElement`](crate::code::CodeElement)s
//!
//! Builders are fed through [`ElementSink::with`](crate::transform::ElementSink::with), which means
//! they can sit behind a transform [`Pipeline`](crate::transform::Pipeline). The constant pool is
//! only touched when the class is finally built.

mod class;
mod field;
mod method;

pub use class::*;
pub use field::*;
pub use method::*;
