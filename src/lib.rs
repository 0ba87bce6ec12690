//! Read, build, transform, and verify JVM class files
//!
//! Classes go through a few representations:
//!
//!   - raw bytes, following the [class file format][0]
//!   - [`ClassFile`](class_file::ClassFile), the structure of the format with every reference
//!     still an index into the [constant pool](constant_pool::ConstantPool)
//!   - [`ClassModel`](model::ClassModel), a stream of symbolic elements (method bodies included,
//!     as [code elements](code::CodeElement), decoded the first time they are accessed)
//!
//! Parsing goes from bytes to a model. Builders go the other way, assembling code and inferring
//! stack map frames along the way. [Transforms](transform) sit between the two:
//!
//! ```text,ignore,no_run
//!   let model = ClassModel::parse(&bytes, &options)?;
//!   let rewritten = model.transform(&options, pipeline)?;
//!   let diagnostics = verifier::verify(&ClassModel::parse(&rewritten, &options)?, &resolver);
//! ```
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html

pub mod access_flags;
pub mod builder;
pub mod class_file;
pub mod code;
pub mod constant_pool;
pub mod descriptors;
pub mod errors;
pub mod model;
pub mod names;
pub mod options;
pub mod transform;
pub mod util;
pub mod verifier;

pub use builder::ClassBuilder;
pub use errors::Error;
pub use model::ClassModel;
pub use options::Options;
pub use verifier::{verify, Diagnostic};
