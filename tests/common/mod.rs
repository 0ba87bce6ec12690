#![allow(dead_code)]

use jvm_classfile::access_flags::MethodAccessFlags;
use jvm_classfile::code::CodeBuilder;
use jvm_classfile::descriptors::MethodDescriptor;
use jvm_classfile::names::{BinaryName, Name, UnqualifiedName};
use jvm_classfile::{ClassBuilder, ClassModel, Error, Options};

pub fn class_name(name: &str) -> BinaryName {
    BinaryName::from_str(name).unwrap()
}

pub fn name(name: &str) -> UnqualifiedName {
    UnqualifiedName::from_str(name).unwrap()
}

/// Serialized class with one static method
pub fn class_with_static(
    class: &str,
    method: &str,
    descriptor: MethodDescriptor,
    options: &Options,
    body: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
) -> Result<Vec<u8>, Error> {
    let mut builder = ClassBuilder::new(class_name(class), options.clone());
    builder.with_method(
        name(method),
        descriptor,
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        |method| {
            method.with_code(body)?;
            Ok(())
        },
    )?;
    builder.build()
}

pub fn parse(bytes: &[u8]) -> ClassModel {
    ClassModel::parse(bytes, &Options::default()).unwrap()
}
