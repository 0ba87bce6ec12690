mod common;

use common::{class_name, class_with_static, name};
use jvm_classfile::access_flags::{FieldAccessFlags, MethodAccessFlags};
use jvm_classfile::class_file::JavaString;
use jvm_classfile::code::{CodeElement, Instruction};
use jvm_classfile::constant_pool::LoadableConstant;
use jvm_classfile::descriptors::{FieldType, MethodDescriptor};
use jvm_classfile::model::{ClassElement, ClassModel, FieldElement, UnknownAttribute};
use jvm_classfile::names::BinaryName;
use jvm_classfile::options::{AttributeAction, ConstantPoolMode, DebugElements};
use jvm_classfile::transform::{ElementSink, Pipeline};
use jvm_classfile::verifier::ClassHierarchy;
use jvm_classfile::{verify, ClassBuilder, Options};
use std::sync::Arc;

/// Unknown attributes are kept without tying them to a pool, so that models parsed from
/// different bytes can be compared
fn options() -> Options {
    Options {
        attribute_resolver: Arc::new(|_: &str| AttributeAction::KeepUnbound),
        ..Options::default()
    }
}

fn sample() -> Vec<u8> {
    let int = FieldType::int();
    let mut builder = ClassBuilder::new(class_name("demo/Sample"), options());
    builder
        .with(ClassElement::SourceFile(String::from("Sample.java")))
        .unwrap()
        .with(ClassElement::Attribute(UnknownAttribute::unbound(
            "Custom",
            vec![0xca, 0xfe],
        )))
        .unwrap()
        .with_field(
            name("LIMIT"),
            int.clone(),
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
            |field| {
                field.with(FieldElement::ConstantValue(LoadableConstant::Integer(100_000)))?;
                Ok(())
            },
        )
        .unwrap()
        .with_method(
            name("divide"),
            MethodDescriptor::new(vec![int.clone(), int.clone()], Some(int.clone())),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            |method| {
                method.with_code(|code| {
                    let start = code.new_label();
                    let end = code.new_label();
                    code.bind(start)?.line_number(3)?;
                    code.trying(
                        |code| {
                            code.iload(0)?
                                .iload(1)?
                                .instruction(Instruction::IDiv)?
                                .return_value(Some(&FieldType::int()))?;
                            Ok(())
                        },
                        |catches| {
                            catches.catching(BinaryName::ARITHMETICEXCEPTION, |code| {
                                code.line_number(5)?
                                    .instruction(Instruction::Pop)?
                                    .iconst(-1)?
                                    .return_value(Some(&FieldType::int()))?;
                                Ok(())
                            })?;
                            Ok(())
                        },
                    )?;
                    code.bind(end)?;
                    code.local_variable(0, name("a"), FieldType::int(), start, end)?
                        .local_variable(1, name("b"), FieldType::int(), start, end)?;
                    Ok(())
                })?;
                Ok(())
            },
        )
        .unwrap()
        .with_method(
            name("describe"),
            MethodDescriptor::new(vec![int.clone()], Some(int)),
            MethodAccessFlags::STATIC,
            |method| {
                method.with_code(|code| {
                    code.iload(0)?;
                    code.switch(|cases| {
                        cases
                            .case(1, |code, _| {
                                code.sipush(1000)?.return_value(Some(&FieldType::int()))?;
                                Ok(())
                            })?
                            .case(50, |code, _| {
                                code.ldc(LoadableConstant::Integer(1 << 20))?
                                    .return_value(Some(&FieldType::int()))?;
                                Ok(())
                            })?
                            .default(|code, _| {
                                code.iconst(0)?.return_value(Some(&FieldType::int()))?;
                                Ok(())
                            })?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
                Ok(())
            },
        )
        .unwrap();
    builder.build().unwrap()
}

#[test]
fn identity_transform_preserves_the_model() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes = sample();
    let model = ClassModel::parse(&bytes, &options()).unwrap();
    assert!(verify(&model, &ClassHierarchy::jdk()).is_empty());

    let rewritten = model.transform(&options(), Pipeline::identity()).unwrap();
    let reparsed = ClassModel::parse(&rewritten, &options()).unwrap();
    assert_eq!(model.elements(), reparsed.elements());
}

#[test]
fn repeated_identity_transforms_are_stable() {
    let _ = env_logger::builder().is_test(true).try_init();

    let first = ClassModel::parse(&sample(), &options())
        .unwrap()
        .transform(&options(), Pipeline::identity())
        .unwrap();
    let second = ClassModel::parse(&first, &options())
        .unwrap()
        .transform(&options(), Pipeline::identity())
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn fresh_pool_keeps_the_same_elements() {
    let _ = env_logger::builder().is_test(true).try_init();

    let model = ClassModel::parse(&sample(), &options()).unwrap();
    let fresh = Options {
        constant_pool: ConstantPoolMode::New,
        ..options()
    };
    let rewritten = model.transform(&fresh, Pipeline::identity()).unwrap();
    let reparsed = ClassModel::parse(&rewritten, &options()).unwrap();
    assert_eq!(model.elements(), reparsed.elements());
    assert!(reparsed.constants().count() <= model.constants().count());
}

#[test]
fn debug_elements_can_be_dropped() {
    let _ = env_logger::builder().is_test(true).try_init();

    let without_debug = Options {
        debug_elements: DebugElements::Drop,
        ..options()
    };
    let model = ClassModel::parse(&sample(), &without_debug).unwrap();
    for method in model.methods() {
        let code = method.code().unwrap().unwrap();
        assert!(!code.elements.iter().any(CodeElement::is_debug));
    }

    let with_debug = ClassModel::parse(&sample(), &options()).unwrap();
    let divide = with_debug.method("divide", "(II)I").unwrap().code().unwrap().unwrap();
    let lines: Vec<u16> = divide
        .elements
        .iter()
        .filter_map(|element| match element {
            CodeElement::LineNumber(line) => Some(*line),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec![3, 5]);
}

#[test]
fn malformed_input_is_rejected() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes = sample();
    assert!(ClassModel::parse(&bytes[..bytes.len() - 3], &options()).is_err());
    assert!(ClassModel::parse(&[0xca, 0xfe, 0xba, 0xbf], &options()).is_err());

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert!(ClassModel::parse(&trailing, &options()).is_err());
}

#[test]
fn unpaired_surrogates_survive_a_transform() {
    let _ = env_logger::builder().is_test(true).try_init();

    let string = FieldType::object(BinaryName::STRING);
    let lone = LoadableConstant::String(JavaString::from_utf16(vec![0x61, 0xD800]));
    let descriptor = MethodDescriptor::new(vec![], Some(string.clone()));
    let bytes = class_with_static("demo/Surrogate", "text", descriptor, &options(), |code| {
        code.ldc(lone.clone())?.return_value(Some(&string))?;
        Ok(())
    })
    .unwrap();

    let rewritten = ClassModel::parse(&bytes, &options())
        .unwrap()
        .transform(&options(), Pipeline::identity())
        .unwrap();
    assert!(rewritten.windows(4).any(|window| window == [0x61, 0xED, 0xA0, 0x80]));

    let model = ClassModel::parse(&rewritten, &options()).unwrap();
    let code = model.method("text", "()Ljava/lang/String;").unwrap().code().unwrap().unwrap();
    let expected = CodeElement::Instruction(Instruction::Ldc(lone.clone()));
    assert!(code.instructions().any(|element| *element == expected));
}
