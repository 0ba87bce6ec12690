mod common;

use common::{class_name, class_with_static, name, parse};
use jvm_classfile::code::{CodeBuilder, CodeElement, Condition, DeclaredFrame, Instruction, OrdComparison};
use jvm_classfile::constant_pool::MethodRef;
use jvm_classfile::descriptors::{FieldType, MethodDescriptor, RefType};
use jvm_classfile::model::{ClassElement, ClassModel};
use jvm_classfile::names::{BinaryName, UnqualifiedName};
use jvm_classfile::options::StackMaps;
use jvm_classfile::verifier::{ClassHierarchy, ClassInfo, VerificationType};
use jvm_classfile::{verify, Error, Options};
use std::sync::Arc;

fn frames(model: &ClassModel, method: &str, descriptor: &str) -> Vec<DeclaredFrame> {
    model
        .method(method, descriptor)
        .unwrap()
        .code()
        .unwrap()
        .unwrap()
        .elements
        .iter()
        .filter_map(|element| match element {
            CodeElement::StackMap(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

fn boxed(class: BinaryName, primitive: FieldType) -> MethodRef {
    MethodRef::new(
        class.clone(),
        UnqualifiedName::VALUEOF,
        MethodDescriptor::new(vec![primitive], Some(FieldType::object(class))),
    )
}

/// `static Number pick(int i) { return i < 0 ? Integer.valueOf(i) : Long.valueOf(1L); }`
fn pick(code: &mut CodeBuilder) -> Result<(), Error> {
    code.iload(0)?;
    code.if_then_else(
        Condition::If(OrdComparison::LT),
        |code| {
            code.iload(0)?
                .invoke_static(boxed(BinaryName::INTEGER, FieldType::int()))?;
            Ok(())
        },
        |code| {
            code.lconst(1)?
                .invoke_static(boxed(BinaryName::LONG, FieldType::long()))?;
            Ok(())
        },
    )?;
    code.return_value(Some(&FieldType::object(BinaryName::NUMBER)))?;
    Ok(())
}

fn pick_descriptor() -> MethodDescriptor {
    MethodDescriptor::new(
        vec![FieldType::int()],
        Some(FieldType::object(BinaryName::NUMBER)),
    )
}

#[test]
fn integer_and_long_merge_to_number() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes = class_with_static("demo/Pick", "pick", pick_descriptor(), &Options::default(), pick)
        .unwrap();
    let model = parse(&bytes);

    let number = VerificationType::Object(RefType::object(BinaryName::NUMBER));
    let frames = frames(&model, "pick", "(I)Ljava/lang/Number;");
    assert!(
        frames.iter().any(|frame| frame.stack == vec![number.clone()]),
        "no frame with a `Number` on the stack in {:?}",
        frames
    );

    let diagnostics = verify(&model, &ClassHierarchy::jdk());
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
}

#[test]
fn user_classes_merge_through_the_resolver() {
    let _ = env_logger::builder().is_test(true).try_init();

    let hierarchy = ClassHierarchy::jdk()
        .with_class(class_name("demo/Base"), ClassInfo::class(BinaryName::OBJECT))
        .with_class(class_name("demo/A"), ClassInfo::class(class_name("demo/Base")))
        .with_class(class_name("demo/B"), ClassInfo::class(class_name("demo/Base")));
    let options = Options {
        class_hierarchy: Arc::new(hierarchy.clone()),
        ..Options::default()
    };
    let base = FieldType::object(class_name("demo/Base"));
    let descriptor = MethodDescriptor::new(vec![FieldType::int()], Some(base.clone()));

    let bytes = class_with_static("demo/Choose", "choose", descriptor, &options, |code| {
        code.iload(0)?;
        code.if_then_else(
            Condition::If(OrdComparison::EQ),
            |code| {
                code.instruction(Instruction::AConstNull)?
                    .checkcast(RefType::object(class_name("demo/A")))?;
                Ok(())
            },
            |code| {
                code.instruction(Instruction::AConstNull)?
                    .checkcast(RefType::object(class_name("demo/B")))?;
                Ok(())
            },
        )?;
        code.return_value(Some(&base))?;
        Ok(())
    })
    .unwrap();
    let model = parse(&bytes);

    let merged = VerificationType::Object(RefType::object(class_name("demo/Base")));
    let frames = frames(&model, "choose", "(I)Ldemo/Base;");
    assert!(frames.iter().any(|frame| frame.stack == vec![merged.clone()]));
    assert!(verify(&model, &hierarchy).is_empty());
}

#[test]
fn unknown_classes_fail_the_build() {
    let _ = env_logger::builder().is_test(true).try_init();

    let unknown = |class: &str| {
        MethodRef::new(
            class_name(class),
            name("make"),
            MethodDescriptor::new(vec![], Some(FieldType::object(class_name(class)))),
        )
    };
    let descriptor = MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::object(BinaryName::OBJECT)));
    let result = class_with_static("demo/Unknown", "make", descriptor, &Options::default(), |code| {
        code.iload(0)?;
        code.if_then_else(
            Condition::If(OrdComparison::EQ),
            |code| {
                code.invoke_static(unknown("demo/X"))?;
                Ok(())
            },
            |code| {
                code.invoke_static(unknown("demo/Y"))?;
                Ok(())
            },
        )?;
        code.return_value(Some(&FieldType::object(BinaryName::OBJECT)))?;
        Ok(())
    });
    assert!(
        matches!(result, Err(Error::VerifierError { .. }) | Err(Error::IncompatibleFrames { .. })),
        "{:?}",
        result
    );
}

#[test]
fn frames_follow_version_and_options() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dropped = Options {
        stack_maps: StackMaps::Drop,
        ..Options::default()
    };
    let bytes = class_with_static("demo/Pick", "pick", pick_descriptor(), &dropped, pick).unwrap();
    assert!(frames(&parse(&bytes), "pick", "(I)Ljava/lang/Number;").is_empty());

    let model = parse(
        &class_with_static("demo/Pick", "pick", pick_descriptor(), &Options::default(), pick)
            .unwrap(),
    );
    let mut elements = model.into_elements();
    for element in &mut elements {
        if let ClassElement::Version(version) = element {
            *version = jvm_classfile::class_file::Version::JAVA5;
        }
    }
    let old = ClassModel::new(class_name("demo/Pick"), elements)
        .transform(&Options::default(), Default::default())
        .unwrap();
    let old = parse(&old);
    assert!(!old.version().has_stack_map_frames());
    assert!(frames(&old, "pick", "(I)Ljava/lang/Number;").is_empty());
    assert!(verify(&old, &ClassHierarchy::jdk()).is_empty());
}
