mod common;

use common::{class_name, name, parse};
use jvm_classfile::access_flags::MethodAccessFlags;
use jvm_classfile::code::{
    BranchInstruction, CodeElement, CodeModel, Condition, Instruction, Label, OrdComparison,
};
use jvm_classfile::constant_pool::{FieldRef, MethodRef};
use jvm_classfile::descriptors::{FieldType, MethodDescriptor};
use jvm_classfile::names::{BinaryName, UnqualifiedName};
use jvm_classfile::verifier::ClassHierarchy;
use jvm_classfile::{verify, ClassBuilder, Options};
use std::collections::HashMap;
use std::process::Command;

fn int_to_int() -> MethodDescriptor {
    MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::int()))
}

/// `Foo` with `static int m(int i) { return i < 10 ? 1 : 2; }` and a `main` printing `m(3)` and
/// `m(11)`
fn foo() -> Vec<u8> {
    let mut builder = ClassBuilder::new(class_name("Foo"), Options::default());
    builder
        .with_method(
            name("m"),
            int_to_int(),
            MethodAccessFlags::STATIC,
            |method| {
                method.with_code(|code| {
                    code.iload(0)?.bipush(10)?;
                    code.if_then_else(
                        Condition::IfICmp(OrdComparison::LT),
                        |code| {
                            code.iconst(1)?;
                            Ok(())
                        },
                        |code| {
                            code.iconst(2)?;
                            Ok(())
                        },
                    )?;
                    code.return_value(Some(&FieldType::int()))?;
                    Ok(())
                })?;
                Ok(())
            },
        )
        .unwrap()
        .with_method(
            UnqualifiedName::MAIN,
            MethodDescriptor::new(
                vec![FieldType::array(FieldType::object(BinaryName::STRING))],
                None,
            ),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            |method| {
                method.with_code(|code| {
                    let out = FieldRef::new(
                        BinaryName::SYSTEM,
                        UnqualifiedName::OUT,
                        FieldType::object(BinaryName::PRINTSTREAM),
                    );
                    let m = MethodRef::new(class_name("Foo"), name("m"), int_to_int());
                    let println = MethodRef::new(
                        BinaryName::PRINTSTREAM,
                        UnqualifiedName::PRINTLN,
                        MethodDescriptor::new(vec![FieldType::int()], None),
                    );
                    for argument in [3, 11] {
                        code.getstatic(out.clone())?
                            .iconst(argument)?
                            .invoke_static(m.clone())?
                            .invoke_virtual(println.clone())?;
                    }
                    code.return_value(None)?;
                    Ok(())
                })?;
                Ok(())
            },
        )
        .unwrap();
    builder.build().unwrap()
}

/// Run straight-line `int` code with branches, enough for `m`
fn evaluate(code: &CodeModel, argument: i32) -> i32 {
    let labels: HashMap<Label, usize> = code
        .elements
        .iter()
        .enumerate()
        .filter_map(|(index, element)| match element {
            CodeElement::Label(label) => Some((*label, index)),
            _ => None,
        })
        .collect();
    let holds = |comparison: OrdComparison, left: i32, right: i32| match comparison {
        OrdComparison::EQ => left == right,
        OrdComparison::NE => left != right,
        OrdComparison::LT => left < right,
        OrdComparison::LE => left <= right,
        OrdComparison::GT => left > right,
        OrdComparison::GE => left >= right,
    };

    let mut stack: Vec<i32> = vec![];
    let mut position = 0;
    loop {
        let mut next = position + 1;
        match &code.elements[position] {
            CodeElement::Instruction(Instruction::ILoad(0)) => stack.push(argument),
            CodeElement::Instruction(Instruction::BiPush(value)) => stack.push(*value as i32),
            CodeElement::Instruction(Instruction::IConst1) => stack.push(1),
            CodeElement::Instruction(Instruction::IConst2) => stack.push(2),
            CodeElement::Branch(BranchInstruction::IfICmp(comparison, target, ())) => {
                let right = stack.pop().unwrap();
                let left = stack.pop().unwrap();
                if holds(*comparison, left, right) {
                    next = labels[target];
                }
            }
            CodeElement::Branch(BranchInstruction::Goto(target)) => next = labels[target],
            CodeElement::Branch(BranchInstruction::IReturn) => return stack.pop().unwrap(),
            CodeElement::Instruction(other) => panic!("unexpected instruction {:?}", other),
            _ => (),
        }
        position = next;
    }
}

#[test]
fn foo_verifies_and_computes() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes = foo();
    let model = parse(&bytes);
    let diagnostics = verify(&model, &ClassHierarchy::jdk());
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    let code = model.method("m", "(I)I").unwrap().code().unwrap().unwrap();
    assert_eq!(evaluate(code, 3), 1);
    assert_eq!(evaluate(code, 11), 2);
    assert_eq!(evaluate(code, 10), 2);
}

#[test]
fn foo_runs_on_the_jvm() {
    let _ = env_logger::builder().is_test(true).try_init();

    let directory = tempfile::tempdir().unwrap();
    std::fs::write(directory.path().join("Foo.class"), foo()).unwrap();

    let output = match Command::new("java")
        .arg("-cp")
        .arg(directory.path())
        .arg("Foo")
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            eprintln!("skipping, cannot run `java`: {}", err);
            return;
        }
    };
    assert!(
        output.status.success(),
        "java failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "1\n2\n");
}
