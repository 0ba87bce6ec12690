mod common;

use common::{class_name, class_with_static, name, parse};
use jvm_classfile::access_flags::MethodAccessFlags;
use jvm_classfile::class_file::{AttributeLike, ByteReader, ClassFile, Code};
use jvm_classfile::code::decode::{decode_code, Decoded};
use jvm_classfile::code::{BranchInstruction, CodeBuilder, Condition, Instruction, OrdComparison};
use jvm_classfile::constant_pool::{FieldRef, MethodRef};
use jvm_classfile::descriptors::{FieldType, MethodDescriptor};
use jvm_classfile::names::{BinaryName, UnqualifiedName};
use jvm_classfile::options::ShortJumps;
use jvm_classfile::verifier::ClassHierarchy;
use jvm_classfile::{verify, ClassBuilder, Error, Options};
use std::process::Command;

const PADDING: usize = 40_000;

fn nops(code: &mut CodeBuilder) -> Result<(), Error> {
    for _ in 0..PADDING {
        code.instruction(Instruction::Nop)?;
    }
    Ok(())
}

/// `if (i == 0) { <nops> } return;`
fn forward(options: &Options) -> Result<Vec<u8>, Error> {
    let descriptor = MethodDescriptor::new(vec![FieldType::int()], None);
    class_with_static("demo/Forward", "m", descriptor, options, |code| {
        code.iload(0)?;
        code.if_then(Condition::If(OrdComparison::EQ), nops)?;
        code.return_value(None)?;
        Ok(())
    })
}

/// `while (i > 0) { <nops>; i--; } return;`
fn backward(options: &Options) -> Result<Vec<u8>, Error> {
    let descriptor = MethodDescriptor::new(vec![FieldType::int()], None);
    class_with_static("demo/Backward", "m", descriptor, options, |code| {
        code.while_loop(
            |code| {
                code.iload(0)?;
                Ok(Condition::If(OrdComparison::GT))
            },
            |code, _, _| {
                nops(code)?;
                code.iinc(0, -1)?;
                Ok(())
            },
        )?;
        code.return_value(None)?;
        Ok(())
    })
}

fn failing() -> Options {
    Options {
        short_jumps: ShortJumps::Fail,
        ..Options::default()
    }
}

fn wide_gotos(bytes: &[u8]) -> usize {
    let class = ClassFile::parse(bytes).unwrap();
    let method = &class.methods[0];
    let code = method
        .attributes
        .iter()
        .find(|attribute| class.constants.utf8_at(attribute.name_index).unwrap() == Code::NAME)
        .unwrap();
    let code = Code::read_all(&mut ByteReader::new(&code.info)).unwrap();
    decode_code(&code.code_array)
        .unwrap()
        .iter()
        .filter(|insn| matches!(insn.decoded, Decoded::Branch(BranchInstruction::GotoW(_))))
        .count()
}

#[test]
fn long_forward_branch_is_widened() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes = forward(&Options::default()).unwrap();
    assert_eq!(wide_gotos(&bytes), 1);

    let model = parse(&bytes);
    let diagnostics = verify(&model, &ClassHierarchy::jdk());
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
}

#[test]
fn long_backward_jump_is_widened() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes = backward(&Options::default()).unwrap();
    assert!(wide_gotos(&bytes) >= 2, "loop exit and back edge are both too long");

    let model = parse(&bytes);
    let diagnostics = verify(&model, &ClassHierarchy::jdk());
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
}

#[test]
fn long_jumps_fail_when_not_fixed() {
    let _ = env_logger::builder().is_test(true).try_init();

    assert!(matches!(
        forward(&failing()),
        Err(Error::ShortJumpOverflow { .. })
    ));
    assert!(matches!(
        backward(&failing()),
        Err(Error::ShortJumpOverflow { .. })
    ));
}

#[test]
fn short_jumps_stay_short() {
    let _ = env_logger::builder().is_test(true).try_init();

    let descriptor = MethodDescriptor::new(vec![FieldType::int()], None);
    let bytes = class_with_static("demo/Short", "m", descriptor, &failing(), |code| {
        code.iload(0)?;
        code.if_then(Condition::If(OrdComparison::EQ), |code| {
            for _ in 0..1000 {
                code.instruction(Instruction::Nop)?;
            }
            Ok(())
        })?;
        code.return_value(None)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(wide_gotos(&bytes), 0);
}

fn int_to_int() -> MethodDescriptor {
    MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::int()))
}

/// `Wide` with `static int m(int i) { if (i == 0) { <nops>; return 2; } else { return 1; } }`,
/// and a `main` printing `m(0)` and `m(5)`
fn wide() -> Vec<u8> {
    let mut builder = ClassBuilder::new(class_name("Wide"), Options::default());
    builder
        .with_method(name("m"), int_to_int(), MethodAccessFlags::STATIC, |method| {
            method.with_code(|code| {
                code.iload(0)?;
                code.if_then_else(
                    Condition::If(OrdComparison::EQ),
                    |code| {
                        nops(code)?;
                        code.iconst(2)?;
                        Ok(())
                    },
                    |code| {
                        code.iconst(1)?;
                        Ok(())
                    },
                )?;
                code.return_value(Some(&FieldType::int()))?;
                Ok(())
            })?;
            Ok(())
        })
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
                    let m = MethodRef::new(class_name("Wide"), name("m"), int_to_int());
                    let println = MethodRef::new(
                        BinaryName::PRINTSTREAM,
                        UnqualifiedName::PRINTLN,
                        MethodDescriptor::new(vec![FieldType::int()], None),
                    );
                    for argument in [0, 5] {
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

#[test]
fn widened_code_runs_on_the_jvm() {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes = wide();
    assert!(wide_gotos(&bytes) >= 1, "the conditional jump needs widening");

    let model = parse(&bytes);
    let diagnostics = verify(&model, &ClassHierarchy::jdk());
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    let directory = tempfile::tempdir().unwrap();
    std::fs::write(directory.path().join("Wide.class"), &bytes).unwrap();
    let output = match Command::new("java")
        .arg("-cp")
        .arg(directory.path())
        .arg("Wide")
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
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "2\n1\n",
        "the widened branch still selects the same arm"
    );
}
