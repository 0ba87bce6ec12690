mod common;

use common::{class_name, class_with_static, name, parse};
use jvm_classfile::access_flags::MethodAccessFlags;
use jvm_classfile::builder::ClassBuilder;
use jvm_classfile::code::{CodeBuilder, CodeElement, Condition, Instruction, OrdComparison};
use jvm_classfile::descriptors::{FieldType, MethodDescriptor};
use jvm_classfile::model::{ClassElement, ClassModel, MethodElement, MethodModel};
use jvm_classfile::names::Name;
use jvm_classfile::transform::{
    transforming_code, transforming_methods, ElementSink, LabelRemapper, LocalsShifter, Pipeline,
    Transform,
};
use jvm_classfile::verifier::ClassHierarchy;
use jvm_classfile::{verify, Error, Options};

fn int_to_int() -> MethodDescriptor {
    MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::int()))
}

/// `static int clamp(int i) { int t = i * 2; if (t > 100) t = 100; return t; }`
fn clamp(code: &mut CodeBuilder) -> Result<(), Error> {
    let t = code.allocate_local(&FieldType::int())? as usize;
    code.iload(0)?
        .iconst(2)?
        .instruction(Instruction::IMul)?
        .istore(t)?
        .iload(t)?
        .bipush(100)?;
    code.if_then(Condition::IfICmp(OrdComparison::GT), |code| {
        code.bipush(100)?.istore(t)?;
        Ok(())
    })?;
    code.iload(t)?.return_value(Some(&FieldType::int()))?;
    Ok(())
}

fn three_methods() -> ClassModel {
    let mut builder = ClassBuilder::new(class_name("demo/Three"), Options::default());
    for method in ["a", "b", "c"] {
        builder
            .with_method(name(method), int_to_int(), MethodAccessFlags::STATIC, |method| {
                method.with_code(clamp)?;
                Ok(())
            })
            .unwrap();
    }
    parse(&builder.build().unwrap())
}

fn method_names(model: &ClassModel) -> Vec<String> {
    model
        .methods()
        .map(|method| method.name.as_str().to_owned())
        .collect()
}

fn rename(from: &'static str, to: &'static str) -> impl Transform<ClassBuilder, ClassElement> {
    move |builder: &mut ClassBuilder, element: ClassElement| -> Result<(), Error> {
        match element {
            ClassElement::Method(method) if method.name.as_str() == from => {
                builder.with(ClassElement::Method(MethodModel {
                    name: name(to),
                    ..method
                }))?
            }
            other => builder.with(other)?,
        };
        Ok(())
    }
}

#[test]
fn stages_see_what_the_previous_stage_emitted() {
    let _ = env_logger::builder().is_test(true).try_init();

    let model = three_methods();
    let options = Options::default();

    let chained = Pipeline::new(rename("a", "b")).and_then(rename("b", "z"));
    let bytes = model.transform(&options, chained).unwrap();
    assert_eq!(method_names(&parse(&bytes)), vec!["z", "z", "c"]);

    let reversed = Pipeline::new(rename("b", "z")).and_then(rename("a", "b"));
    let bytes = model.transform(&options, reversed).unwrap();
    assert_eq!(method_names(&parse(&bytes)), vec!["b", "z", "c"]);
}

/// Drops one method, and adds a fresh one once the source is exhausted
struct Replace {
    dropped: &'static str,
}

impl Transform<ClassBuilder, ClassElement> for Replace {
    fn accept(&mut self, builder: &mut ClassBuilder, element: ClassElement) -> Result<(), Error> {
        match element {
            ClassElement::Method(method) if method.name.as_str() == self.dropped => (),
            other => {
                builder.with(other)?;
            }
        }
        Ok(())
    }

    fn at_end(&mut self, builder: &mut ClassBuilder) -> Result<(), Error> {
        builder.with_method(
            name("added"),
            MethodDescriptor::new(vec![], Some(FieldType::long())),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            |method| {
                method.with_code(|code| {
                    code.lconst(1)?.return_value(Some(&FieldType::long()))?;
                    Ok(())
                })?;
                Ok(())
            },
        )?;
        Ok(())
    }
}

#[test]
fn elements_can_be_dropped_and_added() {
    let _ = env_logger::builder().is_test(true).try_init();

    let model = three_methods();
    let bytes = model
        .transform(&Options::default(), Pipeline::new(Replace { dropped: "b" }))
        .unwrap();
    let transformed = parse(&bytes);
    assert_eq!(method_names(&transformed), vec!["a", "c", "added"]);
    assert!(verify(&transformed, &ClassHierarchy::jdk()).is_empty());
}

#[test]
fn code_rewrites_reassemble_and_verify() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Replace `bipush 100` by `sipush 1000` in every body
    let limit = |code: &mut CodeBuilder, element: CodeElement| -> Result<(), Error> {
        match element {
            CodeElement::Instruction(Instruction::BiPush(100)) => code.sipush(1000)?,
            other => code.with(other)?,
        };
        Ok(())
    };
    let pipeline = Pipeline::new(transforming_methods(move || {
        Pipeline::new(transforming_code(move || Pipeline::new(limit)))
    }));
    let bytes = three_methods()
        .transform(&Options::default(), pipeline)
        .unwrap();

    let transformed = parse(&bytes);
    assert!(verify(&transformed, &ClassHierarchy::jdk()).is_empty());
    for method in transformed.methods() {
        let constants: Vec<&CodeElement> = method
            .code()
            .unwrap()
            .unwrap()
            .instructions()
            .filter(|element| {
                matches!(
                    element,
                    CodeElement::Instruction(Instruction::BiPush(_) | Instruction::SiPush(_))
                )
            })
            .collect();
        assert_eq!(
            constants,
            vec![
                &CodeElement::Instruction(Instruction::SiPush(1000)),
                &CodeElement::Instruction(Instruction::SiPush(1000)),
            ]
        );
    }
}

#[test]
fn code_splices_into_another_method() {
    let _ = env_logger::builder().is_test(true).try_init();

    let source = parse(
        &class_with_static("demo/Source", "clamp", int_to_int(), &Options::default(), clamp)
            .unwrap(),
    );
    let source_code = source.method("clamp", "(I)I").unwrap().code().unwrap().unwrap().clone();

    // The target already uses slots 1-2 and label `START`
    let mut target = CodeBuilder::new(&int_to_int(), true);
    let scratch = target.allocate_local(&FieldType::long()).unwrap();
    let entry = target.new_label();
    target
        .bind(entry)
        .unwrap()
        .lconst(0)
        .unwrap()
        .lstore(scratch as usize)
        .unwrap();
    let mut target = target.with_pipeline(
        Pipeline::new(LabelRemapper::new()).and_then(LocalsShifter::new(&int_to_int(), true)),
    );
    target.run(source_code.elements).unwrap();
    let spliced = target.finish().unwrap();

    let stores: Vec<&CodeElement> = spliced
        .instructions()
        .filter(|element| matches!(element, CodeElement::Instruction(Instruction::IStore(_))))
        .collect();
    assert_eq!(
        stores,
        vec![
            &CodeElement::Instruction(Instruction::IStore(3)),
            &CodeElement::Instruction(Instruction::IStore(3)),
        ]
    );

    let mut builder = ClassBuilder::new(class_name("demo/Target"), Options::default());
    builder
        .with_method(name("clamp"), int_to_int(), MethodAccessFlags::STATIC, |method| {
            method.with(MethodElement::Code(spliced.into()))?;
            Ok(())
        })
        .unwrap();
    let model = parse(&builder.build().unwrap());
    let diagnostics = verify(&model, &ClassHierarchy::jdk());
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert_eq!(
        model.method("clamp", "(I)I").unwrap().code().unwrap().unwrap().max_locals,
        4
    );
}
