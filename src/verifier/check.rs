use crate::access_flags::MethodAccessFlags;
use crate::code::{
    BranchInstruction, CodeElement, CodeModel, DeclaredFrame, Instruction, Label, MethodShape,
    SplitCode,
};
use crate::descriptors::{RefType, RenderDescriptor};
use crate::errors::VerifierErrorKind;
use crate::model::{ClassElement, ClassModel, MethodModel};
use crate::names::BinaryName;
use crate::verifier::{
    infer_frames, ClassHierarchyResolver, ClassInfo, DeclaredType, Frame, Hierarchy, InferredType,
    MethodContext, UninitializedSite,
};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Problem found by [`verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub class: BinaryName,

    /// Name and descriptor of the method, when the problem is inside one
    pub method: Option<String>,

    /// Index of the offending instruction in the method body (counting from 0)
    pub instruction: Option<usize>,

    pub kind: DiagnosticKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    DuplicateField(String),
    DuplicateMethod(String),
    TooManyEntries {
        what: &'static str,
        count: usize,
    },

    /// Method is neither `abstract` nor `native`, but has no code
    MissingCode,

    /// `abstract` or `native` method with code
    UnexpectedCode,

    /// Operands don't have the types the instruction needs
    BadOperands {
        instruction: String,
        kind: VerifierErrorKind,
    },
    MaxStackExceeded {
        max_stack: u16,
        depth: usize,
    },
    MaxLocalsExceeded {
        max_locals: u16,
        needed: usize,
    },

    /// Frame flowing into a declared frame is not assignable to it (`label` is `None` when the
    /// frame is reached by falling through)
    IncompatibleFrame {
        label: Option<Label>,
        found: String,
        expected: String,
    },

    /// Jump target or exception handler without a declared frame
    MissingFrame(Label),

    /// Instruction after an unconditional jump, with no declared frame
    UnreachableWithoutFrame,

    /// Declared `Uninitialized` type whose label isn't right before a `new`
    BadUninitializedLabel(Label),
    MalformedSwitch(String),
    BadExceptionRange {
        start: Label,
        end: Label,
        handler: Label,
    },
    NotThrowable(BinaryName),
    JumpOutOfRange(Label),
    UnboundLabel(Label),
    FallsOffEnd,

    /// `jsr` and `ret` can't be checked against stack map frames
    Subroutine,

    /// Frames could not be inferred (only for classes predating stack map tables)
    Inference(String),

    /// The `Code` attribute could not be decoded
    UndecodableCode(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class)?;
        if let Some(method) = &self.method {
            write!(f, ".{}", method)?;
        }
        if let Some(instruction) = self.instruction {
            write!(f, " @{}", instruction)?;
        }
        write!(f, ": {}", self.kind)
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::DuplicateField(field) => write!(f, "duplicate field {}", field),
            DiagnosticKind::DuplicateMethod(method) => write!(f, "duplicate method {}", method),
            DiagnosticKind::TooManyEntries { what, count } => {
                write!(f, "too many {} ({} > 65535)", what, count)
            }
            DiagnosticKind::MissingCode => f.write_str("method has no code"),
            DiagnosticKind::UnexpectedCode => f.write_str("abstract or native method has code"),
            DiagnosticKind::BadOperands { instruction, kind } => {
                write!(f, "{} ({})", kind, instruction)
            }
            DiagnosticKind::MaxStackExceeded { max_stack, depth } => {
                write!(f, "stack depth {} exceeds max_stack {}", depth, max_stack)
            }
            DiagnosticKind::MaxLocalsExceeded { max_locals, needed } => {
                write!(f, "{} locals exceed max_locals {}", needed, max_locals)
            }
            DiagnosticKind::IncompatibleFrame {
                label,
                found,
                expected,
            } => {
                match label {
                    Some(label) => write!(f, "frame at {:?} ", label)?,
                    None => f.write_str("fall-through frame ")?,
                }
                write!(f, "{} is not assignable to {}", found, expected)
            }
            DiagnosticKind::MissingFrame(label) => {
                write!(f, "no stack map frame declared at {:?}", label)
            }
            DiagnosticKind::UnreachableWithoutFrame => {
                f.write_str("instruction after an unconditional jump has no stack map frame")
            }
            DiagnosticKind::BadUninitializedLabel(label) => {
                write!(f, "uninitialized type at {:?} does not refer to a `new`", label)
            }
            DiagnosticKind::MalformedSwitch(problem) => write!(f, "malformed switch: {}", problem),
            DiagnosticKind::BadExceptionRange {
                start,
                end,
                handler,
            } => write!(
                f,
                "bad exception range {:?}..{:?} (handler {:?})",
                start, end, handler
            ),
            DiagnosticKind::NotThrowable(class) => write!(f, "{} is not throwable", class),
            DiagnosticKind::JumpOutOfRange(label) => {
                write!(f, "jump to {:?}, past the end of the code", label)
            }
            DiagnosticKind::UnboundLabel(label) => write!(f, "label {:?} is not bound", label),
            DiagnosticKind::FallsOffEnd => f.write_str("execution falls off the end of the code"),
            DiagnosticKind::Subroutine => f.write_str("subroutines are not supported"),
            DiagnosticKind::Inference(message) => write!(f, "cannot infer frames: {}", message),
            DiagnosticKind::UndecodableCode(message) => {
                write!(f, "code cannot be decoded: {}", message)
            }
        }
    }
}

/// Check every method of a class, collecting all the problems found
///
/// Code is checked against the stack map frames it declares (the way the JVM's type-checking
/// verifier does it), or against inferred frames for class versions without stack map tables.
/// An error inside a method doesn't stop the check: it picks up again at the next declared frame.
pub fn verify(class: &ClassModel, resolver: &dyn ClassHierarchyResolver) -> Vec<Diagnostic> {
    log::info!("Verifying {}", class.this_class());

    let mut diagnostics = vec![];
    let mut report = |method: Option<String>, instruction: Option<usize>, kind: DiagnosticKind| {
        let diagnostic = Diagnostic {
            class: class.this_class().clone(),
            method,
            instruction,
            kind,
        };
        log::debug!("{}", diagnostic);
        diagnostics.push(diagnostic);
    };

    for element in class.elements() {
        if let ClassElement::Interfaces(interfaces) = element {
            if interfaces.len() > u16::MAX as usize {
                report(
                    None,
                    None,
                    DiagnosticKind::TooManyEntries {
                        what: "interfaces",
                        count: interfaces.len(),
                    },
                );
            }
        }
    }

    let mut fields = HashSet::new();
    let mut field_count = 0;
    for field in class.fields() {
        field_count += 1;
        let id = format!("{} {}", field.name, field.descriptor.render());
        if !fields.insert(id.clone()) {
            report(None, None, DiagnosticKind::DuplicateField(id));
        }
    }
    if field_count > u16::MAX as usize {
        report(
            None,
            None,
            DiagnosticKind::TooManyEntries {
                what: "fields",
                count: field_count,
            },
        );
    }

    let hierarchy = Hierarchy::new(resolver).with_this_class(
        class.this_class().clone(),
        ClassInfo {
            superclass: class.superclass().cloned(),
            is_interface: class.is_interface(),
        },
    );

    let mut methods = HashSet::new();
    let mut method_count = 0;
    for method in class.methods() {
        method_count += 1;
        let id = format!("{}{}", method.name, method.descriptor.render());
        if !methods.insert(id.clone()) {
            report(None, None, DiagnosticKind::DuplicateMethod(id.clone()));
        }
        for (instruction, kind) in check_method(class, method, &hierarchy) {
            report(Some(id.clone()), instruction, kind);
        }
    }
    if method_count > u16::MAX as usize {
        report(
            None,
            None,
            DiagnosticKind::TooManyEntries {
                what: "methods",
                count: method_count,
            },
        );
    }

    log::info!(
        "Verified {} ({} methods, {} diagnostics)",
        class.this_class(),
        method_count,
        diagnostics.len()
    );
    diagnostics
}

type Found = (Option<usize>, DiagnosticKind);

fn check_method(class: &ClassModel, method: &MethodModel, hierarchy: &Hierarchy) -> Vec<Found> {
    let needs_code = !method
        .access_flags()
        .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE);
    let code = match (method.lazy_code(), needs_code) {
        (Some(code), true) => match code.get() {
            Ok(code) => code,
            Err(err) => return vec![(None, DiagnosticKind::UndecodableCode(err.to_string()))],
        },
        (None, true) => return vec![(None, DiagnosticKind::MissingCode)],
        (Some(_), false) => return vec![(None, DiagnosticKind::UnexpectedCode)],
        (None, false) => return vec![],
    };

    let shape = method.shape(class.this_class());
    let context = MethodContext {
        hierarchy,
        this_class: class.this_class(),
        return_type: method.descriptor.return_type.as_ref(),
    };
    if class.version().has_stack_map_frames() {
        CodeChecker::new(code, &context).run(shape)
    } else {
        check_inferred(code, shape, &context)
    }
}

/// Older classes carry no frames, so check that frames can be inferred at all
fn check_inferred(code: &CodeModel, shape: MethodShape, context: &MethodContext) -> Vec<Found> {
    let mut labels = code.label_generator();
    let inference = SplitCode::split(&code.elements, &mut labels)
        .and_then(|split| infer_frames(&split, shape.entry_frame(), context));
    let inference = match inference {
        Ok(inference) => inference,
        Err(err) => return vec![(None, DiagnosticKind::Inference(err.to_string()))],
    };

    let mut found = vec![];
    if inference.max_stack > code.max_stack as usize {
        found.push((
            None,
            DiagnosticKind::MaxStackExceeded {
                max_stack: code.max_stack,
                depth: inference.max_stack,
            },
        ));
    }
    if inference.max_locals > code.max_locals as usize {
        found.push((
            None,
            DiagnosticKind::MaxLocalsExceeded {
                max_locals: code.max_locals,
                needed: inference.max_locals,
            },
        ));
    }
    found
}

/// Exception handler, with its labels resolved to instruction indices
struct Handler {
    start: usize,
    end: usize,
    handler: usize,
    label: Label,
    catch_type: RefType,
}

/// Linear pass over a method body, checking it against its declared frames
struct CodeChecker<'a, 'c, 'h> {
    code: &'a CodeModel,
    context: &'c MethodContext<'c, 'h>,

    /// Instructions, along with the label bound most recently before each one
    instructions: Vec<(&'a CodeElement, Option<Label>)>,

    /// Index of the instruction each label is bound before
    labels: HashMap<Label, usize>,

    /// Frames declared before an instruction
    declared: HashMap<usize, Frame>,

    handlers: Vec<Handler>,
    found: Vec<Found>,
}

impl<'a, 'c, 'h> CodeChecker<'a, 'c, 'h> {
    fn new(code: &'a CodeModel, context: &'c MethodContext<'c, 'h>) -> CodeChecker<'a, 'c, 'h> {
        CodeChecker {
            code,
            context,
            instructions: vec![],
            labels: HashMap::new(),
            declared: HashMap::new(),
            handlers: vec![],
            found: vec![],
        }
    }

    fn report(&mut self, instruction: Option<usize>, kind: DiagnosticKind) {
        self.found.push((instruction, kind));
    }

    fn run(mut self, shape: MethodShape) -> Vec<Found> {
        let mut declared_frames: Vec<(usize, &'a DeclaredFrame)> = vec![];
        let mut catches = vec![];
        let mut anchor = None;
        for element in &self.code.elements {
            match element {
                CodeElement::Label(label) => {
                    self.labels.insert(*label, self.instructions.len());
                    anchor = Some(*label);
                }
                CodeElement::StackMap(frame) => {
                    declared_frames.push((self.instructions.len(), frame));
                }
                CodeElement::ExceptionCatch {
                    start,
                    end,
                    handler,
                    catch_type,
                } => catches.push((*start, *end, *handler, catch_type)),
                CodeElement::Instruction(_) | CodeElement::Branch(_) => {
                    self.instructions.push((element, anchor));
                }
                _ => (),
            }
        }

        for (index, frame) in declared_frames {
            if let Some(frame) = self.declared_frame(index, frame) {
                self.declared.insert(index, frame);
            }
        }
        for (start, end, handler, catch_type) in catches {
            self.add_handler(start, end, handler, catch_type);
        }

        let entry = shape.entry_frame();
        if entry.max_locals() > self.code.max_locals as usize {
            self.report(
                None,
                DiagnosticKind::MaxLocalsExceeded {
                    max_locals: self.code.max_locals,
                    needed: entry.max_locals(),
                },
            );
        }
        self.walk(entry);
        self.found
    }

    fn declared_frame(&mut self, index: usize, frame: &DeclaredFrame) -> Option<Frame> {
        let convert_all = |entries: &[DeclaredType]| -> Result<Vec<InferredType>, Label> {
            entries.iter().map(|typ| self.declared_type(typ)).collect()
        };
        let converted = convert_all(&frame.locals)
            .and_then(|locals| Ok((locals, convert_all(&frame.stack)?)));
        match converted {
            Ok((locals, stack)) => Some(Frame::from_entries(locals, stack)),
            Err(label) => {
                self.report(Some(index), DiagnosticKind::BadUninitializedLabel(label));
                None
            }
        }
    }

    fn declared_type(&self, typ: &DeclaredType) -> Result<InferredType, Label> {
        typ.map(
            |class| Ok(class.clone()),
            |label| {
                let index = *self.labels.get(label).ok_or(*label)?;
                match self.instructions.get(index) {
                    Some((
                        CodeElement::Instruction(Instruction::New(RefType::Object(class))),
                        anchor,
                    )) => Ok(UninitializedSite {
                        class: class.clone(),
                        block: anchor.unwrap_or(Label::START),
                        index,
                    }),
                    _ => Err(*label),
                }
            },
        )
    }

    fn add_handler(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: &Option<BinaryName>,
    ) {
        let mut positions = [0; 3];
        for (position, label) in positions.iter_mut().zip([start, end, handler]) {
            match self.labels.get(&label).copied() {
                Some(index) => *position = index,
                None => return self.report(None, DiagnosticKind::UnboundLabel(label)),
            }
        }
        let [start_index, end_index, handler_index] = positions;
        if start_index >= end_index || handler_index >= self.instructions.len() {
            return self.report(
                Some(start_index),
                DiagnosticKind::BadExceptionRange {
                    start,
                    end,
                    handler,
                },
            );
        }

        let catch_type = match catch_type {
            Some(class) => {
                let typ = RefType::Object(class.clone());
                match self
                    .context
                    .hierarchy
                    .is_throwable(&InferredType::Object(typ.clone()))
                {
                    Ok(true) => (),
                    Ok(false) => {
                        return self.report(
                            Some(handler_index),
                            DiagnosticKind::NotThrowable(class.clone()),
                        )
                    }
                    Err(kind) => {
                        return self.report(
                            Some(handler_index),
                            DiagnosticKind::BadOperands {
                                instruction: String::from("exception handler"),
                                kind,
                            },
                        )
                    }
                }
                typ
            }
            None => RefType::THROWABLE,
        };
        self.handlers.push(Handler {
            start: start_index,
            end: end_index,
            handler: handler_index,
            label: handler,
            catch_type,
        });
    }

    /// Check `frame` flows into the declared frame `expected`
    fn check_assignable(
        &mut self,
        index: usize,
        label: Option<Label>,
        frame: &Frame,
        expected: &Frame,
    ) -> bool {
        match frame.is_assignable_to(expected, self.context.hierarchy) {
            Ok(true) => true,
            Ok(false) => {
                self.report(
                    Some(index),
                    DiagnosticKind::IncompatibleFrame {
                        label,
                        found: frame.to_string(),
                        expected: expected.to_string(),
                    },
                );
                false
            }
            Err(kind) => {
                self.report(
                    Some(index),
                    DiagnosticKind::BadOperands {
                        instruction: String::from("stack map frame"),
                        kind,
                    },
                );
                false
            }
        }
    }

    fn within_limits(&mut self, index: usize, frame: &Frame) -> bool {
        let mut ok = true;
        if frame.max_stack() > self.code.max_stack as usize {
            self.report(
                Some(index),
                DiagnosticKind::MaxStackExceeded {
                    max_stack: self.code.max_stack,
                    depth: frame.max_stack(),
                },
            );
            ok = false;
        }
        if frame.max_locals() > self.code.max_locals as usize {
            self.report(
                Some(index),
                DiagnosticKind::MaxLocalsExceeded {
                    max_locals: self.code.max_locals,
                    needed: frame.max_locals(),
                },
            );
            ok = false;
        }
        ok
    }

    fn check_jump(&mut self, index: usize, target: Label, frame: &Frame) {
        let Some(position) = self.labels.get(&target).copied() else {
            return self.report(Some(index), DiagnosticKind::UnboundLabel(target));
        };
        if position >= self.instructions.len() {
            return self.report(Some(index), DiagnosticKind::JumpOutOfRange(target));
        }
        match self.declared.get(&position).cloned() {
            None => self.report(Some(index), DiagnosticKind::MissingFrame(target)),
            Some(expected) => {
                self.check_assignable(index, Some(target), frame, &expected);
            }
        }
    }

    fn check_handlers(&mut self, index: usize, frame: &Frame, reported: &mut HashSet<usize>) {
        for handler_index in 0..self.handlers.len() {
            let handler = &self.handlers[handler_index];
            if index < handler.start || index >= handler.end || reported.contains(&handler_index) {
                continue;
            }
            let (label, target) = (handler.label, handler.handler);
            let incoming = frame.handler_frame(handler.catch_type.clone());
            let ok = match self.declared.get(&target).cloned() {
                None => {
                    self.report(Some(index), DiagnosticKind::MissingFrame(label));
                    false
                }
                Some(expected) => self.check_assignable(index, Some(label), &incoming, &expected),
            };
            if !ok {
                reported.insert(handler_index);
            }
        }
    }

    fn check_switch(&mut self, index: usize, branch: &BranchInstruction<Label, Label, ()>) {
        match branch {
            BranchInstruction::TableSwitch { low, targets, .. } => {
                if targets.is_empty() {
                    self.report(
                        Some(index),
                        DiagnosticKind::MalformedSwitch(String::from("tableswitch has no cases")),
                    );
                } else if *low as i64 + targets.len() as i64 - 1 > i32::MAX as i64 {
                    self.report(
                        Some(index),
                        DiagnosticKind::MalformedSwitch(format!(
                            "tableswitch from {} with {} cases overflows",
                            low,
                            targets.len()
                        )),
                    );
                }
            }
            BranchInstruction::LookupSwitch { targets, .. } => {
                for pair in targets.windows(2) {
                    if pair[0].0 >= pair[1].0 {
                        self.report(
                            Some(index),
                            DiagnosticKind::MalformedSwitch(format!(
                                "lookupswitch keys {} and {} are not in ascending order",
                                pair[0].0, pair[1].0
                            )),
                        );
                        break;
                    }
                }
            }
            _ => (),
        }
    }

    fn walk(&mut self, entry: Frame) {
        // `None` after an unconditional jump, or while skipping ahead after an error
        let mut current = Some(entry);
        let mut skipping = false;
        let mut reported_handlers = HashSet::new();

        for index in 0..self.instructions.len() {
            let (element, anchor) = self.instructions[index];
            if let Some(declared) = self.declared.get(&index).cloned() {
                if let Some(frame) = &current {
                    self.check_assignable(index, None, frame, &declared);
                }
                skipping = !self.within_limits(index, &declared);
                current = if skipping { None } else { Some(declared) };
            }

            let Some(mut frame) = current.take() else {
                if !skipping {
                    self.report(Some(index), DiagnosticKind::UnreachableWithoutFrame);
                    skipping = true;
                }
                continue;
            };

            self.check_handlers(index, &frame, &mut reported_handlers);

            match element {
                CodeElement::Instruction(insn) => {
                    let site = (anchor.unwrap_or(Label::START), index);
                    if let Err(kind) = frame.execute(insn, site, self.context) {
                        let instruction = format!("{:?}", insn);
                        self.report(Some(index), DiagnosticKind::BadOperands { instruction, kind });
                        skipping = true;
                        continue;
                    }
                    if !self.within_limits(index, &frame) {
                        skipping = true;
                        continue;
                    }
                    current = Some(frame);
                }
                CodeElement::Branch(branch) => {
                    if matches!(
                        branch,
                        BranchInstruction::Jsr(..)
                            | BranchInstruction::JsrW(..)
                            | BranchInstruction::Ret(_)
                    ) {
                        self.report(Some(index), DiagnosticKind::Subroutine);
                        skipping = true;
                        continue;
                    }
                    self.check_switch(index, branch);
                    if let Err(kind) = frame.execute_branch(branch, self.context) {
                        let instruction = format!("{:?}", branch);
                        self.report(Some(index), DiagnosticKind::BadOperands { instruction, kind });
                        skipping = true;
                        continue;
                    }
                    for target in branch.jump_targets().targets() {
                        self.check_jump(index, *target, &frame);
                    }
                    if branch.fallthrough_target().is_some() {
                        current = Some(frame);
                    } else {
                        skipping = false;
                    }
                }
                _ => current = Some(frame),
            }
        }

        if current.is_some() {
            let end = self.instructions.len();
            self.report(Some(end), DiagnosticKind::FallsOffEnd);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::access_flags::ClassAccessFlags;
    use crate::builder::ClassBuilder;
    use crate::class_file::Version;
    use crate::code::{EqComparison, OrdComparison};
    use crate::descriptors::{FieldType, MethodDescriptor};
    use crate::model::MethodElement;
    use crate::names::{Name, UnqualifiedName};
    use crate::options::Options;
    use crate::verifier::ClassHierarchy;

    fn this() -> BinaryName {
        BinaryName::from_str("demo/Checked").unwrap()
    }

    fn method(
        name: &str,
        descriptor: MethodDescriptor,
        flags: MethodAccessFlags,
        code: Option<CodeModel>,
    ) -> ClassElement {
        let mut elements = vec![MethodElement::AccessFlags(flags)];
        elements.extend(code.map(|code| MethodElement::Code(code.into())));
        ClassElement::Method(MethodModel {
            name: UnqualifiedName::from_str(name).unwrap(),
            descriptor,
            elements,
        })
    }

    fn class(methods: Vec<ClassElement>) -> ClassModel {
        let mut elements = vec![
            ClassElement::Version(Version::JAVA8),
            ClassElement::AccessFlags(ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER),
            ClassElement::Superclass(Some(BinaryName::OBJECT)),
            ClassElement::Interfaces(vec![]),
        ];
        elements.extend(methods);
        ClassModel::new(this(), elements)
    }

    fn code(elements: Vec<CodeElement>, max_stack: u16, max_locals: u16) -> CodeModel {
        CodeModel {
            elements,
            max_stack,
            max_locals,
            label_count: 8,
        }
    }

    fn empty_frame() -> CodeElement {
        CodeElement::StackMap(DeclaredFrame {
            locals: vec![],
            stack: vec![],
        })
    }

    fn kinds(diagnostics: &[Diagnostic]) -> Vec<&DiagnosticKind> {
        diagnostics.iter().map(|diagnostic| &diagnostic.kind).collect()
    }

    #[test]
    fn built_classes_verify() {
        let mut builder = ClassBuilder::new(this(), Options::default());
        builder
            .with_method(
                UnqualifiedName::from_str("sign").unwrap(),
                MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::int())),
                MethodAccessFlags::STATIC,
                |method| {
                    method.with_code(|code| {
                        code.iload(0)?;
                        code.if_then_else(
                            crate::code::Condition::If(OrdComparison::LT),
                            |code| {
                                code.iconst(-1)?;
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
                },
            )
            .unwrap();
        let model = ClassModel::parse(&builder.build().unwrap(), &Options::default()).unwrap();
        let diagnostics = verify(&model, &ClassHierarchy::jdk());
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[test]
    fn members_are_checked() {
        let void = || MethodDescriptor::new(vec![], None);
        let body = || code(vec![CodeElement::Branch(BranchInstruction::Return)], 0, 0);
        let model = class(vec![
            method("a", void(), MethodAccessFlags::ABSTRACT, Some(body())),
            method("b", void(), MethodAccessFlags::STATIC, None),
            method("c", void(), MethodAccessFlags::STATIC, Some(body())),
            method("c", void(), MethodAccessFlags::STATIC, Some(body())),
        ]);
        let diagnostics = verify(&model, &ClassHierarchy::jdk());
        assert_eq!(
            kinds(&diagnostics),
            vec![
                &DiagnosticKind::UnexpectedCode,
                &DiagnosticKind::MissingCode,
                &DiagnosticKind::DuplicateMethod(String::from("c()V")),
            ]
        );
        assert_eq!(diagnostics[0].method.as_deref(), Some("a()V"));
    }

    #[test]
    fn limits_and_frames_are_checked() {
        let target = Label::START;
        let elements = vec![
            CodeElement::Instruction(Instruction::IConst0),
            CodeElement::Branch(BranchInstruction::If(OrdComparison::EQ, target, ())),
            CodeElement::Label(target),
            CodeElement::Instruction(Instruction::LConst1),
            CodeElement::Instruction(Instruction::Pop2),
            CodeElement::Branch(BranchInstruction::Return),
        ];
        let model = class(vec![method(
            "m",
            MethodDescriptor::new(vec![], None),
            MethodAccessFlags::STATIC,
            Some(code(elements, 1, 0)),
        )]);
        let diagnostics = verify(&model, &ClassHierarchy::jdk());
        assert_eq!(
            kinds(&diagnostics),
            vec![
                &DiagnosticKind::MissingFrame(target),
                &DiagnosticKind::MaxStackExceeded {
                    max_stack: 1,
                    depth: 2
                },
            ]
        );
        assert_eq!(diagnostics[1].instruction, Some(2));
    }

    #[test]
    fn checking_resumes_at_the_next_frame() {
        let elements = vec![
            CodeElement::Instruction(Instruction::FConst0),
            CodeElement::Instruction(Instruction::IStore(0)),
            CodeElement::Branch(BranchInstruction::Return),
            CodeElement::Label(Label::START),
            empty_frame(),
            CodeElement::Instruction(Instruction::AConstNull),
            CodeElement::Instruction(Instruction::IStore(0)),
            CodeElement::Branch(BranchInstruction::Return),
        ];
        let model = class(vec![method(
            "m",
            MethodDescriptor::new(vec![], None),
            MethodAccessFlags::STATIC,
            Some(code(elements, 1, 1)),
        )]);
        let diagnostics = verify(&model, &ClassHierarchy::jdk());
        let positions: Vec<Option<usize>> = diagnostics
            .iter()
            .map(|diagnostic| diagnostic.instruction)
            .collect();
        assert_eq!(positions, vec![Some(1), Some(4)], "{:?}", diagnostics);
        assert!(diagnostics
            .iter()
            .all(|diagnostic| matches!(diagnostic.kind, DiagnosticKind::BadOperands { .. })));
    }

    #[test]
    fn switches_and_handlers_are_checked() {
        let (case, handler, end) = (Label::START, Label::START.next(), Label::START.next().next());
        let elements = vec![
            CodeElement::ExceptionCatch {
                start: end,
                end,
                handler,
                catch_type: None,
            },
            CodeElement::Instruction(Instruction::IConst0),
            CodeElement::Branch(BranchInstruction::LookupSwitch {
                padding: 0,
                default: case,
                targets: vec![(5, case), (1, case)],
            }),
            CodeElement::Label(case),
            empty_frame(),
            CodeElement::Instruction(Instruction::AConstNull),
            CodeElement::Branch(BranchInstruction::IfNull(EqComparison::EQ, handler, ())),
            CodeElement::Label(handler),
            empty_frame(),
            CodeElement::Branch(BranchInstruction::Return),
            CodeElement::Label(end),
        ];
        let model = class(vec![method(
            "m",
            MethodDescriptor::new(vec![], None),
            MethodAccessFlags::STATIC,
            Some(code(elements, 1, 0)),
        )]);
        let diagnostics = verify(&model, &ClassHierarchy::jdk());
        assert_eq!(diagnostics.len(), 2, "{:?}", diagnostics);
        assert!(matches!(
            diagnostics[0].kind,
            DiagnosticKind::BadExceptionRange { .. }
        ));
        assert!(matches!(
            diagnostics[1].kind,
            DiagnosticKind::MalformedSwitch(_)
        ));
    }

    #[test]
    fn falling_off_the_end() {
        let elements = vec![CodeElement::Instruction(Instruction::Nop)];
        let model = class(vec![method(
            "m",
            MethodDescriptor::new(vec![], None),
            MethodAccessFlags::STATIC,
            Some(code(elements, 0, 0)),
        )]);
        let diagnostics = verify(&model, &ClassHierarchy::jdk());
        assert_eq!(kinds(&diagnostics), vec![&DiagnosticKind::FallsOffEnd]);
    }

    #[test]
    fn old_classes_use_inference() {
        let elements = vec![
            CodeElement::Instruction(Instruction::IConst1),
            CodeElement::Instruction(Instruction::IConst1),
            CodeElement::Instruction(Instruction::IAdd),
            CodeElement::Branch(BranchInstruction::IReturn),
        ];
        let model = class(vec![method(
            "two",
            MethodDescriptor::new(vec![], Some(FieldType::int())),
            MethodAccessFlags::STATIC,
            Some(code(elements, 1, 0)),
        )]);
        let mut elements = model.into_elements();
        elements[0] = ClassElement::Version(Version::JAVA5);
        let model = ClassModel::new(this(), elements);

        let diagnostics = verify(&model, &ClassHierarchy::jdk());
        assert_eq!(
            kinds(&diagnostics),
            vec![&DiagnosticKind::MaxStackExceeded {
                max_stack: 1,
                depth: 2
            }]
        );
    }
}
