use crate::code::{
    BranchInstruction, CodeElement, CodeModel, EqComparison, Instruction, InvokeType, Label,
    LabelGenerator, LabelSequence, OrdComparison, SymbolicInstruction,
};
use crate::constant_pool::{FieldRef, InvokeDynamic, LoadableConstant, MethodRef};
use crate::descriptors::{BaseType, FieldType, MethodDescriptor, RefType};
use crate::errors::Error;
use crate::names::{BinaryName, UnqualifiedName};
use crate::transform::{ElementSink, Pipeline, Stages};
use crate::util::Width;
use std::collections::{BTreeMap, HashSet};

/// Builds up a method body as a stream of [`CodeElement`]s
///
/// Every element goes through [`ElementSink::with`], so the builder can have a transform
/// [`Pipeline`] in front of it. The typed methods (`iload`, `bipush`, `invoke_interface`, ...)
/// check their operands before emitting anything, and the structured helpers (`block`,
/// `if_then_else`, `while_loop`, `trying`, `switch`) create and bind the labels they need.
///
/// Frames, `max_stack`, `max_locals`, and jump offsets are only computed when the code is
/// [assembled](crate::code::assemble_code).
///
/// ### Locals
///
/// [`CodeBuilder::allocate_local`] hands out slots after the parameters (or after the locals of
/// the code being transformed). Slots allocated inside a structured helper are given back when the
/// helper returns.
pub struct CodeBuilder {
    elements: Vec<CodeElement>,
    labels: LabelSequence,

    /// Labels already bound
    bound: HashSet<Label>,

    /// Labels that are jump targets of stored branches
    jumped_to: HashSet<Label>,

    /// Can the next element be reached by falling through?
    reachable: bool,

    /// Instructions (including branches) stored so far
    instruction_count: usize,

    /// Slots below this are the receiver and parameters
    parameter_slots: u16,

    is_static: bool,

    /// Slot of each declared parameter
    parameter_offsets: Vec<u16>,

    /// Label bound before everything else, once asked for
    start: Option<Label>,

    /// Label bound after everything else, once asked for
    end: Option<Label>,

    next_local: u16,
    max_locals: u16,

    stages: Stages<CodeBuilder, CodeElement>,
}

impl CodeBuilder {
    /// Builder for a fresh method body
    pub fn new(descriptor: &MethodDescriptor, is_static: bool) -> CodeBuilder {
        let parameter_slots = descriptor.parameter_length(!is_static) as u16;
        let mut parameter_offsets = vec![];
        let mut offset = if is_static { 0 } else { 1 };
        for parameter in &descriptor.parameters {
            parameter_offsets.push(offset);
            offset += parameter.width() as u16;
        }
        CodeBuilder {
            elements: vec![],
            labels: LabelSequence::new(Label::START),
            bound: HashSet::new(),
            jumped_to: HashSet::new(),
            reachable: true,
            instruction_count: 0,
            parameter_slots,
            is_static,
            parameter_offsets,
            start: None,
            end: None,
            next_local: parameter_slots,
            max_locals: parameter_slots,
            stages: Stages::default(),
        }
    }

    /// Builder for a rewritten version of existing code
    ///
    /// New labels and locals don't clash with the ones used in `code`.
    pub fn for_model(code: &CodeModel, descriptor: &MethodDescriptor, is_static: bool) -> CodeBuilder {
        let mut builder = CodeBuilder::new(descriptor, is_static);
        builder.labels = code.label_generator();
        builder.next_local = builder.next_local.max(code.max_locals);
        builder.max_locals = builder.next_local;
        builder
    }

    /// Install transforms in front of the builder
    pub fn with_pipeline(mut self, pipeline: Pipeline<CodeBuilder, CodeElement>) -> CodeBuilder {
        self.stages = Stages::new(pipeline);
        self
    }

    /// Check that every label is bound and produce the code model
    pub fn finish(mut self) -> Result<CodeModel, Error> {
        if let Some(end) = self.end {
            if !self.bound.contains(&end) {
                self.store(CodeElement::Label(end))?;
            }
        }
        for element in &self.elements {
            for label in element.labels() {
                if !self.bound.contains(&label) {
                    return Err(Error::UnboundLabel(label));
                }
            }
        }
        Ok(CodeModel {
            elements: self.elements,
            max_stack: 0,
            max_locals: self.max_locals,
            label_count: self.labels.count(),
        })
    }

    /// Elements stored so far
    pub fn elements(&self) -> &[CodeElement] {
        &self.elements
    }

    /// Allocate a label, to be bound later with [`CodeBuilder::bind`]
    pub fn new_label(&mut self) -> Label {
        self.labels.fresh_label()
    }

    /// Bind a label to the current position (this can only happen once per label)
    pub fn bind(&mut self, label: Label) -> Result<&mut CodeBuilder, Error> {
        self.with(CodeElement::Label(label))
    }

    /// Label bound at the very start of the body
    pub fn start_label(&mut self) -> Label {
        if let Some(start) = self.start {
            return start;
        }
        let start = self.labels.fresh_label();
        self.elements.insert(0, CodeElement::Label(start));
        self.bound.insert(start);
        self.start = Some(start);
        start
    }

    /// Label bound at the very end of the body, when the code is finished
    pub fn end_label(&mut self) -> Label {
        if let Some(end) = self.end {
            return end;
        }
        let end = self.labels.fresh_label();
        self.end = Some(end);
        end
    }

    /// Slot holding `this`
    pub fn receiver_slot(&self) -> Result<u16, Error> {
        if self.is_static {
            return Err(Error::NoReceiver);
        }
        Ok(0)
    }

    /// Slot holding the parameter at `index` (counting from 0, receiver excluded)
    pub fn parameter_slot(&self, index: usize) -> Result<u16, Error> {
        self.parameter_offsets
            .get(index)
            .copied()
            .ok_or(Error::NoSuchParameter(index))
    }

    /// Whether the next element is reachable by falling through from the previous one
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// Number of local slots used by the receiver and parameters
    pub fn parameter_slots(&self) -> u16 {
        self.parameter_slots
    }

    /// Allocate a fresh local variable slot for a value of the given type
    pub fn allocate_local(&mut self, typ: &FieldType) -> Result<u16, Error> {
        let slot = self.next_local;
        let next = slot as usize + typ.width();
        if next > u16::MAX as usize {
            return Err(Error::OperandOutOfRange {
                instruction: "local variable",
                value: next as i64,
            });
        }
        self.next_local = next as u16;
        self.max_locals = self.max_locals.max(self.next_local);
        Ok(slot)
    }

    /// Run `body`, releasing any locals it allocates afterwards
    pub fn scoped<R>(
        &mut self,
        body: impl FnOnce(&mut CodeBuilder) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let next_local = self.next_local;
        let result = body(self);
        self.next_local = next_local;
        result
    }

    pub fn instruction(&mut self, insn: SymbolicInstruction) -> Result<&mut CodeBuilder, Error> {
        self.with(CodeElement::Instruction(insn))
    }

    pub fn branch(
        &mut self,
        branch: BranchInstruction<Label, Label, ()>,
    ) -> Result<&mut CodeBuilder, Error> {
        self.with(CodeElement::Branch(branch))
    }

    pub fn line_number(&mut self, line: u16) -> Result<&mut CodeBuilder, Error> {
        self.with(CodeElement::LineNumber(line))
    }

    pub fn local_variable(
        &mut self,
        slot: u16,
        name: UnqualifiedName,
        descriptor: FieldType,
        start: Label,
        end: Label,
    ) -> Result<&mut CodeBuilder, Error> {
        self.with(CodeElement::LocalVariable {
            slot,
            name,
            descriptor,
            start,
            end,
        })
    }

    pub fn exception_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<BinaryName>,
    ) -> Result<&mut CodeBuilder, Error> {
        self.with(CodeElement::ExceptionCatch {
            start,
            end,
            handler,
            catch_type,
        })
    }

    // Constants

    /// Push an `int` using the shortest encoding
    pub fn iconst(&mut self, value: i32) -> Result<&mut CodeBuilder, Error> {
        let insn = match value {
            -1 => Instruction::IConstM1,
            0 => Instruction::IConst0,
            1 => Instruction::IConst1,
            2 => Instruction::IConst2,
            3 => Instruction::IConst3,
            4 => Instruction::IConst4,
            5 => Instruction::IConst5,
            _ => {
                if let Ok(byte) = i8::try_from(value) {
                    Instruction::BiPush(byte)
                } else if let Ok(short) = i16::try_from(value) {
                    Instruction::SiPush(short)
                } else {
                    Instruction::Ldc(LoadableConstant::Integer(value))
                }
            }
        };
        self.instruction(insn)
    }

    pub fn lconst(&mut self, value: i64) -> Result<&mut CodeBuilder, Error> {
        let insn = match value {
            0 => Instruction::LConst0,
            1 => Instruction::LConst1,
            _ => Instruction::Ldc2(LoadableConstant::Long(value)),
        };
        self.instruction(insn)
    }

    /// `ldc`, `ldc_w`, or `ldc2_w` depending on the constant
    pub fn ldc(&mut self, constant: LoadableConstant) -> Result<&mut CodeBuilder, Error> {
        if constant.is_wide() {
            self.instruction(Instruction::Ldc2(constant))
        } else {
            self.instruction(Instruction::Ldc(constant))
        }
    }

    pub fn bipush(&mut self, value: i32) -> Result<&mut CodeBuilder, Error> {
        let byte = i8::try_from(value).map_err(|_| Error::OperandOutOfRange {
            instruction: "bipush",
            value: value as i64,
        })?;
        self.instruction(Instruction::BiPush(byte))
    }

    pub fn sipush(&mut self, value: i32) -> Result<&mut CodeBuilder, Error> {
        let short = i16::try_from(value).map_err(|_| Error::OperandOutOfRange {
            instruction: "sipush",
            value: value as i64,
        })?;
        self.instruction(Instruction::SiPush(short))
    }

    // Locals

    fn local_slot(instruction: &'static str, slot: usize) -> Result<u16, Error> {
        u16::try_from(slot).map_err(|_| Error::OperandOutOfRange {
            instruction,
            value: slot as i64,
        })
    }

    pub fn iload(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("iload", slot)?;
        self.instruction(Instruction::ILoad(slot))
    }

    pub fn lload(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("lload", slot)?;
        self.instruction(Instruction::LLoad(slot))
    }

    pub fn fload(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("fload", slot)?;
        self.instruction(Instruction::FLoad(slot))
    }

    pub fn dload(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("dload", slot)?;
        self.instruction(Instruction::DLoad(slot))
    }

    pub fn aload(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("aload", slot)?;
        self.instruction(Instruction::ALoad(slot))
    }

    pub fn istore(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("istore", slot)?;
        self.instruction(Instruction::IStore(slot))
    }

    pub fn lstore(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("lstore", slot)?;
        self.instruction(Instruction::LStore(slot))
    }

    pub fn fstore(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("fstore", slot)?;
        self.instruction(Instruction::FStore(slot))
    }

    pub fn dstore(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("dstore", slot)?;
        self.instruction(Instruction::DStore(slot))
    }

    pub fn astore(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("astore", slot)?;
        self.instruction(Instruction::AStore(slot))
    }

    /// Load a local of any type
    pub fn load_local(&mut self, typ: &FieldType, slot: usize) -> Result<&mut CodeBuilder, Error> {
        match typ {
            FieldType::Ref(_) => self.aload(slot),
            FieldType::Base(BaseType::Long) => self.lload(slot),
            FieldType::Base(BaseType::Float) => self.fload(slot),
            FieldType::Base(BaseType::Double) => self.dload(slot),
            FieldType::Base(_) => self.iload(slot),
        }
    }

    /// Store a local of any type
    pub fn store_local(&mut self, typ: &FieldType, slot: usize) -> Result<&mut CodeBuilder, Error> {
        match typ {
            FieldType::Ref(_) => self.astore(slot),
            FieldType::Base(BaseType::Long) => self.lstore(slot),
            FieldType::Base(BaseType::Float) => self.fstore(slot),
            FieldType::Base(BaseType::Double) => self.dstore(slot),
            FieldType::Base(_) => self.istore(slot),
        }
    }

    pub fn iinc(&mut self, slot: usize, by: i32) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("iinc", slot)?;
        let by = i16::try_from(by).map_err(|_| Error::OperandOutOfRange {
            instruction: "iinc",
            value: by as i64,
        })?;
        self.instruction(Instruction::IInc(slot, by))
    }

    /// Return from a subroutine (modeled, but code using it can't be assembled)
    pub fn ret(&mut self, slot: usize) -> Result<&mut CodeBuilder, Error> {
        let slot = Self::local_slot("ret", slot)?;
        self.branch(BranchInstruction::Ret(slot))
    }

    // Objects, fields, and methods

    pub fn new_object(&mut self, class: BinaryName) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::New(RefType::Object(class)))
    }

    pub fn checkcast(&mut self, typ: RefType) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::CheckCast(typ))
    }

    pub fn instance_of(&mut self, typ: RefType) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::InstanceOf(typ))
    }

    pub fn multianewarray(&mut self, typ: RefType, dimensions: i32) -> Result<&mut CodeBuilder, Error> {
        let dims = u8::try_from(dimensions)
            .ok()
            .filter(|dims| *dims >= 1)
            .ok_or(Error::OperandOutOfRange {
                instruction: "multianewarray",
                value: dimensions as i64,
            })?;
        self.instruction(Instruction::MultiANewArray(typ, dims))
    }

    pub fn getstatic(&mut self, field: FieldRef) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::GetStatic(field))
    }

    pub fn putstatic(&mut self, field: FieldRef) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::PutStatic(field))
    }

    pub fn getfield(&mut self, field: FieldRef) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::GetField(field))
    }

    pub fn putfield(&mut self, field: FieldRef) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::PutField(field))
    }

    pub fn invoke_virtual(&mut self, method: MethodRef) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::Invoke(InvokeType::Virtual, method))
    }

    pub fn invoke_special(&mut self, method: MethodRef) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::Invoke(InvokeType::Special, method))
    }

    pub fn invoke_static(&mut self, method: MethodRef) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::Invoke(InvokeType::Static, method))
    }

    /// `invokeinterface`, with the argument count computed from the descriptor
    pub fn invoke_interface(&mut self, method: MethodRef) -> Result<&mut CodeBuilder, Error> {
        let count = method.descriptor.parameter_length(true);
        let count = u8::try_from(count).map_err(|_| Error::OperandOutOfRange {
            instruction: "invokeinterface",
            value: count as i64,
        })?;
        self.instruction(Instruction::Invoke(InvokeType::Interface(count), method))
    }

    pub fn invoke_dynamic(&mut self, call_site: InvokeDynamic) -> Result<&mut CodeBuilder, Error> {
        self.instruction(Instruction::InvokeDynamic(call_site))
    }

    // Branches

    pub fn goto(&mut self, label: Label) -> Result<&mut CodeBuilder, Error> {
        self.branch(BranchInstruction::Goto(label))
    }

    pub fn athrow(&mut self) -> Result<&mut CodeBuilder, Error> {
        self.branch(BranchInstruction::AThrow)
    }

    /// Return a value of the given type (`None` for `void`)
    pub fn return_value(&mut self, typ: Option<&FieldType>) -> Result<&mut CodeBuilder, Error> {
        let branch = match typ {
            None => BranchInstruction::Return,
            Some(FieldType::Ref(_)) => BranchInstruction::AReturn,
            Some(FieldType::Base(BaseType::Long)) => BranchInstruction::LReturn,
            Some(FieldType::Base(BaseType::Float)) => BranchInstruction::FReturn,
            Some(FieldType::Base(BaseType::Double)) => BranchInstruction::DReturn,
            Some(FieldType::Base(_)) => BranchInstruction::IReturn,
        };
        self.branch(branch)
    }

    /// Jump to `label` if `condition` holds
    pub fn branch_if(&mut self, condition: Condition, label: Label) -> Result<&mut CodeBuilder, Error> {
        self.branch(condition.jump_to(label))
    }

    /// Bind a label generated by a helper, unless nothing can reach it
    fn bind_if_reachable(&mut self, label: Label) -> Result<(), Error> {
        if self.reachable || self.jumped_to.contains(&label) {
            self.bind(label)?;
        }
        Ok(())
    }

    // Structured control flow

    /// Run `body` with a label bound right after it (for breaking out early)
    pub fn block(
        &mut self,
        body: impl FnOnce(&mut CodeBuilder, Label) -> Result<(), Error>,
    ) -> Result<&mut CodeBuilder, Error> {
        let break_label = self.new_label();
        self.scoped(|cb| body(cb, break_label))?;
        self.bind_if_reachable(break_label)?;
        Ok(self)
    }

    /// Run `then` only if `condition` holds
    pub fn if_then(
        &mut self,
        condition: Condition,
        then: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<&mut CodeBuilder, Error> {
        let end = self.new_label();
        self.branch_if(!condition, end)?;
        self.scoped(then)?;
        self.bind_if_reachable(end)?;
        Ok(self)
    }

    pub fn if_then_else(
        &mut self,
        condition: Condition,
        then: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
        otherwise: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<&mut CodeBuilder, Error> {
        let else_label = self.new_label();
        let end = self.new_label();
        self.branch_if(!condition, else_label)?;
        self.scoped(then)?;
        if self.reachable {
            self.goto(end)?;
        }
        self.bind(else_label)?;
        self.scoped(otherwise)?;
        self.bind_if_reachable(end)?;
        Ok(self)
    }

    /// Loop for as long as the condition computed by `condition` holds
    ///
    /// `body` receives the labels for `break` and `continue`.
    pub fn while_loop(
        &mut self,
        condition: impl FnOnce(&mut CodeBuilder) -> Result<Condition, Error>,
        body: impl FnOnce(&mut CodeBuilder, Label, Label) -> Result<(), Error>,
    ) -> Result<&mut CodeBuilder, Error> {
        let head = self.new_label();
        let end = self.new_label();
        self.bind(head)?;
        let condition = condition(self)?;
        self.branch_if(!condition, end)?;
        self.scoped(|cb| body(cb, end, head))?;
        if self.reachable {
            self.goto(head)?;
        }
        self.bind(end)?;
        Ok(self)
    }

    /// Protected region followed by its handlers
    ///
    /// Handlers are registered in `handlers` in priority order, and each one starts with the
    /// caught exception on the stack. Control reaching the end of the protected region or of any
    /// handler continues after the whole construct.
    pub fn trying(
        &mut self,
        body: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
        handlers: impl FnOnce(&mut CatchBuilder) -> Result<(), Error>,
    ) -> Result<&mut CodeBuilder, Error> {
        let start = self.new_label();
        let end = self.new_label();
        let after = self.new_label();

        self.bind(start)?;
        let before = self.instruction_count;
        self.scoped(body)?;
        if self.instruction_count == before {
            return Err(Error::EmptyTryBlock);
        }
        // `end` only delimits the protected range, nothing jumps to it
        let body_reachable = self.reachable;
        self.bind(end)?;
        self.reachable = body_reachable;
        if body_reachable {
            self.goto(after)?;
        }

        let mut catches = CatchBuilder {
            builder: &mut *self,
            start,
            end,
            after,
            caught: HashSet::new(),
        };
        handlers(&mut catches)?;
        self.bind_if_reachable(after)?;
        Ok(self)
    }

    /// Switch on the `int` on top of the stack
    ///
    /// Cases are laid out in the order they are added and fall through into each other. Without
    /// a default case, unmatched values skip the whole switch.
    pub fn switch<'a>(
        &mut self,
        cases: impl FnOnce(&mut SwitchBuilder<'a>) -> Result<(), Error>,
    ) -> Result<&mut CodeBuilder, Error> {
        let mut switch = SwitchBuilder {
            cases: vec![],
            values: BTreeMap::new(),
            has_default: false,
        };
        cases(&mut switch)?;

        let break_label = self.new_label();
        let case_labels: Vec<Label> = switch.cases.iter().map(|_| self.new_label()).collect();
        let mut default = break_label;
        for ((value, _), label) in switch.cases.iter().zip(&case_labels) {
            if value.is_none() {
                default = *label;
            }
        }
        let targets: BTreeMap<i32, Label> = switch
            .values
            .iter()
            .map(|(value, index)| (*value, case_labels[*index]))
            .collect();
        self.branch(switch_instruction(&targets, default))?;

        for ((_, body), label) in switch.cases.into_iter().zip(case_labels) {
            self.bind(label)?;
            self.scoped(|cb| body(cb, break_label))?;
        }
        self.bind_if_reachable(break_label)?;
        Ok(self)
    }
}

/// Pick `tableswitch` when the cases are dense enough, `lookupswitch` otherwise
///
/// Each form is charged its size plus three times its expected running time.
fn switch_instruction(
    targets: &BTreeMap<i32, Label>,
    default: Label,
) -> BranchInstruction<Label, Label, ()> {
    if let (Some((&low, _)), Some((&high, _))) =
        (targets.first_key_value(), targets.last_key_value())
    {
        let count = targets.len() as i64;
        let table_cost = 4 + (high as i64 - low as i64 + 1) + 3 * 3;
        let lookup_cost = 3 + 2 * count + 3 * count;
        if table_cost <= lookup_cost {
            let table = (low..=high)
                .map(|value| targets.get(&value).copied().unwrap_or(default))
                .collect();
            return BranchInstruction::TableSwitch {
                padding: 0,
                default,
                low,
                targets: table,
            };
        }
    }
    BranchInstruction::LookupSwitch {
        padding: 0,
        default,
        targets: targets.iter().map(|(value, label)| (*value, *label)).collect(),
    }
}

impl ElementSink<CodeElement> for CodeBuilder {
    fn store(&mut self, element: CodeElement) -> Result<(), Error> {
        match &element {
            CodeElement::Label(label) => {
                if !self.bound.insert(*label) {
                    return Err(Error::DuplicateLabel(*label));
                }
                self.reachable = true;
            }
            CodeElement::Instruction(insn) => {
                if let Some((slot, width)) = insn.local_slot() {
                    let end = (slot as usize + width).min(u16::MAX as usize) as u16;
                    self.max_locals = self.max_locals.max(end);
                }
                self.instruction_count += 1;
            }
            CodeElement::Branch(branch) => {
                self.jumped_to
                    .extend(branch.jump_targets().targets().iter().copied());
                if !matches!(branch, BranchInstruction::FallThrough(())) {
                    self.instruction_count += 1;
                }
                self.reachable = branch.fallthrough_target().is_some();
            }
            _ => (),
        }
        self.elements.push(element);
        Ok(())
    }

    fn stages(&mut self) -> &mut Stages<CodeBuilder, CodeElement> {
        &mut self.stages
    }
}

/// Condition under which a structured helper runs its body
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Compare the `int` on the stack against zero
    If(OrdComparison),

    /// Compare the two `int`s on the stack
    IfICmp(OrdComparison),

    /// Compare the two references on the stack
    IfACmp(EqComparison),

    /// Compare the reference on the stack against `null`
    IfNull(EqComparison),
}

impl Condition {
    /// Branch taken when the condition holds
    pub fn jump_to(self, label: Label) -> BranchInstruction<Label, Label, ()> {
        match self {
            Condition::If(comparison) => BranchInstruction::If(comparison, label, ()),
            Condition::IfICmp(comparison) => BranchInstruction::IfICmp(comparison, label, ()),
            Condition::IfACmp(comparison) => BranchInstruction::IfACmp(comparison, label, ()),
            Condition::IfNull(comparison) => BranchInstruction::IfNull(comparison, label, ()),
        }
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        match self {
            Condition::If(comparison) => Condition::If(!comparison),
            Condition::IfICmp(comparison) => Condition::IfICmp(!comparison),
            Condition::IfACmp(comparison) => Condition::IfACmp(!comparison),
            Condition::IfNull(comparison) => Condition::IfNull(!comparison),
        }
    }
}

/// Registers the handlers of [`CodeBuilder::trying`]
pub struct CatchBuilder<'b> {
    builder: &'b mut CodeBuilder,
    start: Label,
    end: Label,
    after: Label,

    /// `None` is the catch-all handler
    caught: HashSet<Option<BinaryName>>,
}

impl<'b> CatchBuilder<'b> {
    pub fn catching(
        &mut self,
        class: BinaryName,
        handler: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<&mut Self, Error> {
        self.catching_multi(vec![class], handler)
    }

    /// One handler for several exception classes
    pub fn catching_multi(
        &mut self,
        classes: Vec<BinaryName>,
        handler: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<&mut Self, Error> {
        let classes = classes.into_iter().map(Some).collect();
        self.add_handler(classes, handler)
    }

    /// Handler for any `Throwable` (what `finally` compiles to)
    pub fn catching_all(
        &mut self,
        handler: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<&mut Self, Error> {
        self.add_handler(vec![None], handler)
    }

    fn add_handler(
        &mut self,
        catch_types: Vec<Option<BinaryName>>,
        handler: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<&mut Self, Error> {
        for catch_type in &catch_types {
            if !self.caught.insert(catch_type.clone()) {
                return Err(Error::DuplicateCatch(catch_type.clone()));
            }
        }

        let builder = &mut *self.builder;
        let handler_label = builder.new_label();
        for catch_type in catch_types {
            builder.exception_catch(self.start, self.end, handler_label, catch_type)?;
        }
        builder.bind(handler_label)?;
        builder.scoped(handler)?;
        if builder.reachable {
            builder.goto(self.after)?;
        }
        Ok(self)
    }
}

type CaseBody<'a> = Box<dyn FnOnce(&mut CodeBuilder, Label) -> Result<(), Error> + 'a>;

/// Collects the cases of [`CodeBuilder::switch`]
///
/// Case bodies receive the label that breaks out of the switch.
pub struct SwitchBuilder<'a> {
    /// `None` is the default case
    cases: Vec<(Option<i32>, CaseBody<'a>)>,

    /// Index in `cases` of each value
    values: BTreeMap<i32, usize>,

    has_default: bool,
}

impl<'a> SwitchBuilder<'a> {
    pub fn case(
        &mut self,
        value: i32,
        body: impl FnOnce(&mut CodeBuilder, Label) -> Result<(), Error> + 'a,
    ) -> Result<&mut Self, Error> {
        if self.values.insert(value, self.cases.len()).is_some() {
            return Err(Error::DuplicateSwitchCase(value));
        }
        self.cases.push((Some(value), Box::new(body)));
        Ok(self)
    }

    pub fn default(
        &mut self,
        body: impl FnOnce(&mut CodeBuilder, Label) -> Result<(), Error> + 'a,
    ) -> Result<&mut Self, Error> {
        if self.has_default {
            return Err(Error::DuplicateSwitchDefault);
        }
        self.has_default = true;
        self.cases.push((None, Box::new(body)));
        Ok(self)
    }
}
