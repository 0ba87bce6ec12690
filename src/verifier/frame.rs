use crate::class_file::{RawVerificationType, StackMapFrame};
use crate::code::{BranchInstruction, Instruction, InvokeType, Label, SymbolicInstruction};
use crate::descriptors::{BaseType, FieldType, MethodDescriptor, RefType};
use crate::errors::VerifierErrorKind;
use crate::names::BinaryName;
use crate::util::{OffsetVec, Width};
use crate::verifier::{Hierarchy, InferredType, UninitializedSite, VerificationType};
use std::fmt;

/// Snapshot of the stack and local variables at a point in the bytecode
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame {
    /// One entry per local variable slot: `long` and `double` locals are followed by `Top`
    pub locals: Vec<InferredType>,

    /// Types of values on the stack
    pub stack: OffsetVec<InferredType>,
}

/// What a frame needs to know about the method it is in
pub struct MethodContext<'a, 'h> {
    pub hierarchy: &'a Hierarchy<'h>,
    pub this_class: &'a BinaryName,
    pub return_type: Option<&'a FieldType>,
}

impl Frame {
    /// Frame on entry to a method
    pub fn entry(
        this_class: &BinaryName,
        is_static: bool,
        is_constructor: bool,
        descriptor: &MethodDescriptor,
    ) -> Frame {
        let mut locals = vec![];
        if !is_static {
            if is_constructor && this_class != &BinaryName::OBJECT {
                locals.push(InferredType::UninitializedThis);
            } else {
                locals.push(InferredType::Object(RefType::Object(this_class.clone())));
            }
        }
        for parameter in &descriptor.parameters {
            let typ = InferredType::from(parameter);
            let width = typ.width();
            locals.push(typ);
            if width == 2 {
                locals.push(InferredType::Top);
            }
        }
        Frame {
            locals,
            stack: OffsetVec::new(),
        }
    }

    /// Rebuild a frame from stack map entries (where `long` and `double` locals take one entry)
    pub fn from_entries(locals: Vec<InferredType>, stack: Vec<InferredType>) -> Frame {
        let mut slots = vec![];
        for local in locals {
            let width = local.width();
            slots.push(local);
            if width == 2 {
                slots.push(InferredType::Top);
            }
        }
        Frame {
            locals: slots,
            stack: stack.into_iter().collect(),
        }
    }

    /// Locals in stack map entry form, with trailing `Top`s trimmed
    pub fn local_entries(&self) -> Vec<InferredType> {
        let mut entries = vec![];
        let mut slot = 0;
        while slot < self.locals.len() {
            let local = &self.locals[slot];
            entries.push(local.clone());
            slot += local.width();
        }
        while entries.last() == Some(&InferredType::Top) {
            entries.pop();
        }
        entries
    }

    pub fn stack_entries(&self) -> Vec<InferredType> {
        self.stack.values().cloned().collect()
    }

    /// Frame at the start of an exception handler catching `catch_type` in a region where the
    /// locals are those of this frame
    pub fn handler_frame(&self, catch_type: RefType) -> Frame {
        let mut stack = OffsetVec::new();
        stack.push(InferredType::Object(catch_type));
        Frame {
            locals: self.locals.clone(),
            stack,
        }
    }

    pub fn max_locals(&self) -> usize {
        self.locals.len()
    }

    pub fn max_stack(&self) -> usize {
        self.stack.offset_len().0
    }

    /// Combine two frames reaching the same point
    ///
    /// Locals that don't agree become `Top`. Returns `None` if the stacks can't be reconciled.
    pub fn merge(
        &self,
        other: &Frame,
        hierarchy: &Hierarchy,
    ) -> Result<Option<Frame>, VerifierErrorKind> {
        if self.stack.len() != other.stack.len() {
            return Ok(None);
        }
        let mut stack = OffsetVec::new();
        for (type1, type2) in self.stack.values().zip(other.stack.values()) {
            match hierarchy.merge(type1, type2)? {
                Some(merged) => {
                    stack.push(merged);
                }
                None => return Ok(None),
            }
        }

        let mut locals = Vec::with_capacity(self.locals.len().min(other.locals.len()));
        for (type1, type2) in self.locals.iter().zip(other.locals.iter()) {
            let merged = hierarchy.merge(type1, type2)?.unwrap_or(InferredType::Top);
            locals.push(merged);
        }
        kill_split_wide_locals(&mut locals);

        Ok(Some(Frame { locals, stack }))
    }

    /// Can this frame flow into a point where `declared` is expected?
    pub fn is_assignable_to(
        &self,
        declared: &Frame,
        hierarchy: &Hierarchy,
    ) -> Result<bool, VerifierErrorKind> {
        if self.stack.len() != declared.stack.len() {
            return Ok(false);
        }
        for (actual, expected) in self.stack.values().zip(declared.stack.values()) {
            if !hierarchy.is_assignable(actual, expected)? {
                return Ok(false);
            }
        }
        for (slot, expected) in declared.locals.iter().enumerate() {
            let actual = self.locals.get(slot).unwrap_or(&InferredType::Top);
            if !hierarchy.is_assignable(actual, expected)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Update the frame to reflect the effects of a straight-line instruction
    ///
    /// `site` locates the instruction, so that `new` can tag the value it pushes.
    pub fn execute(
        &mut self,
        insn: &SymbolicInstruction,
        site: (Label, usize),
        context: &MethodContext,
    ) -> Result<(), VerifierErrorKind> {
        execute_instruction(self, insn, site, context)
    }

    /// Update the frame to reflect the effects of a block-ending instruction, before its jumps
    pub fn execute_branch<Lbl, LblWide, LblNext>(
        &mut self,
        insn: &BranchInstruction<Lbl, LblWide, LblNext>,
        context: &MethodContext,
    ) -> Result<(), VerifierErrorKind> {
        execute_branch_instruction(self, insn, context)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("locals [")?;
        for (i, local) in self.local_entries().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", local)?;
        }
        f.write_str("] stack [")?;
        for (i, typ) in self.stack.values().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", typ)?;
        }
        f.write_str("]")
    }
}

/// After a merge, a `long` whose second half was lost is unusable
fn kill_split_wide_locals(locals: &mut [InferredType]) {
    let mut slot = 0;
    while slot < locals.len() {
        if locals[slot].width() == 2 && locals.get(slot + 1) != Some(&InferredType::Top) {
            locals[slot] = InferredType::Top;
        }
        slot += locals[slot].width();
    }
}

/// Locals and stack laid out the way a `StackMapTable` entry lists them
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FrameEntries<T> {
    pub locals: Vec<T>,
    pub stack: Vec<T>,
}

impl<T> Default for FrameEntries<T> {
    fn default() -> Self {
        FrameEntries {
            locals: vec![],
            stack: vec![],
        }
    }
}

impl FrameEntries<RawVerificationType> {
    /// Most compact stack map frame describing this frame, given the previous one
    ///
    /// Falls back to [`Self::full_stack_map_frame`] when no compressed form fits.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        let same_locals = self.locals == previous_frame.locals;
        match self.stack.as_slice() {
            [] if same_locals => StackMapFrame::SameLocalsNoStack { offset_delta },
            [top] if same_locals => StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack: *top,
            },
            [] => {
                let (now, before) = (self.locals.len(), previous_frame.locals.len());
                if now < before
                    && before - now < 4
                    && previous_frame.locals.starts_with(&self.locals)
                {
                    StackMapFrame::ChopLocalsNoStack {
                        offset_delta,
                        chopped_k: (before - now) as u8,
                    }
                } else if now > before
                    && now - before < 4
                    && self.locals.starts_with(&previous_frame.locals)
                {
                    StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: self.locals[before..].to_vec(),
                    }
                } else {
                    self.full_stack_map_frame(offset_delta)
                }
            }
            _ => self.full_stack_map_frame(offset_delta),
        }
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.clone(),
            locals: self.locals.clone(),
        }
    }
}

impl<T: Clone> FrameEntries<T> {
    /// Apply a (possibly compressed) stack map frame on top of this one
    ///
    /// Entries carried by the stack map frame go through `convert`. Returns `Ok(None)` when a
    /// chop removes more locals than there are.
    pub fn apply<E>(
        &self,
        frame: &StackMapFrame,
        mut convert: impl FnMut(&RawVerificationType) -> Result<T, E>,
    ) -> Result<Option<FrameEntries<T>>, E> {
        let mut convert_all = |entries: &[RawVerificationType]| -> Result<Vec<T>, E> {
            entries.iter().map(&mut convert).collect()
        };
        Ok(Some(match frame {
            StackMapFrame::SameLocalsNoStack { .. } => FrameEntries {
                locals: self.locals.clone(),
                stack: vec![],
            },
            StackMapFrame::SameLocalsOneStack { stack, .. } => FrameEntries {
                locals: self.locals.clone(),
                stack: convert_all(std::slice::from_ref(stack))?,
            },
            StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => {
                let kept = match self.locals.len().checked_sub(*chopped_k as usize) {
                    Some(kept) => kept,
                    None => return Ok(None),
                };
                FrameEntries {
                    locals: self.locals[..kept].to_vec(),
                    stack: vec![],
                }
            }
            StackMapFrame::AppendLocalsNoStack { locals, .. } => {
                let mut all_locals = self.locals.clone();
                all_locals.extend(convert_all(locals)?);
                FrameEntries {
                    locals: all_locals,
                    stack: vec![],
                }
            }
            StackMapFrame::Full { locals, stack, .. } => FrameEntries {
                locals: convert_all(locals)?,
                stack: convert_all(stack)?,
            },
        }))
    }
}

fn execute_instruction(
    frame: &mut Frame,
    insn: &SymbolicInstruction,
    site: (Label, usize),
    context: &MethodContext,
) -> Result<(), VerifierErrorKind> {
    use Instruction::*;
    use VerificationType::*;

    let hierarchy = context.hierarchy;
    let Frame {
        ref mut stack,
        ref mut locals,
    } = frame;

    match insn {
        Nop => (),
        AConstNull => {
            stack.push(Null);
        }
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 => {
            stack.push(Integer);
        }
        LConst0 | LConst1 => {
            stack.push(Long);
        }
        FConst0 | FConst1 | FConst2 => {
            stack.push(Float);
        }
        DConst0 | DConst1 => {
            stack.push(Double);
        }
        BiPush(_) | SiPush(_) => {
            stack.push(Integer);
        }
        Ldc(constant) => {
            if constant.is_wide() {
                return Err(VerifierErrorKind::InvalidWidth(2));
            }
            stack.push(InferredType::from(constant.field_type()));
        }
        Ldc2(constant) => {
            if !constant.is_wide() {
                return Err(VerifierErrorKind::InvalidWidth(1));
            }
            stack.push(InferredType::from(constant.field_type()));
        }

        ILoad(slot) => {
            get_local_expecting_type(locals, *slot, &Integer)?;
            stack.push(Integer);
        }
        LLoad(slot) => {
            get_local_expecting_type(locals, *slot, &Long)?;
            stack.push(Long);
        }
        FLoad(slot) => {
            get_local_expecting_type(locals, *slot, &Float)?;
            stack.push(Float);
        }
        DLoad(slot) => {
            get_local_expecting_type(locals, *slot, &Double)?;
            stack.push(Double);
        }
        ALoad(slot) => {
            let typ = get_local(locals, *slot)?;
            if !typ.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
            stack.push(typ);
        }

        IALoad => {
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Int])?;
            stack.push(Integer);
        }
        LALoad => {
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Long])?;
            stack.push(Long);
        }
        FALoad => {
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Float])?;
            stack.push(Float);
        }
        DALoad => {
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Double])?;
            stack.push(Double);
        }
        AALoad => {
            pop_expecting_type(stack, &Integer)?;
            match pop(stack)? {
                Null => stack.push(Null),
                Object(array_type @ RefType::ObjectArray(_)) => match array_type.component() {
                    Some(component) => stack.push(InferredType::from(component)),
                    None => return Err(VerifierErrorKind::NotArrayType),
                },
                _ => return Err(VerifierErrorKind::NotArrayType),
            };
        }
        BALoad => {
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Byte, BaseType::Boolean])?;
            stack.push(Integer);
        }
        CALoad => {
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Char])?;
            stack.push(Integer);
        }
        SALoad => {
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Short])?;
            stack.push(Integer);
        }

        IStore(slot) => {
            pop_expecting_type(stack, &Integer)?;
            set_local(locals, *slot, Integer);
        }
        FStore(slot) => {
            pop_expecting_type(stack, &Float)?;
            set_local(locals, *slot, Float);
        }
        LStore(slot) => {
            pop_expecting_type(stack, &Long)?;
            set_local(locals, *slot, Long);
        }
        DStore(slot) => {
            pop_expecting_type(stack, &Double)?;
            set_local(locals, *slot, Double);
        }
        AStore(slot) => {
            let popped_type = pop(stack)?;
            if !popped_type.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
            set_local(locals, *slot, popped_type);
        }

        IAStore => {
            pop_expecting_type(stack, &Integer)?;
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Int])?;
        }
        LAStore => {
            pop_expecting_type(stack, &Long)?;
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Long])?;
        }
        FAStore => {
            pop_expecting_type(stack, &Float)?;
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Float])?;
        }
        DAStore => {
            pop_expecting_type(stack, &Double)?;
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Double])?;
        }
        AAStore => {
            // Element compatibility is checked at runtime (`ArrayStoreException`)
            let elem_type = pop(stack)?;
            pop_expecting_type(stack, &Integer)?;
            let array_type = pop(stack)?;
            if !elem_type.is_reference() || elem_type.is_uninitialized() {
                return Err(VerifierErrorKind::InvalidType);
            }
            match array_type {
                Null | Object(RefType::ObjectArray(_)) => (),
                _ => return Err(VerifierErrorKind::NotArrayType),
            }
        }
        BAStore => {
            pop_expecting_type(stack, &Integer)?;
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Byte, BaseType::Boolean])?;
        }
        CAStore => {
            pop_expecting_type(stack, &Integer)?;
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Char])?;
        }
        SAStore => {
            pop_expecting_type(stack, &Integer)?;
            pop_expecting_type(stack, &Integer)?;
            pop_primitive_array(stack, &[BaseType::Short])?;
        }

        Pop => {
            pop_slots(stack, 1)?;
        }
        Pop2 => {
            pop_slots(stack, 2)?;
        }
        Dup => duplicate(stack, 1, 0)?,
        DupX1 => duplicate(stack, 1, 1)?,
        DupX2 => duplicate(stack, 1, 2)?,
        Dup2 => duplicate(stack, 2, 0)?,
        Dup2X1 => duplicate(stack, 2, 1)?,
        Dup2X2 => duplicate(stack, 2, 2)?,
        Swap => {
            let top = pop_slots(stack, 1)?;
            let below = pop_slots(stack, 1)?;
            for typ in top.into_iter().chain(below) {
                stack.push(typ);
            }
        }

        IAdd | ISub | IDiv | IMul | IRem | IAnd | IOr | IXor | ISh(_) => {
            pop_expecting_type(stack, &Integer)?;
            pop_expecting_type(stack, &Integer)?;
            stack.push(Integer);
        }

        LAdd | LSub | LDiv | LMul | LRem | LAnd | LOr | LXor => {
            pop_expecting_type(stack, &Long)?;
            pop_expecting_type(stack, &Long)?;
            stack.push(Long);
        }

        FAdd | FSub | FDiv | FMul | FRem => {
            pop_expecting_type(stack, &Float)?;
            pop_expecting_type(stack, &Float)?;
            stack.push(Float);
        }

        DAdd | DSub | DDiv | DMul | DRem => {
            pop_expecting_type(stack, &Double)?;
            pop_expecting_type(stack, &Double)?;
            stack.push(Double);
        }

        INeg | I2B | I2C | I2S => {
            pop_expecting_type(stack, &Integer)?;
            stack.push(Integer);
        }
        LNeg => {
            pop_expecting_type(stack, &Long)?;
            stack.push(Long);
        }
        FNeg => {
            pop_expecting_type(stack, &Float)?;
            stack.push(Float);
        }
        DNeg => {
            pop_expecting_type(stack, &Double)?;
            stack.push(Double);
        }

        LSh(_) => {
            pop_expecting_type(stack, &Integer)?;
            pop_expecting_type(stack, &Long)?;
            stack.push(Long);
        }

        IInc(slot, _) => {
            get_local_expecting_type(locals, *slot, &Integer)?;
        }

        I2L => convert(stack, &Integer, Long)?,
        I2F => convert(stack, &Integer, Float)?,
        I2D => convert(stack, &Integer, Double)?,
        L2I => convert(stack, &Long, Integer)?,
        L2F => convert(stack, &Long, Float)?,
        L2D => convert(stack, &Long, Double)?,
        F2I => convert(stack, &Float, Integer)?,
        F2L => convert(stack, &Float, Long)?,
        F2D => convert(stack, &Float, Double)?,
        D2I => convert(stack, &Double, Integer)?,
        D2L => convert(stack, &Double, Long)?,
        D2F => convert(stack, &Double, Float)?,

        LCmp => {
            pop_expecting_type(stack, &Long)?;
            pop_expecting_type(stack, &Long)?;
            stack.push(Integer);
        }
        FCmp(_) => {
            pop_expecting_type(stack, &Float)?;
            pop_expecting_type(stack, &Float)?;
            stack.push(Integer);
        }
        DCmp(_) => {
            pop_expecting_type(stack, &Double)?;
            pop_expecting_type(stack, &Double)?;
            stack.push(Integer);
        }

        GetStatic(field) => {
            stack.push(InferredType::from(&field.descriptor));
        }
        PutStatic(field) => {
            let arg_type = pop(stack)?;
            expect_assignable(hierarchy, &arg_type, &InferredType::from(&field.descriptor))?;
        }
        GetField(field) => {
            let object_type = Object(RefType::Object(field.class.clone()));
            let object_type_found = pop(stack)?;
            expect_assignable(hierarchy, &object_type_found, &object_type)?;
            stack.push(InferredType::from(&field.descriptor));
        }
        PutField(field) => {
            let arg_type = pop(stack)?;
            expect_assignable(hierarchy, &arg_type, &InferredType::from(&field.descriptor))?;

            // Constructors may set their own fields before calling the super constructor
            let object_type_found = pop(stack)?;
            let initializing_own_field =
                object_type_found == UninitializedThis && &field.class == context.this_class;
            if !initializing_own_field {
                let object_type = Object(RefType::Object(field.class.clone()));
                expect_assignable(hierarchy, &object_type_found, &object_type)?;
            }
        }

        Invoke(invoke_type, method) => {
            let desc = &method.descriptor;

            for expected_arg_type in desc.parameters.iter().rev() {
                let found_arg_type = pop(stack)?;
                let expected = InferredType::from(expected_arg_type);
                if !hierarchy.is_assignable(&found_arg_type, &expected)? {
                    log::debug!(
                        "Incompatible argument types: found {} but expected {} (for {})",
                        found_arg_type,
                        expected,
                        method,
                    );
                    return Err(VerifierErrorKind::IncompatibleTypes(
                        found_arg_type.to_string(),
                        expected.to_string(),
                    ));
                }
            }

            match invoke_type {
                InvokeType::Interface(_) if !method.is_interface => {
                    return Err(VerifierErrorKind::InvalidType)
                }
                InvokeType::Virtual if method.is_interface => {
                    return Err(VerifierErrorKind::InvalidType)
                }
                _ => (),
            }

            if let (InvokeType::Special, true) = (invoke_type, method.is_init()) {
                // Initialize
                let initialized = match pop(stack)? {
                    UninitializedThis => UninitializedThis,
                    uninitialized @ Uninitialized(_) => uninitialized,
                    _ => return Err(VerifierErrorKind::UninitializedObject),
                };
                let initialized_type = match &initialized {
                    Uninitialized(site) => RefType::Object(site.class.clone()),
                    _ => RefType::Object(context.this_class.clone()),
                };
                replace_all(stack, locals, &initialized, &Object(initialized_type));

                if desc.return_type.is_some() {
                    return Err(VerifierErrorKind::BadDescriptor(desc.to_string()));
                }
            } else {
                if method.is_init() {
                    return Err(VerifierErrorKind::InvalidType);
                }

                if !matches!(invoke_type, InvokeType::Static) {
                    let found_receiver = pop(stack)?;
                    let expected = Object(method.class.clone());
                    if !hierarchy.is_assignable(&found_receiver, &expected)? {
                        log::debug!(
                            "Incompatible receiver: found {} but expected {} (for {})",
                            found_receiver,
                            expected,
                            method,
                        );
                        return Err(VerifierErrorKind::IncompatibleTypes(
                            found_receiver.to_string(),
                            expected.to_string(),
                        ));
                    }
                }

                if let Some(return_type) = &desc.return_type {
                    stack.push(InferredType::from(return_type));
                }
            }
        }

        InvokeDynamic(invoke_dynamic) => {
            for expected_arg_type in invoke_dynamic.descriptor.parameters.iter().rev() {
                let found_arg_type = pop(stack)?;
                expect_assignable(hierarchy, &found_arg_type, &expected_arg_type.into())?;
            }
            if let Some(return_type) = &invoke_dynamic.descriptor.return_type {
                stack.push(InferredType::from(return_type));
            }
        }

        New(RefType::Object(class)) => {
            let (block, index) = site;
            stack.push(Uninitialized(UninitializedSite {
                class: class.clone(),
                block,
                index,
            }));
        }
        New(_) => return Err(VerifierErrorKind::InvalidType),
        NewArray(base_type) => {
            pop_expecting_type(stack, &Integer)?;
            stack.push(Object(RefType::array(FieldType::Base(*base_type))));
        }
        ANewArray(ref_type) => {
            pop_expecting_type(stack, &Integer)?;
            stack.push(Object(RefType::array(FieldType::Ref(ref_type.clone()))));
        }
        MultiANewArray(ref_type, dimensions) => {
            if *dimensions == 0 || *dimensions as usize > ref_type.dimensions() {
                return Err(VerifierErrorKind::NotArrayType);
            }
            for _ in 0..*dimensions {
                pop_expecting_type(stack, &Integer)?;
            }
            stack.push(Object(ref_type.clone()));
        }
        ArrayLength => {
            match pop(stack)? {
                Null | Object(RefType::PrimitiveArray(_) | RefType::ObjectArray(_)) => (),
                _ => return Err(VerifierErrorKind::NotArrayType),
            }
            stack.push(Integer);
        }

        CheckCast(ref_type) => {
            match pop(stack)? {
                Object(_) | Null => (),
                _ => return Err(VerifierErrorKind::InvalidType),
            }
            stack.push(Object(ref_type.clone()));
        }
        InstanceOf(_) => {
            match pop(stack)? {
                Object(_) | Null => (),
                _ => return Err(VerifierErrorKind::InvalidType),
            }
            stack.push(Integer);
        }

        MonitorEnter | MonitorExit => match pop(stack)? {
            Object(_) | Null => (),
            _ => return Err(VerifierErrorKind::InvalidType),
        },
    }

    Ok(())
}

fn execute_branch_instruction<Lbl, LblWide, LblNext>(
    frame: &mut Frame,
    insn: &BranchInstruction<Lbl, LblWide, LblNext>,
    context: &MethodContext,
) -> Result<(), VerifierErrorKind> {
    use BranchInstruction::*;
    use VerificationType::*;

    let Frame {
        ref mut stack,
        ref locals,
    } = frame;

    let return_type = context.return_type;
    match insn {
        If(_, _, _) => pop_expecting_type(stack, &Integer)?,
        IfICmp(_, _, _) => {
            pop_expecting_type(stack, &Integer)?;
            pop_expecting_type(stack, &Integer)?;
        }
        IfACmp(_, _, _) => {
            let atype_1 = pop(stack)?;
            let atype_2 = pop(stack)?;
            if !atype_1.is_reference() || !atype_2.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
        }
        IfNull(_, _, _) => {
            if !pop(stack)?.is_reference() {
                return Err(VerifierErrorKind::InvalidType);
            }
        }
        Goto(_) | GotoW(_) | FallThrough(_) => (),
        TableSwitch { .. } | LookupSwitch { .. } => pop_expecting_type(stack, &Integer)?,
        IReturn => {
            pop_expecting_type(stack, &Integer)?;
            match return_type {
                Some(FieldType::Base(
                    BaseType::Int
                    | BaseType::Char
                    | BaseType::Short
                    | BaseType::Byte
                    | BaseType::Boolean,
                )) => (),
                _ => return Err(VerifierErrorKind::BadReturn),
            }
        }
        LReturn => {
            pop_expecting_type(stack, &Long)?;
            if return_type != Some(&FieldType::long()) {
                return Err(VerifierErrorKind::BadReturn);
            }
        }
        FReturn => {
            pop_expecting_type(stack, &Float)?;
            if return_type != Some(&FieldType::float()) {
                return Err(VerifierErrorKind::BadReturn);
            }
        }
        DReturn => {
            pop_expecting_type(stack, &Double)?;
            if return_type != Some(&FieldType::double()) {
                return Err(VerifierErrorKind::BadReturn);
            }
        }
        AReturn => {
            let atype = pop(stack)?;
            let is_compatible_return = match return_type {
                Some(ret_type @ FieldType::Ref(_)) => context
                    .hierarchy
                    .is_assignable(&atype, &InferredType::from(ret_type))?,
                _ => false,
            };
            if !is_compatible_return {
                return Err(VerifierErrorKind::BadReturn);
            }
        }
        Return => {
            if return_type.is_some() {
                return Err(VerifierErrorKind::BadReturn);
            }
            if locals.contains(&UninitializedThis) {
                return Err(VerifierErrorKind::UninitializedObject);
            }
        }
        AThrow => {
            let atype = pop(stack)?;
            if !context.hierarchy.is_throwable(&atype)? {
                return Err(VerifierErrorKind::InvalidType);
            }
            stack.clear();
            stack.push(atype);
        }

        // Subroutines have no stack map representation
        Jsr(_, _) | JsrW(_, _) | Ret(_) => return Err(VerifierErrorKind::InvalidType),
    }

    Ok(())
}

fn replace_all(
    stack: &mut OffsetVec<InferredType>,
    locals: &mut [InferredType],
    original: &InferredType,
    updated: &InferredType,
) {
    stack.for_each_mut(|typ| {
        if typ == original {
            *typ = updated.clone();
        }
    });
    for typ in locals.iter_mut() {
        if typ == original {
            *typ = updated.clone();
        }
    }
}

fn get_local(locals: &[InferredType], slot: u16) -> Result<InferredType, VerifierErrorKind> {
    locals
        .get(slot as usize)
        .cloned()
        .ok_or(VerifierErrorKind::InvalidIndex(slot))
}

fn get_local_expecting_type(
    locals: &[InferredType],
    slot: u16,
    expected_type: &InferredType,
) -> Result<(), VerifierErrorKind> {
    if &get_local(locals, slot)? == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

/// Store into a local, invalidating any wide value it overlaps
fn set_local(locals: &mut Vec<InferredType>, slot: u16, new_type: InferredType) {
    let slot = slot as usize;
    let width = new_type.width();
    if locals.len() < slot + width {
        locals.resize(slot + width, InferredType::Top);
    }
    if slot > 0 && locals[slot - 1].width() == 2 {
        locals[slot - 1] = InferredType::Top;
    }
    if width == 2 && locals[slot + 1].width() == 2 {
        if let Some(next) = locals.get_mut(slot + 2) {
            *next = InferredType::Top;
        }
    }
    locals[slot] = new_type;
    if width == 2 {
        locals[slot + 1] = InferredType::Top;
    }
}

fn pop(stack: &mut OffsetVec<InferredType>) -> Result<InferredType, VerifierErrorKind> {
    stack
        .pop()
        .map(|(_, typ)| typ)
        .ok_or(VerifierErrorKind::EmptyStack)
}

/// Pop values covering exactly `slots` stack slots, bottom first
///
/// Fails rather than split a `long` or `double`.
fn pop_slots(
    stack: &mut OffsetVec<InferredType>,
    slots: usize,
) -> Result<Vec<InferredType>, VerifierErrorKind> {
    let mut popped = vec![];
    let mut covered = 0;
    while covered < slots {
        let typ = pop(stack)?;
        covered += typ.width();
        popped.push(typ);
    }
    if covered > slots {
        return Err(VerifierErrorKind::InvalidWidth(covered));
    }
    popped.reverse();
    Ok(popped)
}

/// `dup` family: copy the top `copied` slots underneath the `skipped` slots below them
fn duplicate(
    stack: &mut OffsetVec<InferredType>,
    copied: usize,
    skipped: usize,
) -> Result<(), VerifierErrorKind> {
    let copy = pop_slots(stack, copied)?;
    let under = pop_slots(stack, skipped)?;
    for typ in copy.iter().chain(&under).chain(&copy) {
        stack.push(typ.clone());
    }
    Ok(())
}

fn pop_expecting_type(
    stack: &mut OffsetVec<InferredType>,
    expected_type: &InferredType,
) -> Result<(), VerifierErrorKind> {
    if &pop(stack)? == expected_type {
        Ok(())
    } else {
        Err(VerifierErrorKind::InvalidType)
    }
}

/// Pop a one-dimensional primitive array (or `null`)
fn pop_primitive_array(
    stack: &mut OffsetVec<InferredType>,
    element_types: &[BaseType],
) -> Result<(), VerifierErrorKind> {
    match pop(stack)? {
        InferredType::Null => Ok(()),
        InferredType::Object(RefType::PrimitiveArray(arr))
            if arr.additional_dimensions == 0 && element_types.contains(&arr.element_type) =>
        {
            Ok(())
        }
        _ => Err(VerifierErrorKind::NotArrayType),
    }
}

fn convert(
    stack: &mut OffsetVec<InferredType>,
    from: &InferredType,
    to: InferredType,
) -> Result<(), VerifierErrorKind> {
    pop_expecting_type(stack, from)?;
    stack.push(to);
    Ok(())
}

fn expect_assignable(
    hierarchy: &Hierarchy,
    found: &InferredType,
    expected: &InferredType,
) -> Result<(), VerifierErrorKind> {
    if hierarchy.is_assignable(found, expected)? {
        Ok(())
    } else {
        Err(VerifierErrorKind::IncompatibleTypes(
            found.to_string(),
            expected.to_string(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class_file::{ClassConstantIndex, ConstantIndex};
    use crate::code::Instruction::*;
    use crate::constant_pool::MethodRef;
    use crate::names::{Name, UnqualifiedName};
    use crate::verifier::ClassHierarchy;
    use VerificationType::*;

    fn new_frame<const N: usize, const M: usize>(
        locals: [InferredType; N],
        stack: [InferredType; M],
    ) -> Frame {
        Frame {
            locals: locals.to_vec(),
            stack: stack.into_iter().collect(),
        }
    }

    fn my_class() -> BinaryName {
        BinaryName::from_str("MyClass").unwrap()
    }

    fn run(frame: &mut Frame, insn: &SymbolicInstruction) -> Result<(), VerifierErrorKind> {
        let jdk = ClassHierarchy::jdk();
        let this_class = my_class();
        let hierarchy = Hierarchy::new(&jdk).with_this_class(
            this_class.clone(),
            crate::verifier::ClassInfo::class(BinaryName::OBJECT),
        );
        let context = MethodContext {
            hierarchy: &hierarchy,
            this_class: &this_class,
            return_type: None,
        };
        frame.execute(insn, (Label::START, 0), &context)
    }

    #[test]
    fn arithmetic_needs_matching_operands() {
        let cases = [(Integer, IMul), (Long, LAnd), (Float, FRem), (Double, DSub)];
        for (operand, insn) in cases {
            let mut frame = new_frame([], [operand.clone(), operand.clone()]);
            run(&mut frame, &insn).unwrap();
            assert_eq!(frame, new_frame([], [operand.clone()]), "{:?}", insn);

            let mut mixed = new_frame([], [operand.clone(), Null]);
            assert_eq!(run(&mut mixed, &insn), Err(VerifierErrorKind::InvalidType));

            let mut short = new_frame([], [operand]);
            assert_eq!(run(&mut short, &insn), Err(VerifierErrorKind::EmptyStack));
        }
    }

    #[test]
    fn wide_values_and_stack_shuffles() {
        let mut frame = new_frame([], [Long]);
        assert_eq!(run(&mut frame, &Pop), Err(VerifierErrorKind::InvalidWidth(2)));

        let mut frame = new_frame([], [Integer, Long]);
        run(&mut frame, &DupX2).unwrap_err();
        let mut frame = new_frame([], [Long, Integer]);
        run(&mut frame, &DupX2).unwrap();
        assert_eq!(frame, new_frame([], [Integer, Long, Integer]));

        let mut frame = new_frame([], [Long, Double]);
        run(&mut frame, &Dup2X1).unwrap_err();
        let mut frame = new_frame([], [Integer, Double]);
        run(&mut frame, &Dup2X1).unwrap();
        assert_eq!(frame, new_frame([], [Double, Integer, Double]));
        assert_eq!(frame.max_stack(), 5);

        // Overwriting half of a long kills it
        let mut frame = new_frame([], [Integer]);
        frame.locals = vec![Long, Top];
        run(&mut frame, &IStore(1)).unwrap();
        assert_eq!(frame.locals, vec![Top, Integer]);
        assert_eq!(run(&mut frame, &LLoad(0)), Err(VerifierErrorKind::InvalidType));
    }

    #[test]
    fn constructors_initialize_every_copy() {
        let string = RefType::STRING;
        let init = MethodRef::new(
            BinaryName::STRING,
            UnqualifiedName::INIT,
            MethodDescriptor::new(vec![], None),
        );

        let mut frame = Frame::default();
        run(&mut frame, &New(string.clone())).unwrap();
        run(&mut frame, &Dup).unwrap();
        run(&mut frame, &AStore(1)).unwrap();
        let site = UninitializedSite {
            class: BinaryName::STRING,
            block: Label::START,
            index: 0,
        };
        assert_eq!(frame.locals, vec![Top, Uninitialized(site.clone())]);

        run(&mut frame, &Invoke(InvokeType::Special, init)).unwrap();
        assert_eq!(frame.locals, vec![Top, Object(string)]);
        assert!(frame.stack.is_empty());

        let mut frame = new_frame([UninitializedThis], [UninitializedThis]);
        let super_init = MethodRef::new(
            BinaryName::OBJECT,
            UnqualifiedName::INIT,
            MethodDescriptor::new(vec![], None),
        );
        run(&mut frame, &Invoke(InvokeType::Special, super_init)).unwrap();
        assert_eq!(frame.locals, vec![Object(RefType::Object(my_class()))]);
    }

    #[test]
    fn merging_frames() {
        let jdk = ClassHierarchy::jdk();
        let hierarchy = Hierarchy::new(&jdk);
        let integer = Object(RefType::Object(BinaryName::INTEGER));
        let long = Object(RefType::Object(BinaryName::LONG));
        let number = Object(RefType::Object(BinaryName::NUMBER));

        let frame1 = new_frame([Integer, Long, Top, integer.clone()], [integer.clone()]);
        let frame2 = new_frame([Float, Long, Top, Null], [long.clone()]);
        let merged = frame1.merge(&frame2, &hierarchy).unwrap().unwrap();
        assert_eq!(
            merged,
            new_frame([Top, Long, Top, integer.clone()], [number.clone()])
        );
        assert!(frame1.is_assignable_to(&merged, &hierarchy).unwrap());
        assert!(!merged.is_assignable_to(&frame1, &hierarchy).unwrap());

        let frame3 = new_frame([], [Integer]);
        assert_eq!(frame1.merge(&frame3, &hierarchy).unwrap(), None);
        let frame4 = new_frame([], []);
        assert_eq!(frame1.merge(&frame4, &hierarchy).unwrap(), None);
    }

    #[test]
    fn compact_stack_map_frames() {
        let class = Object(ClassConstantIndex(ConstantIndex(3)));
        let previous = FrameEntries {
            locals: vec![Integer, class],
            stack: vec![],
        };

        let same = previous.clone();
        assert_eq!(
            same.stack_map_frame(4, &previous),
            StackMapFrame::SameLocalsNoStack { offset_delta: 4 }
        );

        let chopped = FrameEntries {
            locals: vec![Integer],
            stack: vec![],
        };
        assert_eq!(
            chopped.stack_map_frame(1, &previous),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 1,
                chopped_k: 1
            }
        );

        let appended = FrameEntries {
            locals: vec![Integer, class, Long, Float],
            stack: vec![],
        };
        let frame = appended.stack_map_frame(2, &previous);
        assert_eq!(
            frame,
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 2,
                locals: vec![Long, Float]
            }
        );
        assert_eq!(previous.apply(&frame, |t| Ok::<_, ()>(*t)), Ok(Some(appended)));

        let one_stack = FrameEntries {
            locals: vec![Integer, class],
            stack: vec![Null],
        };
        assert_eq!(
            one_stack.stack_map_frame(0, &previous),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 0,
                stack: Null
            }
        );

        let different = FrameEntries {
            locals: vec![Float],
            stack: vec![],
        };
        assert!(matches!(
            different.stack_map_frame(0, &previous),
            StackMapFrame::Full { .. }
        ));
        assert_eq!(
            chopped.apply(
                &StackMapFrame::ChopLocalsNoStack {
                    offset_delta: 0,
                    chopped_k: 2
                },
                |t| Ok::<_, ()>(*t)
            ),
            Ok(None)
        );
    }

    #[test]
    fn entry_frames() {
        let descriptor = MethodDescriptor::new(
            vec![FieldType::long(), FieldType::object(BinaryName::STRING)],
            None,
        );
        let frame = Frame::entry(&my_class(), false, true, &descriptor);
        assert_eq!(
            frame.locals,
            vec![UninitializedThis, Long, Top, Object(RefType::STRING)]
        );
        assert_eq!(
            frame.local_entries(),
            vec![UninitializedThis, Long, Object(RefType::STRING)]
        );
        assert_eq!(
            Frame::from_entries(frame.local_entries(), vec![]),
            frame
        );
    }
}
