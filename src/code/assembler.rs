//! Assembly of code element streams into `Code` attributes
//!
//! The stream is first [split into basic blocks](SplitCode::split) and the operands of every
//! instruction are interned into the constant pool. Then:
//!
//!  1. frames are inferred for every reachable block (which also yields `max_stack` and
//!     `max_locals`),
//!  2. unreachable blocks are patched out (or kept, depending on [`DeadCode`]),
//!  3. blocks are laid out, with oversized jumps widened as needed,
//!  4. the bytecode, exception table, stack map frames, and debug tables are written out.

use crate::class_file::{
    ClassConstantIndex, Code, ExceptionHandler, LineNumberEntry, LineNumberTable,
    LocalVariableEntry, LocalVariableTable, LocalVariableTypeTable, RawVerificationType,
    Serialize, StackMapTable, Version,
};
use crate::code::decode::disassemble;
use crate::code::jump_encoding::{widen_oversized_jumps, SIGNED_16BIT_JUMP_RANGE};
use crate::code::{
    BasicBlock, BranchInstruction, CodeElement, JumpTargets, Label, LabelGenerator, MethodShape,
    Position, SerializableInstruction, SplitCode, SymbolicBlock,
};
use crate::constant_pool::ConstantPool;
use crate::descriptors::{RefType, RenderDescriptor};
use crate::errors::Error;
use crate::names::Name;
use crate::options::{DeadCode, DebugElements, Options, StackMaps};
use crate::util::{Offset, OffsetVec, Width};
use crate::verifier::{
    infer_frames, ClassInfo, Frame, FrameEntries, Hierarchy, InferredType, MethodContext,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Block whose instructions are resolved, but whose jumps are still symbolic
type LayoutBlock =
    BasicBlock<Option<Frame>, SerializableInstruction, BranchInstruction<Label, Label, Label>>;

/// Everything about the enclosing class and method that assembly depends on
#[derive(Debug, Clone, Copy)]
pub struct AssemblyTarget<'a> {
    pub method: MethodShape<'a>,

    /// Superclass and kind of the class being written
    pub class_info: &'a ClassInfo,
    pub version: Version,
}

/// Assemble a code element stream into a `Code` attribute
///
/// `label_generator` must not produce any of the labels used in `elements`: it supplies the
/// labels of blocks introduced while splitting and widening jumps.
pub fn assemble_code(
    elements: &[CodeElement],
    label_generator: &mut impl LabelGenerator<Label>,
    target: AssemblyTarget,
    constants: &mut ConstantPool,
    options: &Options,
) -> Result<Code, Error> {
    reject_subroutines(elements)?;
    let split = if options.debug_elements == DebugElements::Drop {
        let kept: Vec<CodeElement> = elements
            .iter()
            .filter(|element| !element.is_debug())
            .cloned()
            .collect();
        SplitCode::split(&kept, label_generator)?
    } else {
        SplitCode::split(elements, label_generator)?
    };

    let mut block_order = split.block_order.clone();
    let mut blocks: HashMap<Label, LayoutBlock> = HashMap::with_capacity(block_order.len());
    for label in &block_order {
        blocks.insert(*label, resolve_block(&split.blocks[label], constants)?);
    }
    check_jumps_to_end(&split, &block_order, &mut blocks)?;

    // Infer frames (class files older than Java 6 still need `max_stack` and `max_locals`)
    let generate_frames =
        options.stack_maps == StackMaps::Generate && target.version.has_stack_map_frames();
    let method = target.method;
    let hierarchy = Hierarchy::new(&*options.class_hierarchy)
        .with_this_class(method.this_class.clone(), target.class_info.clone())
        .lenient(!generate_frames);
    let context = MethodContext {
        hierarchy: &hierarchy,
        this_class: method.this_class,
        return_type: method.descriptor.return_type.as_ref(),
    };
    let inference = infer_frames(&split, method.entry_frame(), &context)?;
    let mut max_stack = inference.max_stack;

    let dead: HashSet<Label> = block_order
        .iter()
        .copied()
        .filter(|label| !inference.is_reachable(label))
        .collect();
    let patch_dead = options.dead_code == DeadCode::Patch;
    if !dead.is_empty() {
        if patch_dead {
            log::debug!(
                "Patching {} unreachable blocks in {}{}",
                dead.len(),
                method.name,
                method.descriptor.render()
            );
            max_stack = max_stack.max(1);
            for label in &dead {
                if let Some(block) = blocks.get_mut(label) {
                    block.instructions = OffsetVec::new();
                    block.branch_end = BranchInstruction::AThrow;
                    block.frame = Some(Frame::from_entries(
                        vec![],
                        vec![InferredType::Object(RefType::THROWABLE)],
                    ));
                }
            }
        } else {
            log::warn!(
                "Keeping {} unreachable blocks in {}{} (the method will likely fail verification)",
                dead.len(),
                method.name,
                method.descriptor.render()
            );
        }
    }
    for (label, frame) in inference.frames {
        if let Some(block) = blocks.get_mut(&label) {
            block.frame = Some(frame);
        }
    }

    // Lay out the blocks
    set_switch_paddings(&block_order, &mut blocks);
    widen_oversized_jumps(
        &mut block_order,
        &mut blocks,
        label_generator,
        &SIGNED_16BIT_JUMP_RANGE,
        options.short_jumps,
    )?;
    let offsets = BasicBlock::compute_block_offsets(&block_order, &blocks);
    let code_len: usize = blocks.values().map(|block| block.width()).sum();
    if code_len > u16::MAX as usize {
        return Err(Error::MethodCodeOverflow(code_len));
    }
    let code_array = serialize_blocks(&block_order, &blocks, &offsets, code_len)?;

    let mut attributes = vec![];
    if generate_frames {
        let frames = stack_map_frames(&block_order, &blocks, &offsets, &split, method, constants)?;
        if !frames.is_empty() {
            attributes.push(constants.get_attribute(StackMapTable(frames))?);
        }
    }

    let layout = Layout {
        split: &split,
        block_order: &block_order,
        blocks: &blocks,
        offsets: &offsets,
        code_len,
    };
    let exception_table = layout.exception_table(&dead, patch_dead, constants)?;
    let line_numbers = layout.line_numbers(&dead, patch_dead);
    if !line_numbers.is_empty() {
        attributes.push(constants.get_attribute(LineNumberTable(line_numbers))?);
    }
    let (local_variables, local_variable_types) = layout.local_variables(constants)?;
    if !local_variables.is_empty() {
        attributes.push(constants.get_attribute(LocalVariableTable(local_variables))?);
    }
    if !local_variable_types.is_empty() {
        attributes.push(constants.get_attribute(LocalVariableTypeTable(local_variable_types))?);
    }

    let max_stack =
        u16::try_from(max_stack).map_err(|_| Error::MethodCodeMaxStackOverflow(max_stack))?;
    let max_locals = u16::try_from(inference.max_locals)
        .map_err(|_| Error::MethodCodeMaxLocalsOverflow(inference.max_locals))?;

    log::trace!(
        "Assembled {}{} into {} bytes ({} blocks)",
        method.name,
        method.descriptor.render(),
        code_len,
        block_order.len()
    );
    Ok(Code {
        max_stack,
        max_locals,
        code_array,
        exception_table,
        attributes,
    })
}

/// Subroutines can't be described by stack map frames
fn reject_subroutines(elements: &[CodeElement]) -> Result<(), Error> {
    for element in elements {
        match element {
            CodeElement::Branch(BranchInstruction::Jsr(_, _)) => {
                return Err(Error::UnsupportedInstruction("jsr"))
            }
            CodeElement::Branch(BranchInstruction::JsrW(_, _)) => {
                return Err(Error::UnsupportedInstruction("jsr_w"))
            }
            CodeElement::Branch(BranchInstruction::Ret(_)) => {
                return Err(Error::UnsupportedInstruction("ret"))
            }
            _ => (),
        }
    }
    Ok(())
}

/// Intern the operands of every instruction in the block
fn resolve_block(block: &SymbolicBlock, constants: &mut ConstantPool) -> Result<LayoutBlock, Error> {
    let constants = RefCell::new(constants);
    let mut instructions = OffsetVec::new();
    for insn in &block.instructions {
        let resolved: SerializableInstruction = insn.map(
            |class| constants.borrow_mut().intern(class),
            |constant| constants.borrow_mut().intern(constant),
            |field| constants.borrow_mut().intern(field),
            |method| constants.borrow_mut().intern(method),
            |indy| constants.borrow_mut().intern(indy),
        )?;
        instructions.push(resolved);
    }
    Ok(BasicBlock {
        frame: None,
        instructions,
        branch_end: block.branch_end.clone(),
    })
}

/// Switches must have their jump table aligned to a multiple of four bytes
fn set_switch_paddings(block_order: &[Label], blocks: &mut HashMap<Label, LayoutBlock>) {
    let mut offset = 0;
    for label in block_order {
        if let Some(block) = blocks.get_mut(label) {
            block
                .branch_end
                .set_padding_for(offset + block.instructions.offset_len().0);
            offset += block.width();
        }
    }
}

/// Jumps to labels bound after the last instruction point outside of the method body
fn check_jumps_to_end(
    split: &SplitCode,
    block_order: &[Label],
    blocks: &mut HashMap<Label, LayoutBlock>,
) -> Result<(), Error> {
    let Some(from_block) = split.jumps_to_end().first().copied() else {
        return Ok(());
    };
    set_switch_paddings(block_order, blocks);
    let offsets = BasicBlock::compute_block_offsets(block_order, blocks);
    let code_len: usize = blocks.values().map(|block| block.width()).sum();
    let offset = offsets[&from_block].0 + blocks[&from_block].instructions.offset_len().0;
    let disassembly = serialize_blocks(block_order, blocks, &offsets, code_len)
        .map(|code| disassemble(&code, offset))
        .unwrap_or_default();
    Err(Error::BranchTargetOutOfRange {
        offset,
        target: code_len as i64,
        disassembly,
    })
}

/// Write out the bytecode array
///
/// Labels without a block stand for the end of the code.
fn serialize_blocks(
    block_order: &[Label],
    blocks: &HashMap<Label, LayoutBlock>,
    offsets: &HashMap<Label, Offset>,
    code_len: usize,
) -> Result<Vec<u8>, Error> {
    let target_offset = |label: &Label| offsets.get(label).map_or(code_len, |offset| offset.0);

    let mut code_array: Vec<u8> = Vec::with_capacity(code_len);
    for label in block_order {
        let block = &blocks[label];
        for insn in block.instructions.values() {
            insn.serialize(&mut code_array)?;
        }

        let branch_offset = offsets[label].0 + block.instructions.offset_len().0;
        if let JumpTargets::Regular(target) = block.branch_end.jump_targets() {
            let distance = target_offset(&target) as isize - branch_offset as isize;
            if i16::try_from(distance).is_err() {
                return Err(Error::ShortJumpOverflow {
                    offset: branch_offset,
                    distance,
                });
            }
        }
        let branch_end = block.branch_end.map_labels(
            |lbl| (target_offset(lbl) as isize - branch_offset as isize) as i16,
            |lbl| (target_offset(lbl) as isize - branch_offset as isize) as i32,
            |_| (),
        );
        branch_end.serialize(&mut code_array)?;
    }
    Ok(code_array)
}

/// Compute the `StackMapTable` entries
///
/// Frames are needed at every jump target, exception handler, and block following an
/// unconditional jump.
fn stack_map_frames(
    block_order: &[Label],
    blocks: &HashMap<Label, LayoutBlock>,
    offsets: &HashMap<Label, Offset>,
    split: &SplitCode,
    method: MethodShape,
    constants: &mut ConstantPool,
) -> Result<Vec<crate::class_file::StackMapFrame>, Error> {
    let mut needs_frame: HashSet<Label> = HashSet::new();
    for block in blocks.values() {
        needs_frame.extend(block.branch_end.jump_targets().targets().iter().copied());
    }
    for catch in &split.catches {
        if let Position::Block(handler) = split.position(catch.handler)? {
            needs_frame.insert(handler);
        }
    }
    for pair in block_order.windows(2) {
        if blocks[&pair[0]].branch_end.fallthrough_target().is_none() {
            needs_frame.insert(pair[1]);
        }
    }

    let raw_type = |typ: &InferredType,
                    constants: &mut ConstantPool|
     -> Result<RawVerificationType, Error> {
        typ.map(
            |class| constants.intern::<ClassConstantIndex, _>(class),
            |site| {
                let block_offset = offsets.get(&site.block).map_or(0, |offset| offset.0);
                let insn_offset = blocks
                    .get(&site.block)
                    .map_or(0, |block| block.instructions.offset_of(site.index).0);
                Ok((block_offset + insn_offset) as u16)
            },
        )
    };
    let mut raw_entries = |frame: &Frame| -> Result<FrameEntries<RawVerificationType>, Error> {
        let mut entries = FrameEntries::default();
        for local in frame.local_entries() {
            entries.locals.push(raw_type(&local, constants)?);
        }
        for typ in frame.stack_entries() {
            entries.stack.push(raw_type(&typ, constants)?);
        }
        Ok(entries)
    };

    let mut previous = raw_entries(&method.entry_frame())?;
    let mut previous_offset: Option<usize> = None;
    let mut frames = vec![];
    for label in block_order {
        if !needs_frame.contains(label) {
            continue;
        }
        let Some(frame) = &blocks[label].frame else {
            continue;
        };
        let offset = offsets[label].0;
        let offset_delta = match previous_offset {
            None => offset,
            Some(previous_offset) if previous_offset == offset => continue,
            Some(previous_offset) => offset - previous_offset - 1,
        };
        let entries = raw_entries(frame)?;
        frames.push(entries.stack_map_frame(offset_delta as u16, &previous));
        previous = entries;
        previous_offset = Some(offset);
    }
    Ok(frames)
}

/// Final placement of the blocks, used to compute the offset-based tables
struct Layout<'a> {
    split: &'a SplitCode,
    block_order: &'a [Label],
    blocks: &'a HashMap<Label, LayoutBlock>,
    offsets: &'a HashMap<Label, Offset>,
    code_len: usize,
}

impl<'a> Layout<'a> {
    /// Offset of a label bound anywhere in the code
    fn label_offset(&self, label: Label) -> Result<usize, Error> {
        Ok(match self.split.position(label)? {
            Position::Block(block) => self.offsets[&block].0,
            Position::End => self.code_len,
        })
    }

    fn order_index(&self, label: Label) -> Result<usize, Error> {
        Ok(match self.split.position(label)? {
            Position::End => self.block_order.len(),
            Position::Block(block) => self
                .block_order
                .iter()
                .position(|lbl| *lbl == block)
                .unwrap_or(self.block_order.len()),
        })
    }

    /// Exception table, with patched out blocks cut out of the protected ranges
    fn exception_table(
        &self,
        dead: &HashSet<Label>,
        patch_dead: bool,
        constants: &mut ConstantPool,
    ) -> Result<Vec<ExceptionHandler>, Error> {
        let mut table = vec![];
        for catch in &self.split.catches {
            let handler_pc = match self.split.position(catch.handler)? {
                Position::Block(block) => self.offsets[&block].0 as u16,
                Position::End => return Err(Error::FallsOffEnd),
            };
            let catch_type = match &catch.catch_type {
                Some(class) => Some(constants.intern::<ClassConstantIndex, _>(class)?),
                None => None,
            };

            let start = self.order_index(catch.start)?;
            let end = self.order_index(catch.end)?;
            let mut run_start: Option<usize> = None;
            let mut ranges: Vec<(usize, usize)> = vec![];
            for label in self.block_order.iter().take(end).skip(start) {
                let block_start = self.offsets[label].0;
                if patch_dead && dead.contains(label) {
                    if let Some(from) = run_start.take() {
                        ranges.push((from, block_start));
                    }
                } else if run_start.is_none() {
                    run_start = Some(block_start);
                }
            }
            if let Some(from) = run_start {
                let until = self
                    .block_order
                    .get(end)
                    .map_or(self.code_len, |label| self.offsets[label].0);
                ranges.push((from, until));
            }

            for (start_pc, end_pc) in ranges {
                if start_pc < end_pc {
                    table.push(ExceptionHandler {
                        start_pc: start_pc as u16,
                        end_pc: end_pc as u16,
                        handler_pc,
                        catch_type,
                    });
                }
            }
        }
        Ok(table)
    }

    fn line_numbers(&self, dead: &HashSet<Label>, patch_dead: bool) -> Vec<LineNumberEntry> {
        let mut entries = vec![];
        for (block_label, index, line) in &self.split.line_numbers {
            if patch_dead && dead.contains(block_label) {
                continue;
            }
            let block = &self.blocks[block_label];
            if *index > block.instructions.len() {
                continue;
            }
            let offset = self.offsets[block_label].0 + block.instructions.offset_of(*index).0;
            if offset < self.code_len {
                entries.push(LineNumberEntry {
                    start_pc: offset as u16,
                    line_number: *line,
                });
            }
        }
        entries
    }

    fn local_variables(
        &self,
        constants: &mut ConstantPool,
    ) -> Result<(Vec<LocalVariableEntry>, Vec<LocalVariableEntry>), Error> {
        let mut variables = vec![];
        let mut variable_types = vec![];
        for element in &self.split.local_variables {
            let (slot, name, descriptor, start, end, is_type) = match element {
                CodeElement::LocalVariable {
                    slot,
                    name,
                    descriptor,
                    start,
                    end,
                } => (*slot, name, descriptor.render(), *start, *end, false),
                CodeElement::LocalVariableType {
                    slot,
                    name,
                    signature,
                    start,
                    end,
                } => (*slot, name, signature.clone(), *start, *end, true),
                _ => continue,
            };
            let start_pc = self.label_offset(start)?;
            let end_pc = self.label_offset(end)?;
            if end_pc < start_pc {
                log::debug!("Dropping local variable {} with an inverted range", name);
                continue;
            }
            let entry = LocalVariableEntry {
                start_pc: start_pc as u16,
                length: (end_pc - start_pc) as u16,
                name: constants.get_utf8(name.as_str())?,
                descriptor: constants.get_utf8(descriptor)?,
                index: slot,
            };
            if is_type {
                variable_types.push(entry);
            } else {
                variables.push(entry);
            }
        }
        Ok((variables, variable_types))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class_file::StackMapFrame;
    use crate::code::{Instruction, LabelSequence, OrdComparison};
    use crate::descriptors::{FieldType, MethodDescriptor};
    use crate::names::{BinaryName, UnqualifiedName};
    use crate::options::ShortJumps;

    struct Fixture {
        this_class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        class_info: ClassInfo,
    }

    impl Fixture {
        fn new(descriptor: MethodDescriptor) -> Fixture {
            Fixture {
                this_class: BinaryName::from_str("Foo").unwrap(),
                name: UnqualifiedName::from_str("m").unwrap(),
                descriptor,
                class_info: ClassInfo::class(BinaryName::OBJECT),
            }
        }

        fn assemble(
            &self,
            elements: &[CodeElement],
            generator: &mut LabelSequence,
            options: &Options,
        ) -> Result<(Code, ConstantPool), Error> {
            let mut constants = ConstantPool::new();
            let target = AssemblyTarget {
                method: MethodShape {
                    this_class: &self.this_class,
                    name: &self.name,
                    descriptor: &self.descriptor,
                    is_static: true,
                },
                class_info: &self.class_info,
                version: Version::JAVA8,
            };
            let code = assemble_code(elements, generator, target, &mut constants, options)?;
            Ok((code, constants))
        }
    }

    fn int_to_int() -> MethodDescriptor {
        MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::int()))
    }

    #[test]
    fn conditional_gets_a_frame() {
        let fixture = Fixture::new(int_to_int());
        let mut generator = LabelSequence::new(Label::START);
        let else_lbl = generator.fresh_label();
        let elements = vec![
            CodeElement::Instruction(Instruction::ILoad(0)),
            CodeElement::Instruction(Instruction::BiPush(10)),
            CodeElement::Branch(BranchInstruction::IfICmp(OrdComparison::GE, else_lbl, ())),
            CodeElement::Instruction(Instruction::IConst1),
            CodeElement::Branch(BranchInstruction::IReturn),
            CodeElement::Label(else_lbl),
            CodeElement::Instruction(Instruction::IConst2),
            CodeElement::Branch(BranchInstruction::IReturn),
        ];
        let (code, constants) = fixture
            .assemble(&elements, &mut generator, &Options::default())
            .unwrap();

        assert_eq!(
            code.code_array,
            vec![0x1a, 0x10, 10, 0xa2, 0, 5, 0x04, 0xac, 0x05, 0xac]
        );
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.max_locals, 1);
        assert_eq!(code.attributes.len(), 1);
        assert_eq!(
            constants.utf8_at(code.attributes[0].name_index).unwrap(),
            "StackMapTable"
        );
        let mut expected = vec![];
        StackMapTable(vec![StackMapFrame::SameLocalsNoStack { offset_delta: 8 }])
            .serialize(&mut expected)
            .unwrap();
        assert_eq!(code.attributes[0].info, expected);
    }

    #[test]
    fn dead_code_is_patched() {
        let fixture = Fixture::new(int_to_int());
        let mut generator = LabelSequence::new(Label::START);
        let elements = vec![
            CodeElement::Instruction(Instruction::ILoad(0)),
            CodeElement::Branch(BranchInstruction::IReturn),
            CodeElement::Instruction(Instruction::IConst0),
            CodeElement::Instruction(Instruction::IConst0),
            CodeElement::Instruction(Instruction::IAdd),
            CodeElement::Branch(BranchInstruction::IReturn),
        ];
        let (code, _) = fixture
            .assemble(&elements, &mut generator, &Options::default())
            .unwrap();
        assert_eq!(code.code_array, vec![0x1a, 0xac, 0xbf]);
        assert_eq!(code.max_stack, 1);

        let keep = Options {
            dead_code: DeadCode::Keep,
            ..Options::default()
        };
        let mut generator = LabelSequence::new(Label::START);
        let (code, _) = fixture.assemble(&elements, &mut generator, &keep).unwrap();
        assert_eq!(code.code_array, vec![0x1a, 0xac, 0x03, 0x03, 0x60, 0xac]);
    }

    #[test]
    fn jumps_to_the_end_are_out_of_range() {
        let fixture = Fixture::new(int_to_int());
        let mut generator = LabelSequence::new(Label::START);
        let end = generator.fresh_label();
        let elements = vec![
            CodeElement::Instruction(Instruction::ILoad(0)),
            CodeElement::Branch(BranchInstruction::If(OrdComparison::EQ, end, ())),
            CodeElement::Instruction(Instruction::ILoad(0)),
            CodeElement::Branch(BranchInstruction::IReturn),
            CodeElement::Label(end),
        ];
        match fixture.assemble(&elements, &mut generator, &Options::default()) {
            Err(Error::BranchTargetOutOfRange {
                offset,
                target,
                disassembly,
            }) => {
                assert_eq!(offset, 1);
                assert_eq!(target, 6);
                assert!(disassembly.contains("->"), "{}", disassembly);
            }
            other => panic!("expected an out of range branch, got {:?}", other.err()),
        }
    }

    #[test]
    fn subroutines_are_rejected() {
        let fixture = Fixture::new(int_to_int());
        let mut generator = LabelSequence::new(Label::START);
        let sub = generator.fresh_label();
        let elements = vec![
            CodeElement::Branch(BranchInstruction::Jsr(sub, ())),
            CodeElement::Label(sub),
            CodeElement::Branch(BranchInstruction::Ret(1)),
        ];
        assert!(matches!(
            fixture.assemble(&elements, &mut generator, &Options::default()),
            Err(Error::UnsupportedInstruction("jsr"))
        ));
    }

    #[test]
    fn long_jumps_follow_the_policy() {
        let fixture = Fixture::new(int_to_int());
        let mut generator = LabelSequence::new(Label::START);
        let far = generator.fresh_label();
        let mut elements = vec![
            CodeElement::Instruction(Instruction::ILoad(0)),
            CodeElement::Branch(BranchInstruction::If(OrdComparison::NE, far, ())),
        ];
        for _ in 0..11000 {
            elements.push(CodeElement::Instruction(Instruction::ILoad(0)));
            elements.push(CodeElement::Instruction(Instruction::ILoad(0)));
            elements.push(CodeElement::Instruction(Instruction::Pop2));
        }
        elements.push(CodeElement::Instruction(Instruction::IConst0));
        elements.push(CodeElement::Branch(BranchInstruction::IReturn));
        elements.push(CodeElement::Label(far));
        elements.push(CodeElement::Instruction(Instruction::IConst1));
        elements.push(CodeElement::Branch(BranchInstruction::IReturn));

        let (code, _) = fixture
            .assemble(&elements, &mut generator.clone(), &Options::default())
            .unwrap();
        // `ifne +6; goto +8; goto_w far`: the condition still leads to `far`
        assert_eq!(&code.code_array[1..4], &[0x9a, 0x00, 0x06]);
        assert_eq!(&code.code_array[4..7], &[0xa7, 0x00, 0x08]);
        assert_eq!(code.code_array[7], 0xc8);

        let fail = Options {
            short_jumps: ShortJumps::Fail,
            ..Options::default()
        };
        assert!(matches!(
            fixture.assemble(&elements, &mut generator, &fail),
            Err(Error::ShortJumpOverflow { offset: 1, .. })
        ));
    }
}
