use crate::code::{
    BranchInstruction, CodeElement, DeclaredFrame, Label, LabelGenerator, SymbolicInstruction,
};
use crate::errors::Error;
use crate::names::BinaryName;
use crate::util::{Offset, OffsetVec, Width};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A JVM method code body is made up of a linear sequence of basic blocks.
///
/// We also store some extra information that ultimately allows us to compute things like: the
/// maximum height of the locals, the maximum height of the stack, and the stack map frames.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct BasicBlock<Frame, Insn, BrInsn> {
    /// Frame at the start of the block
    pub frame: Frame,

    /// Straight-line instructions in the block
    pub instructions: OffsetVec<Insn>,

    /// Branch instruction to close the block
    pub branch_end: BrInsn,
}

impl<Frame, Insn: Width, BrInsn: Width> Width for BasicBlock<Frame, Insn, BrInsn> {
    fn width(&self) -> usize {
        self.instructions.offset_len().0 + self.branch_end.width()
    }
}

impl<Frame, Insn: Width, BrInsn: Width> BasicBlock<Frame, Insn, BrInsn> {
    /// Given an expected order of blocks, compute the offset of every basic block with respect to
    /// that start of the method.
    pub fn compute_block_offsets<Lbl: Copy + Eq + Hash>(
        block_layout_order: &[Lbl],
        blocks: &HashMap<Lbl, BasicBlock<Frame, Insn, BrInsn>>,
    ) -> HashMap<Lbl, Offset> {
        let mut block_offsets: HashMap<Lbl, Offset> = HashMap::new();
        let mut offset = Offset(0);
        for block_lbl in block_layout_order {
            block_offsets.insert(*block_lbl, offset);
            offset.0 += blocks[block_lbl].width();
        }
        block_offsets
    }
}

/// Block of symbolic instructions, before operands are resolved into the constant pool
///
/// Unlike [`BasicBlock`], the width of these instructions is not yet known (`ldc` gets shorter
/// for low constant indices), so they are kept in a plain vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicBlock {
    pub instructions: Vec<SymbolicInstruction>,
    pub branch_end: BranchInstruction<Label, Label, Label>,
}

/// Exception handler range whose labels have been resolved to blocks
#[derive(Debug, Clone, PartialEq)]
pub struct CatchRange {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub catch_type: Option<BinaryName>,
}

/// Code element stream cut up into basic blocks
#[derive(Debug, Default)]
pub struct SplitCode {
    pub blocks: HashMap<Label, SymbolicBlock>,

    /// Layout order of the blocks (the first one is the method entry)
    pub block_order: Vec<Label>,

    /// Block at which every label bound inside the body starts
    pub block_of: HashMap<Label, Label>,

    /// Labels bound after the last instruction
    pub end_labels: HashSet<Label>,

    /// `(block, instruction index, line)`, where an index equal to the number of instructions
    /// refers to the block's branch instruction
    pub line_numbers: Vec<(Label, usize, u16)>,

    /// Frames declared by `StackMap` elements, keyed by the block they describe
    pub declared_frames: HashMap<Label, DeclaredFrame>,

    /// Exception handlers, in element order (which is also their priority)
    pub catches: Vec<CatchRange>,

    /// `LocalVariable` and `LocalVariableType` elements, in element order
    pub local_variables: Vec<CodeElement>,
}

/// Where a label points after splitting
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Position {
    Block(Label),
    End,
}

impl SplitCode {
    /// Resolve a label to the block it starts (or the end of the code)
    pub fn position(&self, label: Label) -> Result<Position, Error> {
        if let Some(block) = self.block_of.get(&label) {
            Ok(Position::Block(*block))
        } else if self.end_labels.contains(&label) {
            Ok(Position::End)
        } else {
            Err(Error::UnboundLabel(label))
        }
    }

    /// Index of the block in the layout order (the end of the code is one past the last block)
    pub fn order_index(&self, position: Position) -> usize {
        match position {
            Position::End => self.block_order.len(),
            Position::Block(block) => self
                .block_order
                .iter()
                .position(|lbl| *lbl == block)
                .unwrap_or(self.block_order.len()),
        }
    }

    /// Blocks whose branch jumps (not falls through) to the end of the code
    pub fn jumps_to_end(&self) -> Vec<Label> {
        self.block_order
            .iter()
            .copied()
            .filter(|lbl| {
                self.blocks[lbl]
                    .branch_end
                    .jump_targets()
                    .targets()
                    .iter()
                    .any(|target| self.end_labels.contains(target))
            })
            .collect()
    }

    /// Split a code element stream into basic blocks
    ///
    /// Labels always start a new block (consecutive labels all alias the same block) so that every
    /// jump target is the start of a block. Branch targets are rewritten to the label of the block
    /// they start. Every block ends with a branch instruction, and labels bound after the last one
    /// mark the end of the code.
    pub fn split(
        elements: &[CodeElement],
        label_generator: &mut impl LabelGenerator<Label>,
    ) -> Result<SplitCode, Error> {
        let mut splitter = Splitter {
            split: SplitCode::default(),
            open: None,
            awaiting_next: None,
        };

        for element in elements {
            match element {
                CodeElement::Label(label) => splitter.bind(*label)?,
                CodeElement::Instruction(insn) => {
                    splitter.open_block(label_generator).instructions.push(insn.clone());
                }
                CodeElement::Branch(BranchInstruction::FallThrough(())) => (),
                CodeElement::Branch(branch) => {
                    splitter.open_block(label_generator);
                    splitter.close(branch.clone());
                }
                CodeElement::LineNumber(line) => {
                    let block = splitter.open_block(label_generator);
                    let position = (block.label, block.instructions.len(), *line);
                    splitter.split.line_numbers.push(position);
                }
                CodeElement::StackMap(frame) => {
                    if splitter
                        .open
                        .as_ref()
                        .map_or(false, |block| !block.instructions.is_empty())
                    {
                        let next = label_generator.fresh_label();
                        splitter.bind(next)?;
                    }
                    let block = splitter.open_block(label_generator).label;
                    splitter.split.declared_frames.insert(block, frame.clone());
                }
                CodeElement::ExceptionCatch {
                    start,
                    end,
                    handler,
                    catch_type,
                } => splitter.split.catches.push(CatchRange {
                    start: *start,
                    end: *end,
                    handler: *handler,
                    catch_type: catch_type.clone(),
                }),
                CodeElement::LocalVariable { .. } | CodeElement::LocalVariableType { .. } => {
                    splitter.split.local_variables.push(element.clone())
                }
            }
        }

        splitter.finish()
    }
}

struct OpenBlock {
    label: Label,
    instructions: Vec<SymbolicInstruction>,
}

struct Splitter {
    split: SplitCode,

    /// Block currently accumulating instructions
    open: Option<OpenBlock>,

    /// Block ended by a conditional branch, waiting for the label of the next block
    awaiting_next: Option<(Label, Vec<SymbolicInstruction>, BranchInstruction<Label, Label, ()>)>,
}

impl Splitter {
    fn bind(&mut self, label: Label) -> Result<(), Error> {
        if self.split.block_of.contains_key(&label) {
            return Err(Error::DuplicateLabel(label));
        }
        match self.open.take() {
            Some(open) if open.instructions.is_empty() => {
                self.split.block_of.insert(label, open.label);
                self.open = Some(open);
            }
            Some(open) => {
                self.insert_block(
                    open.label,
                    open.instructions,
                    BranchInstruction::FallThrough(label),
                );
                self.start_block(label);
            }
            None => self.start_block(label),
        }
        Ok(())
    }

    fn start_block(&mut self, label: Label) {
        if let Some((from, instructions, branch)) = self.awaiting_next.take() {
            let branch = branch.map_labels(|lbl| *lbl, |lbl| *lbl, |()| label);
            self.insert_block(from, instructions, branch);
        }
        self.split.block_of.insert(label, label);
        self.open = Some(OpenBlock {
            label,
            instructions: vec![],
        });
    }

    fn open_block(&mut self, label_generator: &mut impl LabelGenerator<Label>) -> &mut OpenBlock {
        if self.open.is_none() {
            let label = label_generator.fresh_label();
            self.start_block(label);
        }
        self.open.get_or_insert_with(|| OpenBlock {
            label: Label::START,
            instructions: vec![],
        })
    }

    fn close(&mut self, branch: BranchInstruction<Label, Label, ()>) {
        if let Some(open) = self.open.take() {
            if branch.fallthrough_target().is_some() {
                self.awaiting_next = Some((open.label, open.instructions, branch));
            } else {
                let branch = branch.map_labels(|lbl| *lbl, |lbl| *lbl, |()| open.label);
                self.insert_block(open.label, open.instructions, branch);
            }
        }
    }

    fn insert_block(
        &mut self,
        label: Label,
        instructions: Vec<SymbolicInstruction>,
        branch_end: BranchInstruction<Label, Label, Label>,
    ) {
        self.split.block_order.push(label);
        self.split.blocks.insert(
            label,
            SymbolicBlock {
                instructions,
                branch_end,
            },
        );
    }

    fn finish(mut self) -> Result<SplitCode, Error> {
        if self.awaiting_next.is_some() {
            return Err(Error::FallsOffEnd);
        }
        match self.open.take() {
            Some(open) if open.instructions.is_empty() => {
                if self.split.blocks.is_empty() {
                    return Err(Error::FallsOffEnd);
                }
                self.split
                    .line_numbers
                    .retain(|(block, _, _)| *block != open.label);
                let aliases: Vec<Label> = self
                    .split
                    .block_of
                    .iter()
                    .filter(|(_, block)| **block == open.label)
                    .map(|(label, _)| *label)
                    .collect();
                for alias in aliases {
                    self.split.block_of.remove(&alias);
                    self.split.end_labels.insert(alias);
                }
                self.split.declared_frames.remove(&open.label);
            }
            Some(_) => return Err(Error::FallsOffEnd),
            None if self.split.blocks.is_empty() => return Err(Error::FallsOffEnd),
            None => (),
        }

        // Point every branch at the block its target label starts
        let split = &mut self.split;
        let mut blocks = HashMap::with_capacity(split.blocks.len());
        for (label, mut block) in split.blocks.drain() {
            let mut unbound = None;
            let remap = |lbl: &Label| -> Label {
                match split.block_of.get(lbl) {
                    Some(block) => *block,
                    None => {
                        if !split.end_labels.contains(lbl) {
                            unbound.get_or_insert(*lbl);
                        }
                        *lbl
                    }
                }
            };
            let remap = std::cell::RefCell::new(remap);
            block.branch_end = block.branch_end.map_labels(
                |lbl| (*remap.borrow_mut())(lbl),
                |lbl| (*remap.borrow_mut())(lbl),
                |lbl| (*remap.borrow_mut())(lbl),
            );
            drop(remap);
            if let Some(lbl) = unbound {
                return Err(Error::UnboundLabel(lbl));
            }
            if let Some(next) = block.branch_end.fallthrough_target() {
                if split.end_labels.contains(&next) {
                    return Err(Error::FallsOffEnd);
                }
            }
            blocks.insert(label, block);
        }
        split.blocks = blocks;

        for catch in &split.catches {
            for label in [catch.start, catch.end, catch.handler] {
                split.position(label)?;
            }
        }
        for local in &split.local_variables {
            for label in local.labels() {
                split.position(label)?;
            }
        }

        Ok(self.split)
    }
}
