use crate::code::{BranchInstruction, Label, SymbolicInstruction};
use crate::descriptors::FieldType;
use crate::names::{BinaryName, UnqualifiedName};
use crate::verifier::DeclaredType;

/// One entry of a method body, as produced by parsing and consumed by the code builder
///
/// Besides real instructions, the stream contains pseudo-elements which mark positions or carry
/// metadata about ranges of code. Their position in the stream is what gives them meaning: a
/// `Label` stands for the offset of whatever instruction comes next, a `LineNumber` applies to
/// the instruction that follows it.
#[derive(Clone, Debug, PartialEq)]
pub enum CodeElement {
    /// Straight-line instruction
    Instruction(SymbolicInstruction),

    /// Instruction that ends a basic block
    ///
    /// The fallthrough label is implicit (it is whatever comes next in the stream), and the
    /// distinction between short and wide jumps is made when the code is assembled: parsed
    /// `goto_w` and `jsr_w` show up as `Goto` and `Jsr`.
    Branch(BranchInstruction<Label, Label, ()>),

    /// Bind a label to the current position
    Label(Label),

    /// Exception handler covering `start` (inclusive) to `end` (exclusive)
    ExceptionCatch {
        start: Label,
        end: Label,
        handler: Label,

        /// `None` catches everything (used for `finally`)
        catch_type: Option<BinaryName>,
    },

    LocalVariable {
        slot: u16,
        name: UnqualifiedName,
        descriptor: FieldType,
        start: Label,
        end: Label,
    },

    LocalVariableType {
        slot: u16,
        name: UnqualifiedName,
        signature: String,
        start: Label,
        end: Label,
    },

    /// Source line of the next instruction
    LineNumber(u16),

    /// Frame declared by a parsed `StackMapTable` for the next instruction
    ///
    /// These are only read by the verifier: frames are always recomputed when code is assembled.
    StackMap(DeclaredFrame),
}

/// Locals and stack of a stack map frame, as written in the class file (`long` and `double`
/// locals take one entry)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredFrame {
    pub locals: Vec<DeclaredType>,
    pub stack: Vec<DeclaredType>,
}

impl CodeElement {
    /// Is this a debugging element (dropped when debug elements are not passed through)?
    pub fn is_debug(&self) -> bool {
        matches!(
            self,
            CodeElement::LineNumber(_)
                | CodeElement::LocalVariable { .. }
                | CodeElement::LocalVariableType { .. }
        )
    }

    /// Is this element an actual instruction (as opposed to a pseudo-element)?
    pub fn is_instruction(&self) -> bool {
        matches!(self, CodeElement::Instruction(_) | CodeElement::Branch(_))
    }

    /// Every label mentioned by the element
    pub fn labels(&self) -> Vec<Label> {
        let mut labels = vec![];
        self.clone().map_labels(|label| {
            labels.push(label);
            label
        });
        labels
    }

    /// Rewrite every label mentioned by the element
    pub fn map_labels(self, mut map: impl FnMut(Label) -> Label) -> CodeElement {
        match self {
            CodeElement::Instruction(insn) => CodeElement::Instruction(insn),
            CodeElement::Branch(branch) => {
                let map = std::cell::RefCell::new(&mut map);
                CodeElement::Branch(branch.map_labels(
                    |lbl| (*map.borrow_mut())(*lbl),
                    |lbl| (*map.borrow_mut())(*lbl),
                    |_| (),
                ))
            }
            CodeElement::Label(label) => CodeElement::Label(map(label)),
            CodeElement::ExceptionCatch {
                start,
                end,
                handler,
                catch_type,
            } => CodeElement::ExceptionCatch {
                start: map(start),
                end: map(end),
                handler: map(handler),
                catch_type,
            },
            CodeElement::LocalVariable {
                slot,
                name,
                descriptor,
                start,
                end,
            } => CodeElement::LocalVariable {
                slot,
                name,
                descriptor,
                start: map(start),
                end: map(end),
            },
            CodeElement::LocalVariableType {
                slot,
                name,
                signature,
                start,
                end,
            } => CodeElement::LocalVariableType {
                slot,
                name,
                signature,
                start: map(start),
                end: map(end),
            },
            CodeElement::LineNumber(line) => CodeElement::LineNumber(line),
            CodeElement::StackMap(frame) => {
                let mut map_type = |typ: DeclaredType| match typ {
                    DeclaredType::Uninitialized(label) => DeclaredType::Uninitialized(map(label)),
                    other => other,
                };
                let locals = frame.locals.into_iter().map(&mut map_type).collect();
                let stack = frame.stack.into_iter().map(&mut map_type).collect();
                CodeElement::StackMap(DeclaredFrame { locals, stack })
            }
        }
    }
}

impl From<SymbolicInstruction> for CodeElement {
    fn from(insn: SymbolicInstruction) -> CodeElement {
        CodeElement::Instruction(insn)
    }
}

impl From<BranchInstruction<Label, Label, ()>> for CodeElement {
    fn from(branch: BranchInstruction<Label, Label, ()>) -> CodeElement {
        CodeElement::Branch(branch)
    }
}

impl From<Label> for CodeElement {
    fn from(label: Label) -> CodeElement {
        CodeElement::Label(label)
    }
}
