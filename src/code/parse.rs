use crate::class_file::{
    AttributeLike, ByteReader, Code, LineNumberTable, LocalVariableEntry, LocalVariableTable,
    LocalVariableTypeTable, RawVerificationType, StackMapTable,
};
use crate::code::decode::{decode_code, Decoded, DecodedInstruction};
use crate::code::{
    BranchInstruction, CodeElement, DeclaredFrame, Label, LabelGenerator, LabelSequence,
    SymbolicInstruction,
};
use crate::constant_pool::ConstantPool;
use crate::descriptors::{FieldType, MethodDescriptor, ParseDescriptor, RefType};
use crate::errors::{Error, MalformedKind};
use crate::names::{BinaryName, Name, UnqualifiedName};
use crate::options::{AttributeAction, DebugElements, Options};
use crate::verifier::{DeclaredType, Frame, FrameEntries, VerificationType};
use std::collections::{BTreeMap, HashMap};

/// What parsing and assembling code needs to know about the method it belongs to
#[derive(Debug, Clone, Copy)]
pub struct MethodShape<'a> {
    pub this_class: &'a BinaryName,
    pub name: &'a UnqualifiedName,
    pub descriptor: &'a MethodDescriptor,
    pub is_static: bool,
}

impl<'a> MethodShape<'a> {
    pub fn is_constructor(&self) -> bool {
        self.name == &UnqualifiedName::INIT
    }

    /// Frame on entry to the method
    pub fn entry_frame(&self) -> Frame {
        Frame::entry(
            self.this_class,
            self.is_static,
            self.is_constructor(),
            self.descriptor,
        )
    }

    /// Entry frame the way a `StackMapTable` implicitly starts from
    fn entry_declared(&self) -> FrameEntries<DeclaredType> {
        let mut locals = vec![];
        if !self.is_static {
            if self.is_constructor() && self.this_class != &BinaryName::OBJECT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(RefType::Object(
                    self.this_class.clone(),
                )));
            }
        }
        locals.extend(self.descriptor.parameters.iter().map(DeclaredType::from));
        FrameEntries {
            locals,
            stack: vec![],
        }
    }
}

/// Method body inflated into code elements
#[derive(Debug, Clone, PartialEq)]
pub struct CodeModel {
    pub elements: Vec<CodeElement>,

    /// As declared in the class file (recomputed when the code is assembled again)
    pub max_stack: u16,
    pub max_locals: u16,

    /// Every label in `elements` is below this one
    pub label_count: u32,
}

impl CodeModel {
    /// Generator for labels that don't clash with the ones already in the elements
    pub fn label_generator(&self) -> LabelSequence {
        LabelSequence::new(Label(self.label_count))
    }

    pub fn instructions(&self) -> impl Iterator<Item = &CodeElement> + '_ {
        self.elements.iter().filter(|element| element.is_instruction())
    }
}

/// Turn a `Code` attribute into a stream of code elements
///
/// Labels are created for every branch target, exception handler boundary, local variable range
/// boundary, and `new` instruction referenced from a stack map frame. The elements at one offset
/// are always in the order: label, stack map frame, line numbers, instruction.
pub fn parse_code(
    code: &Code,
    constants: &ConstantPool,
    method: MethodShape,
    options: &Options,
) -> Result<CodeModel, Error> {
    let decoded = decode_code(&code.code_array)?;
    let mut parser = CodeParser {
        code_len: code.code_array.len(),
        instruction_offsets: decoded.iter().map(|insn| insn.offset).collect(),
        labels: BTreeMap::new(),
        label_generator: LabelSequence::new(Label::START),
    };
    let keep_debug = options.debug_elements == DebugElements::Pass;

    // Allocate labels for jump targets up front (in offset order, for readable label numbers)
    for insn in &decoded {
        if let Decoded::Branch(branch) = &insn.decoded {
            for target in branch.jump_targets().targets() {
                parser.label_at(*target)?;
            }
        }
    }

    let mut prefix: Vec<CodeElement> = vec![];
    for handler in &code.exception_table {
        let start = parser.label_at(handler.start_pc as usize)?;
        let end = parser.label_at(handler.end_pc as usize)?;
        let handler_label = parser.label_at(handler.handler_pc as usize)?;
        let catch_type = match handler.catch_type {
            Some(class) => Some(constants.class_name_at(class)?),
            None => None,
        };
        prefix.push(CodeElement::ExceptionCatch {
            start,
            end,
            handler: handler_label,
            catch_type,
        });
    }

    let mut frames: HashMap<usize, DeclaredFrame> = HashMap::new();
    let mut lines: HashMap<usize, Vec<u16>> = HashMap::new();
    for attribute in &code.attributes {
        let name = constants.utf8_at(attribute.name_index)?;
        let mut info = ByteReader::new(&attribute.info);
        match name {
            StackMapTable::NAME => {
                let table = StackMapTable::read_all(&mut info)?;
                frames = parser.expand_frames(&table, constants, method)?;
            }
            LineNumberTable::NAME if keep_debug => {
                for entry in LineNumberTable::read_all(&mut info)?.0 {
                    parser.check_offset(entry.start_pc as usize)?;
                    lines
                        .entry(entry.start_pc as usize)
                        .or_default()
                        .push(entry.line_number);
                }
            }
            LocalVariableTable::NAME if keep_debug => {
                for entry in LocalVariableTable::read_all(&mut info)?.0 {
                    let (start, end) = parser.range_labels(&entry)?;
                    prefix.push(CodeElement::LocalVariable {
                        slot: entry.index,
                        name: UnqualifiedName::from_str(constants.utf8_at(entry.name)?)?,
                        descriptor: FieldType::parse(constants.utf8_at(entry.descriptor)?)?,
                        start,
                        end,
                    });
                }
            }
            LocalVariableTypeTable::NAME if keep_debug => {
                for entry in LocalVariableTypeTable::read_all(&mut info)?.0 {
                    let (start, end) = parser.range_labels(&entry)?;
                    prefix.push(CodeElement::LocalVariableType {
                        slot: entry.index,
                        name: UnqualifiedName::from_str(constants.utf8_at(entry.name)?)?,
                        signature: constants.utf8_at(entry.descriptor)?.to_owned(),
                        start,
                        end,
                    });
                }
            }
            LineNumberTable::NAME | LocalVariableTable::NAME | LocalVariableTypeTable::NAME => (),

            // Code attributes refer to bytecode offsets, which don't survive re-assembly
            other => match options.attribute_resolver.resolve(other) {
                AttributeAction::Fail => return Err(Error::UnknownAttribute(other.to_owned())),
                _ => log::debug!("Dropping code attribute {}", other),
            },
        }
    }

    let mut elements = prefix;
    for DecodedInstruction {
        offset, decoded, ..
    } in decoded
    {
        if let Some(label) = parser.labels.get(&offset) {
            elements.push(CodeElement::Label(*label));
        }
        if let Some(frame) = frames.remove(&offset) {
            elements.push(CodeElement::StackMap(frame));
        }
        for line in lines.remove(&offset).unwrap_or_default() {
            elements.push(CodeElement::LineNumber(line));
        }
        elements.push(match decoded {
            Decoded::Instruction(insn) => {
                let insn: SymbolicInstruction = insn.map(
                    |class| constants.class_at(*class),
                    |constant| constants.loadable_at(*constant),
                    |field| constants.field_ref_at(*field),
                    |method| constants.method_ref_at(*method),
                    |indy| constants.invoke_dynamic_at(*indy),
                )?;
                CodeElement::Instruction(insn)
            }
            Decoded::Branch(branch) => CodeElement::Branch(parser.branch(&branch)?),
        });
    }
    if let Some(label) = parser.labels.get(&parser.code_len) {
        elements.push(CodeElement::Label(*label));
    }

    log::trace!(
        "Parsed {} bytes of code into {} elements",
        parser.code_len,
        elements.len()
    );
    Ok(CodeModel {
        elements,
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        label_count: parser.label_generator.count(),
    })
}

struct CodeParser {
    code_len: usize,

    /// Offsets at which an instruction starts (sorted)
    instruction_offsets: Vec<usize>,

    labels: BTreeMap<usize, Label>,
    label_generator: LabelSequence,
}

impl CodeParser {
    /// Ensure an offset is either the start of an instruction or the end of the code
    fn check_offset(&self, offset: usize) -> Result<(), Error> {
        if offset == self.code_len || self.instruction_offsets.binary_search(&offset).is_ok() {
            Ok(())
        } else {
            Err(Error::malformed(
                offset,
                MalformedKind::InvalidReference(format!(
                    "offset {} is not the start of an instruction",
                    offset
                )),
            ))
        }
    }

    fn label_at(&mut self, offset: usize) -> Result<Label, Error> {
        if let Some(label) = self.labels.get(&offset) {
            return Ok(*label);
        }
        self.check_offset(offset)?;
        let label = self.label_generator.fresh_label();
        self.labels.insert(offset, label);
        Ok(label)
    }

    fn range_labels(&mut self, entry: &LocalVariableEntry) -> Result<(Label, Label), Error> {
        let start = entry.start_pc as usize;
        let start_label = self.label_at(start)?;
        let end_label = self.label_at(start + entry.length as usize)?;
        Ok((start_label, end_label))
    }

    fn branch(
        &mut self,
        branch: &BranchInstruction<usize, usize, ()>,
    ) -> Result<BranchInstruction<Label, Label, ()>, Error> {
        // Every target got a label in the first pass
        let labels = &self.labels;
        let lookup = |offset: &usize| labels.get(offset).copied().unwrap_or(Label::START);
        Ok(match branch.map_labels(lookup, lookup, |_| ()) {
            BranchInstruction::GotoW(target) => BranchInstruction::Goto(target),
            BranchInstruction::JsrW(target, ()) => BranchInstruction::Jsr(target, ()),
            BranchInstruction::TableSwitch {
                default,
                low,
                targets,
                ..
            } => BranchInstruction::TableSwitch {
                padding: 0,
                default,
                low,
                targets,
            },
            BranchInstruction::LookupSwitch {
                default, targets, ..
            } => BranchInstruction::LookupSwitch {
                padding: 0,
                default,
                targets,
            },
            other => other,
        })
    }

    /// Turn the delta-encoded frames of a `StackMapTable` into the frame at every offset
    fn expand_frames(
        &mut self,
        table: &StackMapTable,
        constants: &ConstantPool,
        method: MethodShape,
    ) -> Result<HashMap<usize, DeclaredFrame>, Error> {
        let mut frames = HashMap::new();
        let mut previous = method.entry_declared();
        let mut offset: Option<usize> = None;

        for frame in &table.0 {
            let this_offset = match offset {
                None => frame.offset_delta() as usize,
                Some(previous_offset) => previous_offset + frame.offset_delta() as usize + 1,
            };
            if this_offset >= self.code_len {
                return Err(Error::malformed(
                    this_offset,
                    MalformedKind::InvalidReference(format!(
                        "stack map frame at {} is past the end of the code",
                        this_offset
                    )),
                ));
            }
            self.check_offset(this_offset)?;

            let convert = |raw: &RawVerificationType| -> Result<DeclaredType, Error> {
                raw.map(
                    |class| constants.class_at(*class),
                    |new_offset| self.label_at(*new_offset as usize),
                )
            };
            let expanded = match previous.apply(frame, convert)? {
                Some(expanded) => expanded,
                None => {
                    return Err(Error::malformed(
                        this_offset,
                        MalformedKind::InvalidReference(String::from(
                            "stack map frame chops more locals than there are",
                        )),
                    ))
                }
            };
            frames.insert(
                this_offset,
                DeclaredFrame {
                    locals: expanded.locals.clone(),
                    stack: expanded.stack.clone(),
                },
            );
            previous = expanded;
            offset = Some(this_offset);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class_file::{ExceptionHandler, StackMapFrame};
    use crate::code::{Instruction, OrdComparison};

    fn shape<'a>(
        this_class: &'a BinaryName,
        name: &'a UnqualifiedName,
        descriptor: &'a MethodDescriptor,
    ) -> MethodShape<'a> {
        MethodShape {
            this_class,
            name,
            descriptor,
            is_static: true,
        }
    }

    #[test]
    fn branches_get_labels_and_frames() {
        let mut constants = ConstantPool::new();
        let stack_map_name = constants.get_utf8("StackMapTable").unwrap();

        // iload_0; bipush 10; if_icmpge +5; iconst_1; ireturn; iconst_2; ireturn
        let code_array = vec![0x1a, 0x10, 10, 0xa2, 0, 5, 0x04, 0xac, 0x05, 0xac];
        let mut frame_info = vec![];
        crate::class_file::Serialize::serialize(
            &StackMapTable(vec![StackMapFrame::SameLocalsNoStack { offset_delta: 8 }]),
            &mut frame_info,
        )
        .unwrap();
        let code = Code {
            max_stack: 2,
            max_locals: 1,
            code_array,
            exception_table: vec![],
            attributes: vec![crate::class_file::Attribute {
                name_index: stack_map_name,
                info: frame_info,
            }],
        };

        let this_class = BinaryName::from_str("Foo").unwrap();
        let name = UnqualifiedName::from_str("m").unwrap();
        let descriptor = MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::int()));
        let model = parse_code(
            &code,
            &constants,
            shape(&this_class, &name, &descriptor),
            &Options::default(),
        )
        .unwrap();

        let target = Label(0);
        assert_eq!(model.label_count, 1);
        assert_eq!(
            model.elements,
            vec![
                CodeElement::Instruction(Instruction::ILoad(0)),
                CodeElement::Instruction(Instruction::BiPush(10)),
                CodeElement::Branch(BranchInstruction::IfICmp(OrdComparison::GE, target, ())),
                CodeElement::Instruction(Instruction::IConst1),
                CodeElement::Branch(BranchInstruction::IReturn),
                CodeElement::Label(target),
                CodeElement::StackMap(DeclaredFrame {
                    locals: vec![VerificationType::Integer],
                    stack: vec![],
                }),
                CodeElement::Instruction(Instruction::IConst2),
                CodeElement::Branch(BranchInstruction::IReturn),
            ]
        );
    }

    #[test]
    fn handlers_may_end_at_the_end_of_the_code() {
        let constants = ConstantPool::new();
        // aconst_null; athrow; astore_0; return
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            code_array: vec![0x01, 0xbf, 0x4b, 0xb1],
            exception_table: vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 4,
                handler_pc: 2,
                catch_type: None,
            }],
            attributes: vec![],
        };
        let this_class = BinaryName::from_str("Foo").unwrap();
        let name = UnqualifiedName::from_str("m").unwrap();
        let descriptor = MethodDescriptor::new(vec![], None);
        let model = parse_code(
            &code,
            &constants,
            shape(&this_class, &name, &descriptor),
            &Options::default(),
        )
        .unwrap();

        match &model.elements[0] {
            CodeElement::ExceptionCatch {
                start,
                end,
                handler,
                catch_type: None,
            } => {
                assert_eq!(model.elements.last(), Some(&CodeElement::Label(*end)));
                assert_eq!(model.elements[1], CodeElement::Label(*start));
                assert!(model.elements.contains(&CodeElement::Label(*handler)));
            }
            other => panic!("expected a catch-all handler first, got {:?}", other),
        }
    }

    #[test]
    fn misaligned_targets_are_malformed() {
        let constants = ConstantPool::new();
        // goto +2 lands in the middle of the goto itself
        let code = Code {
            max_stack: 0,
            max_locals: 0,
            code_array: vec![0xa7, 0, 2, 0xb1],
            exception_table: vec![],
            attributes: vec![],
        };
        let this_class = BinaryName::from_str("Foo").unwrap();
        let name = UnqualifiedName::from_str("m").unwrap();
        let descriptor = MethodDescriptor::new(vec![], None);
        assert!(matches!(
            parse_code(
                &code,
                &constants,
                shape(&this_class, &name, &descriptor),
                &Options::default()
            ),
            Err(Error::Malformed { offset: 2, .. })
        ));
    }
}
