use crate::code::{BranchInstruction, CodeBuilder, CodeElement, Label};
use crate::descriptors::{FieldType, MethodDescriptor};
use crate::errors::Error;
use crate::transform::{ElementSink, Transform};
use crate::util::Width;
use std::collections::HashMap;

/// Code transform that replaces every label by a fresh one from the target builder
///
/// This is what makes it possible to splice code from one method into another without the labels
/// of both colliding.
#[derive(Debug, Default)]
pub struct LabelRemapper {
    labels: HashMap<Label, Label>,
}

impl LabelRemapper {
    pub fn new() -> LabelRemapper {
        LabelRemapper::default()
    }
}

impl Transform<CodeBuilder, CodeElement> for LabelRemapper {
    fn accept(&mut self, builder: &mut CodeBuilder, element: CodeElement) -> Result<(), Error> {
        let labels = &mut self.labels;
        let element =
            element.map_labels(|label| *labels.entry(label).or_insert_with(|| builder.new_label()));
        builder.with(element)?;
        Ok(())
    }
}

/// Code transform moving every local variable above the parameters to a freshly allocated slot
///
/// Which slots are parameters is decided by the method the code comes from: its receiver and
/// parameter slots keep their numbers. Declared stack map frames are dropped since they describe
/// the old slot layout (frames are recomputed when the code is assembled).
#[derive(Debug)]
pub struct LocalsShifter {
    /// Receiver and parameter slots of the source method
    parameter_slots: u16,

    /// Old slot and width to new slot
    slots: HashMap<(u16, usize), u16>,
}

impl LocalsShifter {
    /// Shifter for code taken from a method with this descriptor
    pub fn new(descriptor: &MethodDescriptor, is_static: bool) -> LocalsShifter {
        LocalsShifter {
            parameter_slots: descriptor.parameter_length(!is_static) as u16,
            slots: HashMap::new(),
        }
    }

    fn shift(&mut self, builder: &mut CodeBuilder, slot: u16, width: usize) -> Result<u16, Error> {
        if slot < self.parameter_slots {
            return Ok(slot);
        }
        if let Some(shifted) = self.slots.get(&(slot, width)) {
            return Ok(*shifted);
        }
        let typ = if width == 2 {
            FieldType::long()
        } else {
            FieldType::int()
        };
        let shifted = builder.allocate_local(&typ)?;
        self.slots.insert((slot, width), shifted);
        Ok(shifted)
    }
}

impl Transform<CodeBuilder, CodeElement> for LocalsShifter {
    fn accept(&mut self, builder: &mut CodeBuilder, element: CodeElement) -> Result<(), Error> {
        let element = match element {
            CodeElement::Instruction(insn) => match insn.local_slot() {
                Some((slot, width)) => {
                    let shifted = self.shift(builder, slot, width)?;
                    CodeElement::Instruction(insn.with_local_slot(shifted).unwrap_or(insn))
                }
                None => CodeElement::Instruction(insn),
            },
            CodeElement::Branch(BranchInstruction::Ret(slot)) => {
                CodeElement::Branch(BranchInstruction::Ret(self.shift(builder, slot, 1)?))
            }
            CodeElement::LocalVariable {
                slot,
                name,
                descriptor,
                start,
                end,
            } => CodeElement::LocalVariable {
                slot: self.shift(builder, slot, descriptor.width())?,
                name,
                descriptor,
                start,
                end,
            },
            CodeElement::LocalVariableType {
                slot,
                name,
                signature,
                start,
                end,
            } => {
                // The matching `LocalVariable` entry has already fixed the width of the slot
                let width = if self.slots.contains_key(&(slot, 2)) { 2 } else { 1 };
                CodeElement::LocalVariableType {
                    slot: self.shift(builder, slot, width)?,
                    name,
                    signature,
                    start,
                    end,
                }
            }
            CodeElement::StackMap(_) => return Ok(()),
            other => other,
        };
        builder.with(element)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::code::Instruction;
    use crate::transform::Pipeline;

    fn source_descriptor() -> MethodDescriptor {
        MethodDescriptor::new(vec![FieldType::int()], None)
    }

    fn source() -> Vec<CodeElement> {
        let mut code = CodeBuilder::new(&source_descriptor(), true);
        code.iload(0)
            .unwrap()
            .istore(1)
            .unwrap()
            .lconst(0)
            .unwrap()
            .lstore(2)
            .unwrap()
            .iinc(1, 1)
            .unwrap();
        let top = code.new_label();
        code.bind(top).unwrap().goto(top).unwrap();
        code.elements().to_vec()
    }

    #[test]
    fn labels_are_remapped_consistently() {
        let mut target = CodeBuilder::new(&MethodDescriptor::new(vec![], None), true);
        let taken = target.new_label();
        target.bind(taken).unwrap();

        let mut target = target.with_pipeline(Pipeline::new(LabelRemapper::new()));
        target.run(source()).unwrap();

        let labels: Vec<Label> = target
            .elements()
            .iter()
            .filter_map(|element| match element {
                CodeElement::Label(label) => Some(*label),
                _ => None,
            })
            .collect();
        assert_eq!(labels.len(), 2);
        assert_ne!(labels[0], labels[1], "copied label doesn't clash with the existing one");
        assert!(matches!(
            target.elements().last(),
            Some(CodeElement::Branch(BranchInstruction::Goto(label))) if *label == labels[1]
        ));
        assert!(target.finish().is_ok());
    }

    #[test]
    fn locals_move_above_existing_ones() {
        let mut target = CodeBuilder::new(&MethodDescriptor::new(vec![FieldType::int()], None), true);
        let existing = target.allocate_local(&FieldType::double()).unwrap();
        assert_eq!(existing, 1);

        let shifter = LocalsShifter::new(&source_descriptor(), true);
        let mut target = target.with_pipeline(Pipeline::new(shifter));
        target.run(source()).unwrap();

        let slots: Vec<Instruction<_, _, _, _, _>> = target
            .elements()
            .iter()
            .filter_map(|element| match element {
                CodeElement::Instruction(insn) if insn.local_slot().is_some() => Some(insn.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            slots,
            vec![
                Instruction::ILoad(0),
                Instruction::IStore(3),
                Instruction::LStore(4),
                Instruction::IInc(3, 1),
            ],
            "parameters stay put, locals get fresh slots"
        );
    }

    #[test]
    fn parameters_are_those_of_the_source_method() {
        // The target has more parameter slots than the source: slot 1 is a local of the source
        let wide = MethodDescriptor::new(vec![FieldType::long()], None);
        let target = CodeBuilder::new(&wide, false);
        assert_eq!(target.parameter_slots(), 3);

        let shifter = LocalsShifter::new(&source_descriptor(), true);
        let mut target = target.with_pipeline(Pipeline::new(shifter));
        target
            .run(vec![
                CodeElement::Instruction(Instruction::ILoad(0)),
                CodeElement::Instruction(Instruction::IStore(1)),
            ])
            .unwrap();
        assert_eq!(
            target.elements(),
            &[
                CodeElement::Instruction(Instruction::ILoad(0)),
                CodeElement::Instruction(Instruction::IStore(3)),
            ]
        );
    }
}
