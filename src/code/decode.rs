//! Decoding of the bytecode array
//!
//! This is the inverse of the `Serialize` implementations for [`SerializableInstruction`] and
//! [`BranchInstruction`]: short forms and `wide` prefixes are folded back into the instructions
//! they modify, and relative jump offsets become absolute offsets into the code array.

use crate::class_file::{
    ByteReader, ClassConstantIndex, ConstantIndex, FieldRefConstantIndex,
    InvokeDynamicConstantIndex, MethodRefConstantIndex,
};
use crate::code::{
    array_type_from_code, BranchInstruction, EqComparison, Instruction, InvokeType, OrdComparison,
    SerializableInstruction, WIDE,
};
use crate::errors::{Error, MalformedKind};
use std::fmt::Write;

/// Branch whose targets are absolute offsets into the code array
pub type DecodedBranch = BranchInstruction<usize, usize, ()>;

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Instruction(SerializableInstruction),
    Branch(DecodedBranch),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedInstruction {
    /// Offset of the opcode from the start of the code array
    pub offset: usize,
    pub width: usize,
    pub decoded: Decoded,
}

/// Decode the whole code array
pub fn decode_code(code: &[u8]) -> Result<Vec<DecodedInstruction>, Error> {
    let mut reader = ByteReader::new(code);
    let mut decoded = vec![];
    while reader.remaining() > 0 {
        let offset = reader.position();
        let insn = decode_instruction(&mut reader, code.len())?;
        decoded.push(DecodedInstruction {
            offset,
            width: reader.position() - offset,
            decoded: insn,
        });
    }
    Ok(decoded)
}

/// Render the instructions around `focus` (for diagnostics)
///
/// Decoding stops quietly at the first undecodable instruction.
pub fn disassemble(code: &[u8], focus: usize) -> String {
    const CONTEXT: usize = 3;

    let mut reader = ByteReader::new(code);
    let mut lines: Vec<(usize, String)> = vec![];
    while reader.remaining() > 0 {
        let offset = reader.position();
        match decode_instruction(&mut reader, usize::MAX) {
            Ok(Decoded::Instruction(insn)) => lines.push((offset, format!("{:?}", insn))),
            Ok(Decoded::Branch(branch)) => lines.push((offset, format!("{:?}", branch))),
            Err(_) => {
                lines.push((offset, String::from("<undecodable>")));
                break;
            }
        }
    }

    let focus_idx = lines
        .iter()
        .rposition(|(offset, _)| *offset <= focus)
        .unwrap_or(0);
    let from = focus_idx.saturating_sub(CONTEXT);
    let until = (focus_idx + CONTEXT + 1).min(lines.len());

    let mut out = String::new();
    for (idx, (offset, text)) in lines[from..until].iter().enumerate() {
        let marker = if from + idx == focus_idx { "->" } else { "  " };
        let _ = writeln!(out, "{} {:5}: {}", marker, offset, text);
    }
    out
}

fn relative(
    reader: &ByteReader,
    opcode_offset: usize,
    delta: i64,
    code_len: usize,
) -> Result<usize, Error> {
    let target = opcode_offset as i64 + delta;
    if target < 0 || target as u64 >= code_len as u64 {
        return Err(reader.error(MalformedKind::InvalidReference(format!(
            "jump at {} targets {}, outside of the code",
            opcode_offset, target
        ))));
    }
    Ok(target as usize)
}

fn class(reader: &mut ByteReader) -> Result<ClassConstantIndex, Error> {
    ClassConstantIndex::read(reader)
}

fn decode_instruction(reader: &mut ByteReader, code_len: usize) -> Result<Decoded, Error> {
    use Instruction::*;

    let at = reader.position();
    let opcode = reader.u8()?;

    if let Some(insn) = Instruction::from_single_byte_opcode(opcode)
        .or_else(|| Instruction::from_short_local_access(opcode))
    {
        return Ok(Decoded::Instruction(insn));
    }
    if let Some(branch) = BranchInstruction::from_plain_opcode(opcode) {
        return Ok(Decoded::Branch(branch));
    }

    let insn: SerializableInstruction = match opcode {
        0x10 => BiPush(reader.i8()?),
        0x11 => SiPush(reader.i16()?),
        0x12 => Ldc(ConstantIndex(reader.u8()? as u16)),
        0x13 => Ldc(ConstantIndex::read(reader)?),
        0x14 => Ldc2(ConstantIndex::read(reader)?),
        0x15..=0x19 | 0x36..=0x3a => {
            let slot = reader.u8()? as u16;
            local_access(opcode, slot, at)?
        }
        0x84 => {
            let slot = reader.u8()? as u16;
            IInc(slot, reader.i8()? as i16)
        }
        0x99..=0xb1 | 0xc6..=0xc9 => {
            return decode_branch(reader, opcode, at, code_len).map(Decoded::Branch)
        }
        0xb2 => GetStatic(FieldRefConstantIndex::read(reader)?),
        0xb3 => PutStatic(FieldRefConstantIndex::read(reader)?),
        0xb4 => GetField(FieldRefConstantIndex::read(reader)?),
        0xb5 => PutField(FieldRefConstantIndex::read(reader)?),
        0xb6 => Invoke(InvokeType::Virtual, MethodRefConstantIndex::read(reader)?),
        0xb7 => Invoke(InvokeType::Special, MethodRefConstantIndex::read(reader)?),
        0xb8 => Invoke(InvokeType::Static, MethodRefConstantIndex::read(reader)?),
        0xb9 => {
            let method = MethodRefConstantIndex::read(reader)?;
            let count = reader.u8()?;
            let _zero = reader.u8()?;
            Invoke(InvokeType::Interface(count), method)
        }
        0xba => {
            let indy = InvokeDynamicConstantIndex::read(reader)?;
            let _zero = reader.u16()?;
            InvokeDynamic(indy)
        }
        0xbb => New(class(reader)?),
        0xbc => {
            let code = reader.u8()?;
            match array_type_from_code(code) {
                Some(base_type) => NewArray(base_type),
                None => {
                    return Err(reader.error(MalformedKind::InvalidReference(format!(
                        "newarray type code {}",
                        code
                    ))))
                }
            }
        }
        0xbd => ANewArray(class(reader)?),
        0xc0 => CheckCast(class(reader)?),
        0xc1 => InstanceOf(class(reader)?),
        WIDE => {
            let modified = reader.u8()?;
            match modified {
                0x15..=0x19 | 0x36..=0x3a => {
                    let slot = reader.u16()?;
                    local_access(modified, slot, at)?
                }
                0x84 => {
                    let slot = reader.u16()?;
                    IInc(slot, reader.i16()?)
                }
                0xa9 => return Ok(Decoded::Branch(BranchInstruction::Ret(reader.u16()?))),
                other => {
                    return Err(Error::malformed(at, MalformedKind::UnknownOpcode(other)))
                }
            }
        }
        0xc5 => {
            let class = class(reader)?;
            MultiANewArray(class, reader.u8()?)
        }
        other => return Err(Error::malformed(at, MalformedKind::UnknownOpcode(other))),
    };
    Ok(Decoded::Instruction(insn))
}

fn local_access(opcode: u8, slot: u16, at: usize) -> Result<SerializableInstruction, Error> {
    Instruction::from_local_access(opcode, slot)
        .ok_or_else(|| Error::malformed(at, MalformedKind::UnknownOpcode(opcode)))
}

fn decode_branch(
    reader: &mut ByteReader,
    opcode: u8,
    at: usize,
    code_len: usize,
) -> Result<DecodedBranch, Error> {
    use BranchInstruction::*;

    let short = |reader: &mut ByteReader| -> Result<usize, Error> {
        let delta = reader.i16()? as i64;
        relative(reader, at, delta, code_len)
    };

    Ok(match opcode {
        0x99..=0x9e => If(OrdComparison::ALL[(opcode - 0x99) as usize], short(reader)?, ()),
        0x9f..=0xa4 => IfICmp(OrdComparison::ALL[(opcode - 0x9f) as usize], short(reader)?, ()),
        0xa5..=0xa6 => IfACmp(EqComparison::ALL[(opcode - 0xa5) as usize], short(reader)?, ()),
        0xa7 => Goto(short(reader)?),
        0xa8 => Jsr(short(reader)?, ()),
        0xa9 => Ret(reader.u8()? as u16),
        0xaa => {
            reader.align4()?;
            let padding = (reader.position() - at - 1) as u8;
            let default = reader.i32()? as i64;
            let default = relative(reader, at, default, code_len)?;
            let low = reader.i32()?;
            let high = reader.i32()?;
            if high < low {
                return Err(reader.error(MalformedKind::InvalidSwitch(format!(
                    "tableswitch high {} is below low {}",
                    high, low
                ))));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count > code_len {
                return Err(reader.error(MalformedKind::InvalidSwitch(format!(
                    "tableswitch with {} entries",
                    count
                ))));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                let delta = reader.i32()? as i64;
                targets.push(relative(reader, at, delta, code_len)?);
            }
            TableSwitch {
                padding,
                default,
                low,
                targets,
            }
        }
        0xab => {
            reader.align4()?;
            let padding = (reader.position() - at - 1) as u8;
            let default = reader.i32()? as i64;
            let default = relative(reader, at, default, code_len)?;
            let npairs = reader.i32()?;
            if npairs < 0 || npairs as usize > code_len {
                return Err(reader.error(MalformedKind::InvalidSwitch(format!(
                    "lookupswitch with {} pairs",
                    npairs
                ))));
            }
            let mut targets = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = reader.i32()?;
                let delta = reader.i32()? as i64;
                targets.push((key, relative(reader, at, delta, code_len)?));
            }
            LookupSwitch {
                padding,
                default,
                targets,
            }
        }
        0xc6..=0xc7 => IfNull(EqComparison::ALL[(opcode - 0xc6) as usize], short(reader)?, ()),
        0xc8 => {
            let delta = reader.i32()? as i64;
            GotoW(relative(reader, at, delta, code_len)?)
        }
        0xc9 => {
            let delta = reader.i32()? as i64;
            JsrW(relative(reader, at, delta, code_len)?, ())
        }
        other => return Err(Error::malformed(at, MalformedKind::UnknownOpcode(other))),
    })
}
