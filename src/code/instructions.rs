//! JVM bytecode instructions, as they appear in code element streams and as they are written out.
//!
//! Compared to the opcode listing in the JVM specification:
//!
//!   - there is no `wide` instruction: slots and increments are `u16`/`i16` and the prefix is
//!     emitted when the operand needs it
//!   - `iload_0`, `ldc_w` and the other short/long forms are picked from the operands when the
//!     instruction is serialized
//!   - families of opcodes (conditional branches, shifts, invokes) are one variant carrying the
//!     member of the family, so that inverting a condition is just `!`

use crate::class_file::{
    ClassConstantIndex, ConstantIndex, FieldRefConstantIndex, InvokeDynamicConstantIndex,
    MethodRefConstantIndex, Serialize,
};
use crate::constant_pool::{FieldRef, InvokeDynamic, LoadableConstant, MethodRef};
use crate::descriptors::{BaseType, RefType};
use crate::errors::Error;
use crate::util::Width;
use byteorder::WriteBytesExt;
use std::ops::Not;

/// Prefix widening the operands of the next load, store, `iinc` or `ret`
pub const WIDE: u8 = 0xc4;

/// Non-branching JVM bytecode instruction
///
/// Operands that refer to the constant pool are generic: builders and transforms see symbolic
/// operands ([`SymbolicInstruction`]), the writer sees pool indices ([`SerializableInstruction`]).
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction<Class, Constant, Field, Method, IndyMethod> {
    Nop,

    // Constants
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    /// `ldc` or `ldc_w`, whichever fits the index
    Ldc(Constant),
    /// `ldc2_w`
    Ldc2(Constant),

    // Locals
    ILoad(u16),
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IStore(u16),
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IInc(u16, i16),

    // Arrays
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    NewArray(BaseType),
    ANewArray(Class),
    MultiANewArray(Class, u8),
    ArrayLength,

    // Operand stack
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,

    // Arithmetic
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType),
    LSh(ShiftType),
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    LCmp,
    FCmp(CompareMode),
    DCmp(CompareMode),

    // Conversions
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,

    // Objects
    GetStatic(Field),
    PutStatic(Field),
    GetField(Field),
    PutField(Field),
    Invoke(InvokeType, Method),
    InvokeDynamic(IndyMethod),
    New(Class),
    CheckCast(Class),
    InstanceOf(Class),
    MonitorEnter,
    MonitorExit,
}

/// Instruction whose operands are symbolic (what builders and transforms see)
pub type SymbolicInstruction =
    Instruction<RefType, LoadableConstant, FieldRef, MethodRef, InvokeDynamic>;

/// Instruction whose operands are constant pool indices (ready to be written out)
pub type SerializableInstruction = Instruction<
    ClassConstantIndex,
    ConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex,
    InvokeDynamicConstantIndex,
>;

/// Declares the instructions which are encoded as just their opcode
///
/// Each row is a variant (with its operands spelled out if it has any) and the opcode byte. Both
/// directions of the mapping are generated from the one table.
macro_rules! single_byte_opcodes {
    ($( $variant:ident $(( $($operand:path),+ ))? = $opcode:literal, )*) => {
        impl<Class, Constant, Field, Method, IndyMethod>
            Instruction<Class, Constant, Field, Method, IndyMethod>
        {
            /// Opcode of an instruction encoded without any operand bytes
            pub fn single_byte_opcode(&self) -> Option<u8> {
                match self {
                    $( Instruction::$variant $(( $($operand),+ ))? => Some($opcode), )*
                    _ => None,
                }
            }

            /// Instruction encoded as just `opcode`, if there is one
            pub fn from_single_byte_opcode(opcode: u8) -> Option<Self> {
                match opcode {
                    $( $opcode => Some(Instruction::$variant $(( $($operand),+ ))?), )*
                    _ => None,
                }
            }
        }
    };
}

single_byte_opcodes! {
    Nop = 0x00,
    AConstNull = 0x01,
    IConstM1 = 0x02,
    IConst0 = 0x03,
    IConst1 = 0x04,
    IConst2 = 0x05,
    IConst3 = 0x06,
    IConst4 = 0x07,
    IConst5 = 0x08,
    LConst0 = 0x09,
    LConst1 = 0x0a,
    FConst0 = 0x0b,
    FConst1 = 0x0c,
    FConst2 = 0x0d,
    DConst0 = 0x0e,
    DConst1 = 0x0f,
    IALoad = 0x2e,
    LALoad = 0x2f,
    FALoad = 0x30,
    DALoad = 0x31,
    AALoad = 0x32,
    BALoad = 0x33,
    CALoad = 0x34,
    SALoad = 0x35,
    IAStore = 0x4f,
    LAStore = 0x50,
    FAStore = 0x51,
    DAStore = 0x52,
    AAStore = 0x53,
    BAStore = 0x54,
    CAStore = 0x55,
    SAStore = 0x56,
    Pop = 0x57,
    Pop2 = 0x58,
    Dup = 0x59,
    DupX1 = 0x5a,
    DupX2 = 0x5b,
    Dup2 = 0x5c,
    Dup2X1 = 0x5d,
    Dup2X2 = 0x5e,
    Swap = 0x5f,
    IAdd = 0x60,
    LAdd = 0x61,
    FAdd = 0x62,
    DAdd = 0x63,
    ISub = 0x64,
    LSub = 0x65,
    FSub = 0x66,
    DSub = 0x67,
    IMul = 0x68,
    LMul = 0x69,
    FMul = 0x6a,
    DMul = 0x6b,
    IDiv = 0x6c,
    LDiv = 0x6d,
    FDiv = 0x6e,
    DDiv = 0x6f,
    IRem = 0x70,
    LRem = 0x71,
    FRem = 0x72,
    DRem = 0x73,
    INeg = 0x74,
    LNeg = 0x75,
    FNeg = 0x76,
    DNeg = 0x77,
    ISh(ShiftType::Left) = 0x78,
    LSh(ShiftType::Left) = 0x79,
    ISh(ShiftType::ArithmeticRight) = 0x7a,
    LSh(ShiftType::ArithmeticRight) = 0x7b,
    ISh(ShiftType::LogicalRight) = 0x7c,
    LSh(ShiftType::LogicalRight) = 0x7d,
    IAnd = 0x7e,
    LAnd = 0x7f,
    IOr = 0x80,
    LOr = 0x81,
    IXor = 0x82,
    LXor = 0x83,
    I2L = 0x85,
    I2F = 0x86,
    I2D = 0x87,
    L2I = 0x88,
    L2F = 0x89,
    L2D = 0x8a,
    F2I = 0x8b,
    F2L = 0x8c,
    F2D = 0x8d,
    D2I = 0x8e,
    D2L = 0x8f,
    D2F = 0x90,
    I2B = 0x91,
    I2C = 0x92,
    I2S = 0x93,
    LCmp = 0x94,
    FCmp(CompareMode::L) = 0x95,
    FCmp(CompareMode::G) = 0x96,
    DCmp(CompareMode::L) = 0x97,
    DCmp(CompareMode::G) = 0x98,
    ArrayLength = 0xbe,
    MonitorEnter = 0xc2,
    MonitorExit = 0xc3,
}

impl<Class, Constant, Field, Method, IndyMethod> Instruction<Class, Constant, Field, Method, IndyMethod> {
    /// Convert the constant pool operands
    pub fn map<Class2, Constant2, Field2, Method2, IndyMethod2, E>(
        &self,
        mut map_class: impl FnMut(&Class) -> Result<Class2, E>,
        map_constant: impl FnOnce(&Constant) -> Result<Constant2, E>,
        map_field: impl FnOnce(&Field) -> Result<Field2, E>,
        map_method: impl FnOnce(&Method) -> Result<Method2, E>,
        map_indy_method: impl FnOnce(&IndyMethod) -> Result<IndyMethod2, E>,
    ) -> Result<Instruction<Class2, Constant2, Field2, Method2, IndyMethod2>, E> {
        use Instruction::*;

        let no_pool_operand = self
            .single_byte_opcode()
            .and_then(Instruction::from_single_byte_opcode)
            .or_else(|| {
                let (long_form, slot) = self.local_access()?;
                Instruction::from_local_access(long_form, slot)
            });
        if let Some(insn) = no_pool_operand {
            return Ok(insn);
        }

        Ok(match self {
            BiPush(value) => BiPush(*value),
            SiPush(value) => SiPush(*value),
            NewArray(base_type) => NewArray(*base_type),
            IInc(slot, by) => IInc(*slot, *by),
            Ldc(constant) => Ldc(map_constant(constant)?),
            Ldc2(constant) => Ldc2(map_constant(constant)?),
            GetStatic(field) => GetStatic(map_field(field)?),
            PutStatic(field) => PutStatic(map_field(field)?),
            GetField(field) => GetField(map_field(field)?),
            PutField(field) => PutField(map_field(field)?),
            Invoke(kind, method) => Invoke(*kind, map_method(method)?),
            InvokeDynamic(indy) => InvokeDynamic(map_indy_method(indy)?),
            New(class) => New(map_class(class)?),
            ANewArray(class) => ANewArray(map_class(class)?),
            CheckCast(class) => CheckCast(map_class(class)?),
            InstanceOf(class) => InstanceOf(map_class(class)?),
            MultiANewArray(class, dimensions) => MultiANewArray(map_class(class)?, *dimensions),
            other => unreachable!("{:?} has no operands to map", other.single_byte_opcode()),
        })
    }

    /// Opcode of the one-byte-operand form of a load or store (`iload`, `astore`, ...), along with
    /// the slot it accesses
    fn local_access(&self) -> Option<(u8, u16)> {
        use Instruction::*;
        Some(match self {
            ILoad(slot) => (0x15, *slot),
            LLoad(slot) => (0x16, *slot),
            FLoad(slot) => (0x17, *slot),
            DLoad(slot) => (0x18, *slot),
            ALoad(slot) => (0x19, *slot),
            IStore(slot) => (0x36, *slot),
            LStore(slot) => (0x37, *slot),
            FStore(slot) => (0x38, *slot),
            DStore(slot) => (0x39, *slot),
            AStore(slot) => (0x3a, *slot),
            _ => return None,
        })
    }

    /// Load or store named by the opcode of its one-byte-operand form
    pub fn from_local_access(long_form: u8, slot: u16) -> Option<Self> {
        let access: fn(u16) -> Self = match long_form {
            0x15 => Self::ILoad,
            0x16 => Self::LLoad,
            0x17 => Self::FLoad,
            0x18 => Self::DLoad,
            0x19 => Self::ALoad,
            0x36 => Self::IStore,
            0x37 => Self::LStore,
            0x38 => Self::FStore,
            0x39 => Self::DStore,
            0x3a => Self::AStore,
            _ => return None,
        };
        Some(access(slot))
    }

    /// Load or store named by a short form opcode (`iload_0` through `astore_3`)
    pub fn from_short_local_access(opcode: u8) -> Option<Self> {
        let (first_long, first_short) = match opcode {
            0x1a..=0x2d => (0x15, 0x1a),
            0x3b..=0x4e => (0x36, 0x3b),
            _ => return None,
        };
        let offset = opcode - first_short;
        Self::from_local_access(first_long + offset / 4, (offset % 4) as u16)
    }

    /// Local variable slot read or written (along with the number of slots the value takes)
    pub fn local_slot(&self) -> Option<(u16, usize)> {
        use Instruction::*;
        match self {
            LLoad(slot) | DLoad(slot) | LStore(slot) | DStore(slot) => Some((*slot, 2)),
            IInc(slot, _) => Some((*slot, 1)),
            other => other.local_access().map(|(_, slot)| (slot, 1)),
        }
    }

    /// Same instruction, reading or writing another local variable slot
    pub fn with_local_slot(&self, slot: u16) -> Option<Self> {
        match self {
            Instruction::IInc(_, by) => Some(Instruction::IInc(slot, *by)),
            other => {
                let (long_form, _) = other.local_access()?;
                Self::from_local_access(long_form, slot)
            }
        }
    }
}

impl<Class, Constant, Field, Method, IndyMethod> Default
    for Instruction<Class, Constant, Field, Method, IndyMethod>
{
    fn default() -> Self {
        Instruction::Nop
    }
}

/// Opcode of `iload_<n>` (and friends) for the long form opcode and a slot in `0..=3`
fn short_local_opcode(long_form: u8, slot: u8) -> u8 {
    let (first_long, first_short) = if long_form < 0x36 {
        (0x15, 0x1a)
    } else {
        (0x36, 0x3b)
    };
    first_short + 4 * (long_form - first_long) + slot
}

fn opcode_and<W: WriteBytesExt, S: Serialize>(
    writer: &mut W,
    opcode: u8,
    operand: &S,
) -> Result<(), Error> {
    opcode.serialize(writer)?;
    operand.serialize(writer)
}

impl Width for SerializableInstruction {
    fn width(&self) -> usize {
        use Instruction::*;

        if self.single_byte_opcode().is_some() {
            return 1;
        }
        if let Some((_, slot)) = self.local_access() {
            return match slot {
                0..=3 => 1,
                4..=255 => 2,
                _ => 4,
            };
        }
        match self {
            BiPush(_) | NewArray(_) => 2,
            Ldc(ConstantIndex(idx)) if *idx <= u8::MAX as u16 => 2,
            IInc(slot, by) if *slot <= u8::MAX as u16 && i8::try_from(*by).is_ok() => 3,
            IInc(_, _) => 6,
            MultiANewArray(_, _) => 4,
            Invoke(InvokeType::Interface(_), _) | InvokeDynamic(_) => 5,

            // opcode and a `u16` (`ldc2_w` is always wide, unlike `ldc`)
            _ => 3,
        }
    }
}

impl Serialize for SerializableInstruction {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        use Instruction::*;

        if let Some(opcode) = self.single_byte_opcode() {
            return opcode.serialize(writer);
        }
        if let Some((long_form, slot)) = self.local_access() {
            return match u8::try_from(slot) {
                Ok(short @ 0..=3) => short_local_opcode(long_form, short).serialize(writer),
                Ok(byte) => opcode_and(writer, long_form, &byte),
                Err(_) => {
                    WIDE.serialize(writer)?;
                    opcode_and(writer, long_form, &slot)
                }
            };
        }

        match self {
            BiPush(value) => opcode_and(writer, 0x10, value),
            SiPush(value) => opcode_and(writer, 0x11, value),
            Ldc(ConstantIndex(idx)) => match u8::try_from(*idx) {
                Ok(byte) => opcode_and(writer, 0x12, &byte),
                Err(_) => opcode_and(writer, 0x13, idx),
            },
            Ldc2(idx) => opcode_and(writer, 0x14, idx),
            IInc(slot, by) => match (u8::try_from(*slot), i8::try_from(*by)) {
                (Ok(slot), Ok(by)) => {
                    opcode_and(writer, 0x84, &slot)?;
                    by.serialize(writer)
                }
                _ => {
                    WIDE.serialize(writer)?;
                    opcode_and(writer, 0x84, slot)?;
                    by.serialize(writer)
                }
            },
            GetStatic(field) => opcode_and(writer, 0xb2, field),
            PutStatic(field) => opcode_and(writer, 0xb3, field),
            GetField(field) => opcode_and(writer, 0xb4, field),
            PutField(field) => opcode_and(writer, 0xb5, field),
            Invoke(kind, method) => {
                opcode_and(writer, kind.opcode(), method)?;
                if let InvokeType::Interface(count) = kind {
                    count.serialize(writer)?;
                    0u8.serialize(writer)?;
                }
                Ok(())
            }
            InvokeDynamic(indy) => {
                opcode_and(writer, 0xba, indy)?;
                0u16.serialize(writer)
            }
            New(class) => opcode_and(writer, 0xbb, class),
            NewArray(base_type) => opcode_and(writer, 0xbc, &array_type_code(*base_type)),
            ANewArray(class) => opcode_and(writer, 0xbd, class),
            CheckCast(class) => opcode_and(writer, 0xc0, class),
            InstanceOf(class) => opcode_and(writer, 0xc1, class),
            MultiANewArray(class, dimensions) => {
                opcode_and(writer, 0xc5, class)?;
                dimensions.serialize(writer)
            }
            other => unreachable!("{:?} is a single byte or local access", other),
        }
    }
}

/// `atype` operand codes of `newarray`
const ARRAY_TYPES: [(BaseType, u8); 8] = [
    (BaseType::Boolean, 4),
    (BaseType::Char, 5),
    (BaseType::Float, 6),
    (BaseType::Double, 7),
    (BaseType::Byte, 8),
    (BaseType::Short, 9),
    (BaseType::Int, 10),
    (BaseType::Long, 11),
];

/// `atype` operand of `newarray`
pub fn array_type_code(base_type: BaseType) -> u8 {
    ARRAY_TYPES
        .iter()
        .find(|(typ, _)| *typ == base_type)
        .map_or(0, |(_, code)| *code)
}

pub fn array_type_from_code(code: u8) -> Option<BaseType> {
    ARRAY_TYPES
        .iter()
        .find(|(_, atype)| *atype == code)
        .map(|(base_type, _)| *base_type)
}

/// Instruction which ends a basic block
///
/// The type parameters are the representations of the three kinds of targets:
///
///   * __regular jump targets__: the 16-bit offsets of most branches
///   * __wide jump targets__: the 32-bit offsets of `goto_w`, `jsr_w` and switches
///   * __fallthrough targets__: the block executed next if the branch is not taken
///
/// In code element streams the targets are labels (and the fallthrough is unit). Just before the
/// code array is written, they become relative offsets, and the fallthrough disappears since it is
/// implied by the block order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction<Lbl, LblWide, LblNext> {
    /// `ifeq` through `ifle`, comparing against zero
    If(OrdComparison, Lbl, LblNext),
    /// `if_icmpeq` through `if_icmple`
    IfICmp(OrdComparison, Lbl, LblNext),
    /// `if_acmpeq` and `if_acmpne`
    IfACmp(EqComparison, Lbl, LblNext),
    /// `ifnull` and `ifnonnull`
    IfNull(EqComparison, Lbl, LblNext),
    Goto(Lbl),
    GotoW(LblWide),
    TableSwitch {
        /// Zero bytes after the opcode, so that `default` starts at a multiple of four from the
        /// start of the code array
        padding: u8,

        /// Target when the key is outside of `low..low + targets.len()`
        default: LblWide,

        /// Key of the first target
        low: i32,

        targets: Vec<LblWide>,
    },
    LookupSwitch {
        /// Same alignment padding as in `TableSwitch`
        padding: u8,

        /// Target when no key matches
        default: LblWide,

        /// Keys and their targets, sorted by key
        targets: Vec<(i32, LblWide)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,

    /// Subroutine call (only parsed: stack maps cannot describe subroutines)
    Jsr(Lbl, LblNext),
    JsrW(LblWide, LblNext),

    /// Subroutine return through the address in a local
    Ret(u16),

    /// Marker ending a block which runs into the next one. This is implicit in the bytecode, but
    /// making it explicit means every block ends in a branch.
    FallThrough(LblNext),
}

impl<Lbl, LblWide, LblNext> BranchInstruction<Lbl, LblWide, LblNext> {
    /// Opcode of a branch encoded without operand bytes (returns and `athrow`)
    pub fn plain_opcode(&self) -> Option<u8> {
        use BranchInstruction::*;
        match self {
            IReturn => Some(0xac),
            LReturn => Some(0xad),
            FReturn => Some(0xae),
            DReturn => Some(0xaf),
            AReturn => Some(0xb0),
            Return => Some(0xb1),
            AThrow => Some(0xbf),
            _ => None,
        }
    }

    pub fn from_plain_opcode(opcode: u8) -> Option<Self> {
        use BranchInstruction::*;
        match opcode {
            0xac => Some(IReturn),
            0xad => Some(LReturn),
            0xae => Some(FReturn),
            0xaf => Some(DReturn),
            0xb0 => Some(AReturn),
            0xb1 => Some(Return),
            0xbf => Some(AThrow),
            _ => None,
        }
    }

    /// Set the switch padding needed when the instruction starts at `offset`
    pub fn set_padding_for(&mut self, offset: usize) {
        if let BranchInstruction::TableSwitch { padding, .. }
        | BranchInstruction::LookupSwitch { padding, .. } = self
        {
            *padding = (3 - (offset % 4)) as u8;
        }
    }
}

impl<Lbl: Copy, LblWide: Copy, LblNext: Copy> BranchInstruction<Lbl, LblWide, LblNext> {
    /// Block executed next when the branch is not taken, if there is one
    pub fn fallthrough_target(&self) -> Option<LblNext> {
        use BranchInstruction::*;
        match self {
            If(_, _, next)
            | IfICmp(_, _, next)
            | IfACmp(_, _, next)
            | IfNull(_, _, next)
            | Jsr(_, next)
            | JsrW(_, next)
            | FallThrough(next) => Some(*next),
            _ => None,
        }
    }

    /// Targets other than the fallthrough
    pub fn jump_targets(&self) -> JumpTargets<Lbl, LblWide> {
        use BranchInstruction::*;
        match self {
            If(_, target, _)
            | IfICmp(_, target, _)
            | IfACmp(_, target, _)
            | IfNull(_, target, _)
            | Jsr(target, _)
            | Goto(target) => JumpTargets::Regular(*target),
            GotoW(target) | JsrW(target, _) => JumpTargets::Wide(*target),
            TableSwitch {
                default, targets, ..
            } => JumpTargets::WideMany(
                std::iter::once(*default)
                    .chain(targets.iter().copied())
                    .collect(),
            ),
            LookupSwitch {
                default, targets, ..
            } => JumpTargets::WideMany(
                std::iter::once(*default)
                    .chain(targets.iter().map(|(_, target)| *target))
                    .collect(),
            ),
            _ => JumpTargets::None,
        }
    }

    pub fn map_labels<Lbl2, LblWide2, LblNext2>(
        &self,
        map_label: impl FnOnce(&Lbl) -> Lbl2,
        map_wide_label: impl Fn(&LblWide) -> LblWide2,
        map_next_label: impl FnOnce(&LblNext) -> LblNext2,
    ) -> BranchInstruction<Lbl2, LblWide2, LblNext2> {
        use BranchInstruction::*;

        if let Some(plain) = self.plain_opcode().and_then(BranchInstruction::from_plain_opcode) {
            return plain;
        }
        match self {
            If(cmp, target, next) => If(*cmp, map_label(target), map_next_label(next)),
            IfICmp(cmp, target, next) => IfICmp(*cmp, map_label(target), map_next_label(next)),
            IfACmp(cmp, target, next) => IfACmp(*cmp, map_label(target), map_next_label(next)),
            IfNull(cmp, target, next) => IfNull(*cmp, map_label(target), map_next_label(next)),
            Goto(target) => Goto(map_label(target)),
            GotoW(target) => GotoW(map_wide_label(target)),
            Jsr(target, next) => Jsr(map_label(target), map_next_label(next)),
            JsrW(target, next) => JsrW(map_wide_label(target), map_next_label(next)),
            Ret(slot) => Ret(*slot),
            FallThrough(next) => FallThrough(map_next_label(next)),
            TableSwitch {
                padding,
                default,
                low,
                targets,
            } => TableSwitch {
                padding: *padding,
                default: map_wide_label(default),
                low: *low,
                targets: targets.iter().map(&map_wide_label).collect(),
            },
            LookupSwitch {
                padding,
                default,
                targets,
            } => LookupSwitch {
                padding: *padding,
                default: map_wide_label(default),
                targets: targets
                    .iter()
                    .map(|(key, target)| (*key, map_wide_label(target)))
                    .collect(),
            },
            other => unreachable!("{:?} has no targets", other.plain_opcode()),
        }
    }
}

impl<Lbl, LblWide, LblNext> Width for BranchInstruction<Lbl, LblWide, LblNext> {
    fn width(&self) -> usize {
        use BranchInstruction::*;
        match self {
            FallThrough(_) => 0,
            Ret(slot) if *slot <= u8::MAX as u16 => 2,
            Ret(_) => 4,
            GotoW(_) | JsrW(_, _) => 5,
            If(..) | IfICmp(..) | IfACmp(..) | IfNull(..) | Goto(_) | Jsr(..) => 3,
            TableSwitch {
                padding, targets, ..
            } => 1 + *padding as usize + 4 * (3 + targets.len()),
            LookupSwitch {
                padding, targets, ..
            } => 1 + *padding as usize + 8 * (1 + targets.len()),
            _ => 1,
        }
    }
}

impl Serialize for BranchInstruction<i16, i32, ()> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        use BranchInstruction::*;

        if let Some(opcode) = self.plain_opcode() {
            return opcode.serialize(writer);
        }
        match self {
            If(cmp, offset, ()) => opcode_and(writer, 0x99 + *cmp as u8, offset),
            IfICmp(cmp, offset, ()) => opcode_and(writer, 0x9f + *cmp as u8, offset),
            IfACmp(cmp, offset, ()) => opcode_and(writer, 0xa5 + *cmp as u8, offset),
            IfNull(cmp, offset, ()) => opcode_and(writer, 0xc6 + *cmp as u8, offset),
            Goto(offset) => opcode_and(writer, 0xa7, offset),
            Jsr(offset, ()) => opcode_and(writer, 0xa8, offset),
            GotoW(offset) => opcode_and(writer, 0xc8, offset),
            JsrW(offset, ()) => opcode_and(writer, 0xc9, offset),
            Ret(slot) => match u8::try_from(*slot) {
                Ok(byte) => opcode_and(writer, 0xa9, &byte),
                Err(_) => {
                    WIDE.serialize(writer)?;
                    opcode_and(writer, 0xa9, slot)
                }
            },
            TableSwitch {
                padding,
                default,
                low,
                targets,
            } => {
                0xaau8.serialize(writer)?;
                writer.write_all(&[0; 3][..*padding as usize])?;
                default.serialize(writer)?;
                low.serialize(writer)?;
                (low + targets.len() as i32 - 1).serialize(writer)?;
                targets.iter().try_for_each(|target| target.serialize(writer))
            }
            LookupSwitch {
                padding,
                default,
                targets,
            } => {
                0xabu8.serialize(writer)?;
                writer.write_all(&[0; 3][..*padding as usize])?;
                default.serialize(writer)?;
                (targets.len() as i32).serialize(writer)?;
                targets.iter().try_for_each(|(key, target)| {
                    key.serialize(writer)?;
                    target.serialize(writer)
                })
            }
            FallThrough(()) => Ok(()),
            other => unreachable!("{:?} is a plain branch", other.plain_opcode()),
        }
    }
}

/// Non-fallthrough jump target of a `BranchInstruction`
pub enum JumpTargets<Lbl, LblWide> {
    None,
    Regular(Lbl),
    Wide(LblWide),
    WideMany(Vec<LblWide>),
}

impl<A> JumpTargets<A, A> {
    /// All of the targets, when regular and wide targets have the same type
    pub fn targets(&self) -> &[A] {
        match self {
            JumpTargets::None => &[],
            JumpTargets::Regular(target) | JumpTargets::Wide(target) => {
                std::slice::from_ref(target)
            }
            JumpTargets::WideMany(targets) => targets,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// How `fcmp`/`dcmp` treat NaN
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// NaN compares as -1
    L,

    /// NaN compares as 1
    G,
}

/// Comparisons of `int`s, in the same order as their opcodes
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    NE,
    LT,
    GE,
    GT,
    LE,
}

impl OrdComparison {
    pub const ALL: [OrdComparison; 6] = [
        OrdComparison::EQ,
        OrdComparison::NE,
        OrdComparison::LT,
        OrdComparison::GE,
        OrdComparison::GT,
        OrdComparison::LE,
    ];
}

impl Not for OrdComparison {
    type Output = Self;

    /// Opcodes come in complementary pairs
    fn not(self) -> Self::Output {
        OrdComparison::ALL[self as usize ^ 1]
    }
}

/// Reference (or null) comparisons, in the same order as their opcodes
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl EqComparison {
    pub const ALL: [EqComparison; 2] = [EqComparison::EQ, EqComparison::NE];
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        EqComparison::ALL[self as usize ^ 1]
    }
}

/// Flavour of method invocation
///
/// `invokedynamic` is a separate instruction since its operand is not a method reference.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    /// Carries the size of the arguments in slots, receiver included
    Interface(u8),
}

impl InvokeType {
    pub fn opcode(self) -> u8 {
        match self {
            InvokeType::Virtual => 0xb6,
            InvokeType::Special => 0xb7,
            InvokeType::Static => 0xb8,
            InvokeType::Interface(_) => 0xb9,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bytes<S: Serialize>(insn: &S) -> Vec<u8> {
        let mut out = vec![];
        insn.serialize(&mut out).unwrap();
        out
    }

    #[test]
    fn single_byte_table_is_consistent() {
        let mut count = 0;
        for opcode in 0..=u8::MAX {
            if let Some(insn) = SerializableInstruction::from_single_byte_opcode(opcode) {
                assert_eq!(insn.single_byte_opcode(), Some(opcode));
                assert_eq!(bytes(&insn), vec![opcode]);
                count += 1;
            }
        }
        assert_eq!(count, 100);
    }

    #[test]
    fn locals_use_short_and_wide_forms() {
        let aload: SerializableInstruction = Instruction::ALoad(0);
        assert_eq!(bytes(&aload), vec![0x2a]);
        let dstore: SerializableInstruction = Instruction::DStore(3);
        assert_eq!(bytes(&dstore), vec![0x4a]);
        let istore: SerializableInstruction = Instruction::IStore(300);
        assert_eq!(bytes(&istore), vec![WIDE, 0x36, 0x01, 0x2c]);

        for opcode in (0x1a..=0x2d).chain(0x3b..=0x4e) {
            let insn = SerializableInstruction::from_short_local_access(opcode).unwrap();
            assert_eq!(bytes(&insn), vec![opcode]);
        }
    }

    #[test]
    fn widths_match_encodings() {
        let instructions: Vec<SerializableInstruction> = vec![
            Instruction::ILoad(2),
            Instruction::ILoad(200),
            Instruction::ILoad(300),
            Instruction::Ldc(ConstantIndex(3)),
            Instruction::Ldc(ConstantIndex(300)),
            Instruction::Ldc2(ConstantIndex(3)),
            Instruction::IInc(1, -1),
            Instruction::IInc(1, 1000),
            Instruction::Invoke(InvokeType::Interface(2), MethodRefConstantIndex(ConstantIndex(9))),
            Instruction::MultiANewArray(ClassConstantIndex(ConstantIndex(4)), 2),
            Instruction::NewArray(BaseType::Long),
            Instruction::LSh(ShiftType::LogicalRight),
        ];
        for insn in &instructions {
            assert_eq!(insn.width(), bytes(insn).len(), "width of {:?}", insn);
        }
    }

    #[test]
    fn slots_can_be_moved() {
        let lload: SymbolicInstruction = Instruction::LLoad(1);
        assert_eq!(lload.local_slot(), Some((1, 2)));
        assert_eq!(lload.with_local_slot(5), Some(Instruction::LLoad(5)));

        let iinc: SymbolicInstruction = Instruction::IInc(0, -1);
        assert_eq!(iinc.with_local_slot(2), Some(Instruction::IInc(2, -1)));

        let dup: SymbolicInstruction = Instruction::Dup;
        assert_eq!(dup.local_slot(), None);
        assert_eq!(dup.with_local_slot(2), None);
    }

    #[test]
    fn branches_use_the_right_opcodes() {
        let goto_w: BranchInstruction<i16, i32, ()> = BranchInstruction::GotoW(70000);
        assert_eq!(bytes(&goto_w), vec![0xc8, 0x00, 0x01, 0x11, 0x70]);

        let if_le: BranchInstruction<i16, i32, ()> =
            BranchInstruction::IfICmp(OrdComparison::LE, -3, ());
        assert_eq!(bytes(&if_le), vec![0xa4, 0xff, 0xfd]);

        let if_nonnull: BranchInstruction<i16, i32, ()> =
            BranchInstruction::IfNull(EqComparison::NE, 8, ());
        assert_eq!(bytes(&if_nonnull), vec![0xc7, 0x00, 0x08]);

        let mut switch: BranchInstruction<i16, i32, ()> = BranchInstruction::TableSwitch {
            padding: 0,
            default: 20,
            low: 1,
            targets: vec![8, 12],
        };
        switch.set_padding_for(5);
        assert_eq!(switch.width(), 1 + 2 + 4 * 5);
        assert_eq!(bytes(&switch).len(), switch.width());
    }

    #[test]
    fn inverted_comparisons() {
        assert_eq!(!OrdComparison::LT, OrdComparison::GE);
        assert_eq!(!OrdComparison::GT, OrdComparison::LE);
        assert_eq!(!!OrdComparison::GT, OrdComparison::GT);
        assert_eq!(!EqComparison::EQ, EqComparison::NE);
    }
}
