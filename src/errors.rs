use crate::class_file::Constant;
use crate::code::Label;
use crate::names::BinaryName;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Input bytes are not a well-formed class file
    Malformed {
        offset: usize,
        kind: MalformedKind,
    },

    /// Adding the constant would push the pool past 65535 slots
    ConstantPoolOverflow {
        constant: Constant,
        offset: usize,
    },

    /// Adding the bootstrap method would push the table past 65535 entries
    BootstrapMethodOverflow(usize),

    /// String whose modified UTF-8 encoding is longer than 65535 bytes
    Utf8TooLong(usize),

    /// A `u2`-counted table (interfaces, fields, methods, attributes, exception handlers, ...) with
    /// too many entries
    TooManyEntries {
        what: &'static str,
        count: usize,
    },

    /// Pool index is out of range, points to the second half of a wide entry, or has the wrong
    /// kind of entry
    InvalidConstantIndex {
        index: u16,
        expected: &'static str,
    },

    MethodCodeOverflow(usize),
    MethodCodeMaxStackOverflow(usize),
    MethodCodeMaxLocalsOverflow(usize),

    /// A label is referenced but never bound
    UnboundLabel(Label),

    /// A label is bound a second time
    DuplicateLabel(Label),

    /// An instruction operand does not fit its encoding
    OperandOutOfRange {
        instruction: &'static str,
        value: i64,
    },

    /// A branch needs a wide encoding but short jumps are not allowed to be fixed
    ShortJumpOverflow {
        offset: usize,
        distance: isize,
    },

    DuplicateSwitchCase(i32),
    DuplicateSwitchDefault,
    DuplicateCatch(Option<BinaryName>),
    EmptyTryBlock,

    /// Static methods have no receiver slot
    NoReceiver,

    /// Parameter index past the end of the descriptor
    NoSuchParameter(usize),

    /// Branch to an offset outside of the method body
    BranchTargetOutOfRange {
        offset: usize,
        target: i64,
        disassembly: String,
    },

    /// Type error found while inferring frames
    VerifierError {
        offset: Option<usize>,
        instruction: String,
        kind: VerifierErrorKind,
    },

    /// Two paths into a block have stacks that cannot be merged
    IncompatibleFrames {
        label: Label,
        first: String,
        second: String,
    },

    /// Control reaches past the last instruction
    FallsOffEnd,

    /// Instruction which cannot be emitted with generated stack maps
    UnsupportedInstruction(&'static str),

    /// Attribute rejected by the attribute resolver
    UnknownAttribute(String),

    /// Opaque attribute that refers to a constant pool other than the one being written
    AlienAttribute(String),

    InvalidDescriptor(String),
    InvalidName(String),
}

#[derive(Debug)]
pub enum MalformedKind {
    BadMagic(u32),
    Truncated,
    TrailingBytes(usize),
    UnknownConstantTag(u8),
    UnknownOpcode(u8),
    InvalidModifiedUtf8,
    BadAttributeLength {
        name: String,
        declared: usize,
        consumed: usize,
    },
    UnknownFrameType(u8),
    UnknownVerificationType(u8),
    InvalidSwitch(String),
    InvalidReference(String),
    NestingTooDeep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    EmptyStack,
    InvalidWidth(usize),
    NotArrayType,
    InvalidIndex(u16),
    InvalidType,
    UnknownClass(BinaryName),
    IncompatibleTypes(String, String),
    BadDescriptor(String),
    BadReturn,
    UninitializedObject,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl Error {
    pub(crate) fn malformed(offset: usize, kind: MalformedKind) -> Error {
        Error::Malformed { offset, kind }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Malformed { offset, kind } => {
                write!(f, "malformed class file at byte {}: {}", offset, kind)
            }
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "constant pool overflow adding {:?} at index {}",
                constant, offset
            ),
            Error::BootstrapMethodOverflow(count) => {
                write!(f, "too many bootstrap methods ({})", count)
            }
            Error::Utf8TooLong(len) => write!(
                f,
                "string of {} modified UTF-8 bytes does not fit a constant",
                len
            ),
            Error::TooManyEntries { what, count } => {
                write!(f, "too many {} ({} > 65535)", what, count)
            }
            Error::InvalidConstantIndex { index, expected } => {
                write!(f, "constant pool index {} is not a {}", index, expected)
            }
            Error::MethodCodeOverflow(len) => {
                write!(f, "method code is {} bytes (limit is 65535)", len)
            }
            Error::MethodCodeMaxStackOverflow(depth) => {
                write!(f, "operand stack depth {} exceeds 65535", depth)
            }
            Error::MethodCodeMaxLocalsOverflow(count) => {
                write!(f, "{} local slots exceeds 65535", count)
            }
            Error::UnboundLabel(label) => write!(f, "label {:?} is never bound", label),
            Error::DuplicateLabel(label) => write!(f, "label {:?} is bound twice", label),
            Error::OperandOutOfRange { instruction, value } => {
                write!(f, "operand {} is out of range for {}", value, instruction)
            }
            Error::ShortJumpOverflow { offset, distance } => write!(
                f,
                "branch at offset {} jumps {} bytes, which needs a wide encoding",
                offset, distance
            ),
            Error::DuplicateSwitchCase(key) => write!(f, "duplicate switch case {}", key),
            Error::DuplicateSwitchDefault => f.write_str("switch has two default cases"),
            Error::DuplicateCatch(Some(class)) => {
                write!(f, "exception {} is caught twice", class)
            }
            Error::DuplicateCatch(None) => f.write_str("catch-all handler registered twice"),
            Error::EmptyTryBlock => f.write_str("try block is empty"),
            Error::NoReceiver => f.write_str("static method has no receiver"),
            Error::NoSuchParameter(index) => write!(f, "method has no parameter {}", index),
            Error::BranchTargetOutOfRange {
                offset,
                target,
                disassembly,
            } => write!(
                f,
                "branch at offset {} targets {}, outside of the method body\n{}",
                offset, target, disassembly
            ),
            Error::VerifierError {
                offset,
                instruction,
                kind,
            } => match offset {
                Some(offset) => write!(f, "{} (at {}: {})", kind, offset, instruction),
                None => write!(f, "{} (in {})", kind, instruction),
            },
            Error::IncompatibleFrames {
                label,
                first,
                second,
            } => write!(
                f,
                "incompatible frames at {:?}: {} and {}",
                label, first, second
            ),
            Error::FallsOffEnd => f.write_str("control falls off the end of the code"),
            Error::UnsupportedInstruction(name) => {
                write!(f, "cannot generate stack maps for {}", name)
            }
            Error::UnknownAttribute(name) => write!(f, "unknown attribute {}", name),
            Error::AlienAttribute(name) => write!(
                f,
                "attribute {} refers to a different constant pool",
                name
            ),
            Error::InvalidDescriptor(msg) => write!(f, "invalid descriptor: {}", msg),
            Error::InvalidName(msg) => write!(f, "invalid name: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedKind::BadMagic(magic) => write!(f, "bad magic number {:#010x}", magic),
            MalformedKind::Truncated => f.write_str("unexpected end of input"),
            MalformedKind::TrailingBytes(n) => write!(f, "{} trailing bytes", n),
            MalformedKind::UnknownConstantTag(tag) => write!(f, "unknown constant tag {}", tag),
            MalformedKind::UnknownOpcode(op) => write!(f, "unknown opcode {:#04x}", op),
            MalformedKind::InvalidModifiedUtf8 => f.write_str("invalid modified UTF-8"),
            MalformedKind::BadAttributeLength {
                name,
                declared,
                consumed,
            } => write!(
                f,
                "attribute {} declares {} bytes but {} were read",
                name, declared, consumed
            ),
            MalformedKind::UnknownFrameType(tag) => write!(f, "unknown stack map frame {}", tag),
            MalformedKind::UnknownVerificationType(tag) => {
                write!(f, "unknown verification type {}", tag)
            }
            MalformedKind::InvalidSwitch(msg) => write!(f, "invalid switch: {}", msg),
            MalformedKind::InvalidReference(msg) => f.write_str(msg),
            MalformedKind::NestingTooDeep => f.write_str("dynamic constants nest too deeply"),
        }
    }
}

impl fmt::Display for VerifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierErrorKind::EmptyStack => f.write_str("operand stack underflow"),
            VerifierErrorKind::InvalidWidth(width) => {
                write!(f, "expected a value of width {}", width)
            }
            VerifierErrorKind::NotArrayType => f.write_str("expected an array"),
            VerifierErrorKind::InvalidIndex(index) => write!(f, "invalid local {}", index),
            VerifierErrorKind::InvalidType => f.write_str("unexpected operand type"),
            VerifierErrorKind::UnknownClass(class) => write!(f, "cannot resolve class {}", class),
            VerifierErrorKind::IncompatibleTypes(found, expected) => {
                write!(f, "{} is not assignable to {}", found, expected)
            }
            VerifierErrorKind::BadDescriptor(desc) => write!(f, "bad descriptor {}", desc),
            VerifierErrorKind::BadReturn => f.write_str("return does not match the method type"),
            VerifierErrorKind::UninitializedObject => {
                f.write_str("uninitialized object used where an initialized one is required")
            }
        }
    }
}
