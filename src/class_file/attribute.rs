use crate::access_flags::{AccessFlags, InnerClassAccessFlags};
use crate::class_file::{
    u16_count, ByteReader, ClassConstantIndex, ConstantIndex, Serialize, Utf8ConstantIndex,
};
use crate::errors::{Error, MalformedKind};
use crate::verifier::VerificationType;
use byteorder::WriteBytesExt;

/// Attribute as stored in the class file: a name and an opaque payload
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.name_index.serialize(writer)?;
        let len = u32::try_from(self.info.len()).map_err(|_| Error::TooManyEntries {
            what: "attribute bytes",
            count: self.info.len(),
        })?;
        len.serialize(writer)?;
        writer.write_all(&self.info)?;
        Ok(())
    }
}

impl Attribute {
    pub fn read(reader: &mut ByteReader) -> Result<Attribute, Error> {
        let name_index = Utf8ConstantIndex::read(reader)?;
        let len = reader.u32()? as usize;
        let info = reader.bytes(len)?.to_vec();
        Ok(Attribute { name_index, info })
    }
}

/// Attributes with a known layout
///
/// Every attribute is stored the same way (see [`Attribute`]), but the payloads of the ones below
/// have a structure this library reads and writes.
pub trait AttributeLike: Serialize + Sized {
    const NAME: &'static str;

    /// Read the payload (without the name and length header)
    fn read(reader: &mut ByteReader) -> Result<Self, Error>;

    /// Read a whole payload, insisting that nothing is left over
    fn read_all(info: &mut ByteReader) -> Result<Self, Error> {
        let declared = info.remaining();
        let attribute = Self::read(info)?;
        if info.remaining() != 0 {
            return Err(info.error(MalformedKind::BadAttributeLength {
                name: Self::NAME.to_owned(),
                declared,
                consumed: declared - info.remaining(),
            }));
        }
        Ok(attribute)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantValue(pub ConstantIndex);

impl Serialize for ConstantValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for ConstantValue {
    const NAME: &'static str = "ConstantValue";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        ConstantIndex::read(reader).map(ConstantValue)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        if self.code_array.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(self.code_array.len()));
        }
        (self.code_array.len() as u32).serialize(writer)?;
        writer.write_all(&self.code_array)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        let max_stack = reader.u16()?;
        let max_locals = reader.u16()?;
        let code_length = reader.u32()? as usize;
        let code_array = reader.bytes(code_length)?.to_vec();
        let exception_table = reader.table(ExceptionHandler::read)?;
        let attributes = reader.table(Attribute::read)?;
        Ok(Code {
            max_stack,
            max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start_pc: u16,

    /// End of the protected range (exclusive)
    pub end_pc: u16,

    pub handler_pc: u16,

    /// `None` catches everything
    pub catch_type: Option<ClassConstantIndex>,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        match self.catch_type {
            Some(class) => class.serialize(writer),
            None => 0u16.serialize(writer),
        }
    }
}

impl ExceptionHandler {
    pub fn read(reader: &mut ByteReader) -> Result<ExceptionHandler, Error> {
        Ok(ExceptionHandler {
            start_pc: reader.u16()?,
            end_pc: reader.u16()?,
            handler_pc: reader.u16()?,
            catch_type: match reader.u16()? {
                0 => None,
                idx => Some(ClassConstantIndex(ConstantIndex(idx))),
            },
        })
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        reader.table(StackMapFrame::read).map(StackMapTable)
    }
}

/// Verification type as written in a class file: classes are pool indices and uninitialized
/// values point at the offset of their `new` instruction
pub type RawVerificationType = VerificationType<ClassConstantIndex, u16>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Same locals as the previous frame, empty stack (tags 0-63 or 251)
    SameLocalsNoStack { offset_delta: u16 },

    /// Same locals as the previous frame, one stack item (tags 64-127 or 247)
    SameLocalsOneStack {
        offset_delta: u16,
        stack: RawVerificationType,
    },

    /// Previous frame without its last `chopped_k` locals (1 to 3), empty stack (tags 248-250)
    ChopLocalsNoStack { offset_delta: u16, chopped_k: u8 },

    /// Previous frame with 1 to 3 extra locals, empty stack (tags 252-254)
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<RawVerificationType>,
    },

    /// Exactly these locals and stack (tag 255)
    Full {
        offset_delta: u16,
        locals: Vec<RawVerificationType>,
        stack: Vec<RawVerificationType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta }
            | StackMapFrame::SameLocalsOneStack { offset_delta, .. }
            | StackMapFrame::ChopLocalsNoStack { offset_delta, .. }
            | StackMapFrame::AppendLocalsNoStack { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    pub fn read(reader: &mut ByteReader) -> Result<StackMapFrame, Error> {
        let tag_offset = reader.offset();
        let frame = match reader.u8()? {
            tag @ 0..=63 => StackMapFrame::SameLocalsNoStack {
                offset_delta: tag as u16,
            },
            tag @ 64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: (tag - 64) as u16,
                stack: RawVerificationType::read(reader)?,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: reader.u16()?,
                stack: RawVerificationType::read(reader)?,
            },
            tag @ 248..=250 => StackMapFrame::ChopLocalsNoStack {
                offset_delta: reader.u16()?,
                chopped_k: 251 - tag,
            },
            251 => StackMapFrame::SameLocalsNoStack {
                offset_delta: reader.u16()?,
            },
            tag @ 252..=254 => {
                let offset_delta = reader.u16()?;
                let mut locals = vec![];
                for _ in 0..(tag - 251) {
                    locals.push(RawVerificationType::read(reader)?);
                }
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta,
                    locals,
                }
            }
            255 => StackMapFrame::Full {
                offset_delta: reader.u16()?,
                locals: reader.table(RawVerificationType::read)?,
                stack: reader.table(RawVerificationType::read)?,
            },
            tag => {
                return Err(Error::malformed(
                    tag_offset,
                    MalformedKind::UnknownFrameType(tag),
                ))
            }
        };
        Ok(frame)
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        match self {
            StackMapFrame::SameLocalsNoStack { offset_delta } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8).serialize(writer)?;
                } else {
                    251u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
            }
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
            } => {
                if *offset_delta <= 63 {
                    (*offset_delta as u8 + 64).serialize(writer)?;
                } else {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                debug_assert!((1..=3).contains(chopped_k), "chop frames remove 1-3 locals");
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                debug_assert!((1..=3).contains(&locals.len()), "append frames add 1-3 locals");
                (251 + locals.len() as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.23
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethods(pub Vec<BootstrapMethodEntry>);

/// One entry of the `BootstrapMethods` table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapMethodEntry {
    pub method_handle: ConstantIndex,
    pub arguments: Vec<ConstantIndex>,
}

impl Serialize for BootstrapMethods {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        u16_count("bootstrap methods", self.0.len())?.serialize(writer)?;
        for entry in &self.0 {
            entry.serialize(writer)?;
        }
        Ok(())
    }
}

impl Serialize for BootstrapMethodEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.method_handle.serialize(writer)?;
        u16_count("bootstrap arguments", self.arguments.len())?.serialize(writer)?;
        for argument in &self.arguments {
            argument.serialize(writer)?;
        }
        Ok(())
    }
}

impl AttributeLike for BootstrapMethods {
    const NAME: &'static str = "BootstrapMethods";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        let entries = reader.table(|reader| {
            Ok(BootstrapMethodEntry {
                method_handle: ConstantIndex::read(reader)?,
                arguments: reader.table(ConstantIndex::read)?,
            })
        })?;
        Ok(BootstrapMethods(entries))
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.28
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestHost(pub ClassConstantIndex);

impl Serialize for NestHost {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for NestHost {
    const NAME: &'static str = "NestHost";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        ClassConstantIndex::read(reader).map(NestHost)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.29
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestMembers(pub Vec<ClassConstantIndex>);

impl Serialize for NestMembers {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for NestMembers {
    const NAME: &'static str = "NestMembers";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        reader.table(ClassConstantIndex::read).map(NestMembers)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exceptions(pub Vec<ClassConstantIndex>);

impl Serialize for Exceptions {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for Exceptions {
    const NAME: &'static str = "Exceptions";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        reader.table(ClassConstantIndex::read).map(Exceptions)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClasses(pub Vec<InnerClassEntry>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerClassEntry {
    pub inner_class: ClassConstantIndex,
    pub outer_class: Option<ClassConstantIndex>,
    pub inner_name: Option<Utf8ConstantIndex>,
    pub access_flags: InnerClassAccessFlags,
}

impl Serialize for InnerClasses {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl Serialize for InnerClassEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.inner_class.serialize(writer)?;
        self.outer_class.map_or(0, |c| (c.0).0).serialize(writer)?;
        self.inner_name.map_or(0, |n| (n.0).0).serialize(writer)?;
        self.access_flags.serialize(writer)
    }
}

impl AttributeLike for InnerClasses {
    const NAME: &'static str = "InnerClasses";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        let entries = reader.table(|reader| {
            let inner_class = ClassConstantIndex::read(reader)?;
            let outer_class = match reader.u16()? {
                0 => None,
                idx => Some(ClassConstantIndex(ConstantIndex(idx))),
            };
            let inner_name = match reader.u16()? {
                0 => None,
                idx => Some(Utf8ConstantIndex(ConstantIndex(idx))),
            };
            Ok(InnerClassEntry {
                inner_class,
                outer_class,
                inner_name,
                access_flags: InnerClassAccessFlags::read(reader)?,
            })
        })?;
        Ok(InnerClasses(entries))
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.9
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub Utf8ConstantIndex);

impl Serialize for Signature {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for Signature {
    const NAME: &'static str = "Signature";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        Utf8ConstantIndex::read(reader).map(Signature)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.10
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFile(pub Utf8ConstantIndex);

impl Serialize for SourceFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for SourceFile {
    const NAME: &'static str = "SourceFile";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        Utf8ConstantIndex::read(reader).map(SourceFile)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberTable(pub Vec<LineNumberEntry>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        u16_count("line numbers", self.0.len())?.serialize(writer)?;
        for entry in &self.0 {
            entry.start_pc.serialize(writer)?;
            entry.line_number.serialize(writer)?;
        }
        Ok(())
    }
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        let entries = reader.table(|reader| {
            Ok(LineNumberEntry {
                start_pc: reader.u16()?,
                line_number: reader.u16()?,
            })
        })?;
        Ok(LineNumberTable(entries))
    }
}

/// Entry of the `LocalVariableTable` (where `descriptor` is a field descriptor) or of the
/// `LocalVariableTypeTable` (where it is a generic signature)
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub index: u16,
}

impl Serialize for LocalVariableEntry {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.index.serialize(writer)
    }
}

impl LocalVariableEntry {
    fn read(reader: &mut ByteReader) -> Result<LocalVariableEntry, Error> {
        Ok(LocalVariableEntry {
            start_pc: reader.u16()?,
            length: reader.u16()?,
            name: Utf8ConstantIndex::read(reader)?,
            descriptor: Utf8ConstantIndex::read(reader)?,
            index: reader.u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTable(pub Vec<LocalVariableEntry>);

impl Serialize for LocalVariableTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for LocalVariableTable {
    const NAME: &'static str = "LocalVariableTable";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        reader
            .table(LocalVariableEntry::read)
            .map(LocalVariableTable)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.14
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTypeTable(pub Vec<LocalVariableEntry>);

impl Serialize for LocalVariableTypeTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for LocalVariableTypeTable {
    const NAME: &'static str = "LocalVariableTypeTable";

    fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        reader
            .table(LocalVariableEntry::read)
            .map(LocalVariableTypeTable)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip<A: AttributeLike + PartialEq + std::fmt::Debug>(attribute: A) {
        let mut bytes = vec![];
        attribute.serialize(&mut bytes).unwrap();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(A::read_all(&mut reader).unwrap(), attribute);
    }

    #[test]
    fn frames_pick_short_or_extended_tags() {
        let mut bytes = vec![];
        StackMapFrame::SameLocalsNoStack { offset_delta: 63 }
            .serialize(&mut bytes)
            .unwrap();
        StackMapFrame::SameLocalsNoStack { offset_delta: 64 }
            .serialize(&mut bytes)
            .unwrap();
        assert_eq!(bytes, vec![63, 251, 0, 64]);
    }

    #[test]
    fn structured_attributes_read_back() {
        round_trip(StackMapTable(vec![
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 3,
                stack: VerificationType::Integer,
            },
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 300,
                chopped_k: 2,
            },
            StackMapFrame::Full {
                offset_delta: 1,
                locals: vec![VerificationType::Top, VerificationType::Uninitialized(7)],
                stack: vec![VerificationType::Object(ClassConstantIndex(ConstantIndex(2)))],
            },
        ]));
        round_trip(LineNumberTable(vec![LineNumberEntry {
            start_pc: 0,
            line_number: 12,
        }]));
        round_trip(BootstrapMethods(vec![BootstrapMethodEntry {
            method_handle: ConstantIndex(4),
            arguments: vec![ConstantIndex(5), ConstantIndex(6)],
        }]));
    }

    #[test]
    fn leftover_attribute_bytes_are_malformed() {
        let bytes = [0u8, 1, 0xFF];
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            SourceFile::read_all(&mut reader),
            Err(Error::Malformed {
                kind: MalformedKind::BadAttributeLength { .. },
                ..
            })
        ));
    }
}
