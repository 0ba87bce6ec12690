use crate::class_file::{ByteReader, Serialize};
use crate::errors::{Error, MalformedKind};
use crate::util::Width;
use byteorder::WriteBytesExt;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Raw constant pool entry, referring to other entries by index
///
/// Equality and hashing compare floating point payloads by bit pattern, so that `NaN` constants
/// deduplicate and `0.0`/`-0.0` stay distinct.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Modified UTF-8 string (tag 1)
    Utf8(JavaString),

    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),

    /// Class, interface, or array type
    Class(Utf8ConstantIndex),

    /// `java.lang.String` literal
    String(Utf8ConstantIndex),

    FieldRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// `Methodref` or `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    MethodHandle {
        handle_kind: HandleKind,

        /// `FieldRef` for the field kinds, `MethodRef` for the rest
        member: ConstantIndex,
    },

    MethodType {
        descriptor: Utf8ConstantIndex,
    },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Utf8(_) => 1,
            Constant::Integer(_) => 3,
            Constant::Float(_) => 4,
            Constant::Long(_) => 5,
            Constant::Double(_) => 6,
            Constant::Class(_) => 7,
            Constant::String(_) => 8,
            Constant::FieldRef { .. } => 9,
            Constant::MethodRef {
                is_interface: false,
                ..
            } => 10,
            Constant::MethodRef {
                is_interface: true,
                ..
            } => 11,
            Constant::NameAndType { .. } => 12,
            Constant::MethodHandle { .. } => 15,
            Constant::MethodType { .. } => 16,
            Constant::Dynamic { .. } => 17,
            Constant::InvokeDynamic { .. } => 18,
            Constant::Module(_) => 19,
            Constant::Package(_) => 20,
        }
    }

    /// Read one entry (tag included)
    pub fn read(reader: &mut ByteReader) -> Result<Constant, Error> {
        let tag_offset = reader.offset();
        let constant = match reader.u8()? {
            1 => {
                let len = reader.u16()? as usize;
                let at = reader.offset();
                let bytes = reader.bytes(len)?;
                let string = decode_modified_utf8(bytes)
                    .ok_or_else(|| Error::malformed(at, MalformedKind::InvalidModifiedUtf8))?;
                Constant::Utf8(string)
            }
            3 => Constant::Integer(reader.i32()?),
            4 => Constant::Float(reader.f32()?),
            5 => Constant::Long(reader.i64()?),
            6 => Constant::Double(reader.f64()?),
            7 => Constant::Class(Utf8ConstantIndex::read(reader)?),
            8 => Constant::String(Utf8ConstantIndex::read(reader)?),
            9 => Constant::FieldRef {
                class: ClassConstantIndex::read(reader)?,
                name_and_type: NameAndTypeConstantIndex::read(reader)?,
            },
            tag @ (10 | 11) => Constant::MethodRef {
                class: ClassConstantIndex::read(reader)?,
                name_and_type: NameAndTypeConstantIndex::read(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::read(reader)?,
                descriptor: Utf8ConstantIndex::read(reader)?,
            },
            15 => {
                let kind_offset = reader.offset();
                let kind = reader.u8()?;
                let handle_kind = HandleKind::from_u8(kind).ok_or_else(|| {
                    Error::malformed(
                        kind_offset,
                        MalformedKind::InvalidReference(format!("bad method handle kind {}", kind)),
                    )
                })?;
                Constant::MethodHandle {
                    handle_kind,
                    member: ConstantIndex(reader.u16()?),
                }
            }
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::read(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: reader.u16()?,
                name_and_type: NameAndTypeConstantIndex::read(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: reader.u16()?,
                name_and_type: NameAndTypeConstantIndex::read(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::read(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::read(reader)?),
            tag => {
                return Err(Error::malformed(
                    tag_offset,
                    MalformedKind::UnknownConstantTag(tag),
                ))
            }
        };
        Ok(constant)
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Constant) -> bool {
        use Constant::*;
        match (self, other) {
            (Utf8(a), Utf8(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Class(a), Class(b))
            | (String(a), String(b))
            | (Module(a), Module(b))
            | (Package(a), Package(b)) => a == b,
            (
                FieldRef {
                    class: c1,
                    name_and_type: n1,
                },
                FieldRef {
                    class: c2,
                    name_and_type: n2,
                },
            ) => c1 == c2 && n1 == n2,
            (
                MethodRef {
                    class: c1,
                    name_and_type: n1,
                    is_interface: i1,
                },
                MethodRef {
                    class: c2,
                    name_and_type: n2,
                    is_interface: i2,
                },
            ) => c1 == c2 && n1 == n2 && i1 == i2,
            (
                NameAndType {
                    name: n1,
                    descriptor: d1,
                },
                NameAndType {
                    name: n2,
                    descriptor: d2,
                },
            ) => n1 == n2 && d1 == d2,
            (
                MethodHandle {
                    handle_kind: k1,
                    member: m1,
                },
                MethodHandle {
                    handle_kind: k2,
                    member: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (MethodType { descriptor: d1 }, MethodType { descriptor: d2 }) => d1 == d2,
            (
                Dynamic {
                    bootstrap_method: b1,
                    name_and_type: n1,
                },
                Dynamic {
                    bootstrap_method: b2,
                    name_and_type: n2,
                },
            )
            | (
                InvokeDynamic {
                    bootstrap_method: b1,
                    name_and_type: n1,
                },
                InvokeDynamic {
                    bootstrap_method: b2,
                    name_and_type: n2,
                },
            ) => b1 == b2 && n1 == n2,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            Constant::Utf8(string) => string.hash(state),
            Constant::Integer(int) => int.hash(state),
            Constant::Float(float) => float.to_bits().hash(state),
            Constant::Long(long) => long.hash(state),
            Constant::Double(double) => double.to_bits().hash(state),
            Constant::Class(idx)
            | Constant::String(idx)
            | Constant::Module(idx)
            | Constant::Package(idx)
            | Constant::MethodType { descriptor: idx } => idx.hash(state),
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.hash(state);
                name_and_type.hash(state);
            }
            Constant::NameAndType { name, descriptor } => {
                name.hash(state);
                descriptor.hash(state);
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                handle_kind.hash(state);
                member.hash(state);
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.hash(state);
                name_and_type.hash(state);
            }
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.tag().serialize(writer)?;
        match self {
            Constant::Utf8(string) => {
                let encoded = string.encode_modified_utf8();
                let len = u16::try_from(encoded.len())
                    .map_err(|_| Error::Utf8TooLong(encoded.len()))?;
                len.serialize(writer)?;
                writer.write_all(&encoded)?;
            }
            Constant::Integer(int) => int.serialize(writer)?,
            Constant::Float(float) => float.serialize(writer)?,
            Constant::Long(long) => long.serialize(writer)?,
            Constant::Double(double) => double.serialize(writer)?,
            Constant::Class(idx)
            | Constant::String(idx)
            | Constant::Module(idx)
            | Constant::Package(idx)
            | Constant::MethodType { descriptor: idx } => idx.serialize(writer)?,
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            }
            | Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Longs and doubles take two pool slots; the second one is unusable.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Index into the constant pool
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConstantIndex(pub u16);

impl fmt::Debug for ConstantIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.0.serialize(writer)
    }
}

impl ConstantIndex {
    pub fn read(reader: &mut ByteReader) -> Result<ConstantIndex, Error> {
        reader.u16().map(ConstantIndex)
    }
}

/// Indices known to point at a particular kind of entry
macro_rules! typed_constant_indices {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
            pub struct $name(pub ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(index: $name) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
                    self.0.serialize(writer)
                }
            }

            impl $name {
                pub fn read(reader: &mut ByteReader) -> Result<$name, Error> {
                    ConstantIndex::read(reader).map($name)
                }
            }
        )*
    };
}

typed_constant_indices!(
    Utf8ConstantIndex,
    ClassConstantIndex,
    NameAndTypeConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex,
    MethodHandleConstantIndex,
    InvokeDynamicConstantIndex,
);

/// Kinds of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-5.html#jvms-5.4.3.5
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub enum HandleKind {
    GetField = 1,
    GetStatic = 2,
    PutField = 3,
    PutStatic = 4,
    InvokeVirtual = 5,
    InvokeStatic = 6,
    InvokeSpecial = 7,
    NewInvokeSpecial = 8,
    InvokeInterface = 9,
}

impl HandleKind {
    pub fn from_u8(kind: u8) -> Option<HandleKind> {
        Some(match kind {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }

    /// Does the handle point at a field (as opposed to a method)?
    pub fn is_field(self) -> bool {
        matches!(
            self,
            HandleKind::GetField | HandleKind::GetStatic | HandleKind::PutField | HandleKind::PutStatic
        )
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        (*self as u8).serialize(writer)
    }
}

/// Contents of a `CONSTANT_Utf8` entry
///
/// Java strings are sequences of UTF-16 code units, and may hold unpaired surrogates that a Rust
/// `String` can't represent. Well-formed text is stored as a `String`, anything else as the raw
/// code units, so every entry survives being read and written back.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JavaString(JavaStringRepr);

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum JavaStringRepr {
    Text(String),

    /// Code units including at least one unpaired surrogate
    Units(Vec<u16>),
}

impl JavaString {
    pub fn from_utf16(units: Vec<u16>) -> JavaString {
        match String::from_utf16(&units) {
            Ok(text) => JavaString(JavaStringRepr::Text(text)),
            Err(_) => JavaString(JavaStringRepr::Units(units)),
        }
    }

    /// The text, unless it contains unpaired surrogates
    pub fn as_str(&self) -> Option<&str> {
        match &self.0 {
            JavaStringRepr::Text(text) => Some(text),
            JavaStringRepr::Units(_) => None,
        }
    }

    /// The text, with unpaired surrogates replaced by `U+FFFD`
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        match &self.0 {
            JavaStringRepr::Text(text) => Cow::Borrowed(text),
            JavaStringRepr::Units(units) => Cow::Owned(String::from_utf16_lossy(units)),
        }
    }

    pub fn to_utf16(&self) -> Vec<u16> {
        match &self.0 {
            JavaStringRepr::Text(text) => text.encode_utf16().collect(),
            JavaStringRepr::Units(units) => units.clone(),
        }
    }

    pub fn encode_modified_utf8(&self) -> Vec<u8> {
        match &self.0 {
            JavaStringRepr::Text(text) => encode_modified_utf8(text),
            JavaStringRepr::Units(units) => encode_units(units.iter().copied()),
        }
    }

    pub fn modified_utf8_len(&self) -> usize {
        match &self.0 {
            JavaStringRepr::Text(text) => modified_utf8_len(text),
            JavaStringRepr::Units(units) => units.iter().map(|unit| unit_len(*unit)).sum(),
        }
    }
}

impl From<String> for JavaString {
    fn from(text: String) -> JavaString {
        JavaString(JavaStringRepr::Text(text))
    }
}

impl From<&str> for JavaString {
    fn from(text: &str) -> JavaString {
        JavaString(JavaStringRepr::Text(text.to_owned()))
    }
}

impl fmt::Debug for JavaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            JavaStringRepr::Text(text) => text.fmt(f),
            JavaStringRepr::Units(units) => f.debug_tuple("JavaString").field(units).finish(),
        }
    }
}

impl fmt::Display for JavaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Modified UTF-8 used in class files
///
/// See [the `DataInput` documentation][0]. It differs from UTF-8 in that `\u{0000}` takes two
/// bytes, and characters outside the basic multilingual plane are written as two 3-byte encoded
/// surrogates instead of one 4-byte sequence. Working from UTF-16 code units handles both.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    encode_units(string.encode_utf16())
}

fn encode_units(units: impl Iterator<Item = u16>) -> Vec<u8> {
    let mut buffer = vec![];
    for unit in units {
        match unit_len(unit) {
            1 => buffer.push(unit as u8),
            2 => {
                buffer.push(0xC0 | (unit >> 6) as u8);
                buffer.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                buffer.push(0xE0 | (unit >> 12) as u8);
                buffer.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                buffer.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    buffer
}

fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Length of the modified UTF-8 encoding, without encoding
pub fn modified_utf8_len(string: &str) -> usize {
    string.encode_utf16().map(unit_len).sum()
}

/// Inverse of [`JavaString::encode_modified_utf8`]
///
/// Returns `None` on byte sequences no encoder would produce.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<JavaString> {
    if bytes.iter().all(|b| (0x01..0x80).contains(b)) {
        return std::str::from_utf8(bytes).ok().map(JavaString::from);
    }

    let continuation = |idx: usize| -> Option<u16> {
        let byte = *bytes.get(idx)?;
        if byte & 0xC0 == 0x80 {
            Some((byte & 0x3F) as u16)
        } else {
            None
        }
    };

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        let lead = bytes[idx] as u16;
        match bytes[idx] {
            0x01..=0x7F => {
                units.push(lead);
                idx += 1;
            }
            0xC0..=0xDF => {
                units.push(((lead & 0x1F) << 6) | continuation(idx + 1)?);
                idx += 2;
            }
            0xE0..=0xEF => {
                let unit = ((lead & 0x0F) << 12)
                    | (continuation(idx + 1)? << 6)
                    | continuation(idx + 2)?;
                units.push(unit);
                idx += 3;
            }
            _ => return None,
        }
    }
    Some(JavaString::from_utf16(units))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_takes_two_bytes() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(
            decode_modified_utf8(&[97, 192, 128, 97]).unwrap().as_str(),
            Some("a\x00a")
        );
    }

    #[test]
    fn two_and_three_byte_forms() {
        let text = "ĄǍǞऄअॲ";
        let encoded = encode_modified_utf8(text);
        assert_eq!(encoded, text.as_bytes());
        assert_eq!(modified_utf8_len(text), encoded.len());
        assert_eq!(decode_modified_utf8(&encoded).unwrap().as_str(), Some(text));
    }

    #[test]
    fn supplementary_characters_use_surrogates() {
        let encoded = encode_modified_utf8("\u{10000}\u{10FFFF}");
        assert_eq!(
            encoded,
            vec![237, 160, 128, 237, 176, 128, 237, 175, 191, 237, 191, 191]
        );
        assert_eq!(modified_utf8_len("\u{10000}"), 6);
        assert_eq!(
            decode_modified_utf8(&encoded).unwrap().as_str(),
            Some("\u{10000}\u{10FFFF}")
        );
    }

    #[test]
    fn unpaired_surrogates_are_kept() {
        let lone = [0xED, 0xA0, 0x80];
        let string = decode_modified_utf8(&lone).unwrap();
        assert_eq!(string.as_str(), None);
        assert_eq!(string.to_utf16(), vec![0xD800]);
        assert_eq!(string.encode_modified_utf8(), lone);
        assert_eq!(string.modified_utf8_len(), 3);
        assert_eq!(string.to_string_lossy(), "\u{FFFD}");
        assert_ne!(string, JavaString::from("\u{FFFD}"), "distinct from the replacement");

        let constant = Constant::Utf8(string);
        let mut bytes = vec![];
        constant.serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![1, 0, 3, 0xED, 0xA0, 0x80]);
        assert_eq!(Constant::read(&mut ByteReader::new(&bytes)).unwrap(), constant);
    }

    #[test]
    fn rejects_raw_nulls_and_four_byte_forms() {
        assert!(decode_modified_utf8(&[0x00]).is_none());
        assert!(decode_modified_utf8(&[0xF0, 0x90, 0x80, 0x80]).is_none());
        assert!(decode_modified_utf8(&[0xC0]).is_none());
    }

    #[test]
    fn float_constants_compare_by_bits() {
        assert_eq!(Constant::Float(f32::NAN), Constant::Float(f32::NAN));
        assert_ne!(Constant::Double(0.0), Constant::Double(-0.0));
    }

    #[test]
    fn read_back_written_constants() {
        let constants = vec![
            Constant::Utf8(JavaString::from("hello")),
            Constant::Long(-1),
            Constant::MethodRef {
                class: ClassConstantIndex(ConstantIndex(3)),
                name_and_type: NameAndTypeConstantIndex(ConstantIndex(4)),
                is_interface: true,
            },
            Constant::MethodHandle {
                handle_kind: HandleKind::InvokeStatic,
                member: ConstantIndex(9),
            },
        ];
        for constant in constants {
            let mut bytes = vec![];
            constant.serialize(&mut bytes).unwrap();
            let mut reader = ByteReader::new(&bytes);
            assert_eq!(Constant::read(&mut reader).unwrap(), constant);
            assert!(reader.expect_end().is_ok());
        }
    }
}
