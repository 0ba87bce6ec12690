use crate::class_file::{ByteReader, ClassConstantIndex, Serialize};
use crate::code::Label;
use crate::descriptors::{BaseType, FieldType, RefType};
use crate::errors::{Error, MalformedKind};
use crate::names::BinaryName;
use crate::util::Width;
use byteorder::WriteBytesExt;
use std::fmt;

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot (also the second half of a `long` or `double` local)
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not
    ///
    ///   - while inferring frames, `U` is an [`UninitializedSite`], tracking the class being
    ///     constructed and the position of the `new` instruction in its basic block
    ///   - in code elements, `U` is the [`Label`] bound just before the `new` instruction
    ///   - when serializing into a class file, `U` is the `u16` offset of the `new` instruction
    ///     from the start of the method body
    Uninitialized(U),
}

/// Verification type while inferring or checking frames
pub type InferredType = VerificationType<RefType, UninitializedSite>;

/// Verification type as declared in a `StackMap` code element
pub type DeclaredType = VerificationType<RefType, Label>;

/// Position of a `new` instruction whose result is not yet initialized
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct UninitializedSite {
    /// Once the value is initialized, what will its class be?
    pub class: BinaryName,

    /// Basic block containing the `new` instruction
    pub block: Label,

    /// Index of the `new` instruction inside its block
    pub index: usize,
}

impl<Cls, U> VerificationType<Cls, U> {
    /// Tag of the `verification_type_info` union
    pub fn tag(&self) -> u8 {
        use VerificationType::*;
        match self {
            Top => 0,
            Integer => 1,
            Float => 2,
            Double => 3,
            Long => 4,
            Null => 5,
            UninitializedThis => 6,
            Object(_) => 7,
            Uninitialized(_) => 8,
        }
    }

    /// Type which is fully described by its tag
    fn from_plain_tag(tag: u8) -> Option<Self> {
        use VerificationType::*;
        Some(match tag {
            0 => Top,
            1 => Integer,
            2 => Float,
            3 => Double,
            4 => Long,
            5 => Null,
            6 => UninitializedThis,
            _ => return None,
        })
    }

    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        self.tag() >= 5
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            VerificationType::UninitializedThis | VerificationType::Uninitialized(_)
        )
    }

    pub fn map<C2, U2, E>(
        &self,
        map_class: impl FnOnce(&Cls) -> Result<C2, E>,
        map_uninitialized: impl FnOnce(&U) -> Result<U2, E>,
    ) -> Result<VerificationType<C2, U2>, E> {
        use VerificationType::*;
        Ok(match self {
            Object(class) => Object(map_class(class)?),
            Uninitialized(site) => Uninitialized(map_uninitialized(site)?),
            Top => Top,
            Integer => Integer,
            Float => Float,
            Double => Double,
            Long => Long,
            Null => Null,
            UninitializedThis => UninitializedThis,
        })
    }
}

impl<U> From<FieldType> for VerificationType<RefType, U> {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,

            // `boolean`, `byte`, `char` and `short` are all `int`s on the stack
            FieldType::Base(_) => VerificationType::Integer,
        }
    }
}

impl<U> From<&FieldType> for VerificationType<RefType, U> {
    fn from(field_type: &FieldType) -> Self {
        VerificationType::from(field_type.clone())
    }
}

impl VerificationType<ClassConstantIndex, u16> {
    pub fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        let tag_offset = reader.offset();
        let tag = reader.u8()?;
        if let Some(plain) = VerificationType::from_plain_tag(tag) {
            return Ok(plain);
        }
        match tag {
            7 => Ok(VerificationType::Object(ClassConstantIndex::read(reader)?)),
            8 => Ok(VerificationType::Uninitialized(reader.u16()?)),
            _ => Err(Error::malformed(
                tag_offset,
                MalformedKind::UnknownVerificationType(tag),
            )),
        }
    }
}

impl Serialize for VerificationType<ClassConstantIndex, u16> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.tag().serialize(writer)?;
        match self {
            VerificationType::Object(class) => class.serialize(writer),
            VerificationType::Uninitialized(offset) => offset.serialize(writer),
            _ => Ok(()),
        }
    }
}

/// Number of local variable slots taken
impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use VerificationType::*;
        let keyword = match self {
            Object(ref_type) => return write!(f, "{}", ref_type),
            Uninitialized(site) => {
                return write!(
                    f,
                    "uninitialized({} at {:?}#{})",
                    site.class, site.block, site.index
                )
            }
            Top => "top",
            Integer => "int",
            Float => "float",
            Double => "double",
            Long => "long",
            Null => "null",
            UninitializedThis => "uninitializedThis",
        };
        f.write_str(keyword)
    }
}
