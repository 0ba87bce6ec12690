use crate::access_flags::{AccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::class_file::{Attribute, ByteReader, Serialize, Utf8ConstantIndex};
use crate::errors::Error;
use byteorder::WriteBytesExt;

/// `field_info` and `method_info` share a layout, and only differ in which flags are allowed
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.5
/// [1]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone)]
pub struct Member<Flags> {
    pub access_flags: Flags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

pub type Field = Member<FieldAccessFlags>;
pub type Method = Member<MethodAccessFlags>;

impl<Flags: AccessFlags> Member<Flags> {
    pub fn read(reader: &mut ByteReader) -> Result<Self, Error> {
        let access_flags = Flags::read(reader)?;
        let name_index = Utf8ConstantIndex::read(reader)?;
        let descriptor_index = Utf8ConstantIndex::read(reader)?;
        let attributes = reader.table(Attribute::read)?;
        Ok(Member {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }
}

impl<Flags: AccessFlags> Serialize for Member<Flags> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.access_flags.serialize(writer)?;
        for index in [self.name_index, self.descriptor_index] {
            index.serialize(writer)?;
        }
        self.attributes.serialize(writer)
    }
}
