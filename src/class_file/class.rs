use crate::access_flags::{AccessFlags, ClassAccessFlags};
use crate::class_file::{
    u16_count, Attribute, ByteReader, ClassConstantIndex, ConstantIndex, Field, Method, Serialize,
    Version,
};
use crate::constant_pool::ConstantPool;
use crate::errors::{Error, MalformedKind};
use byteorder::WriteBytesExt;

/// Representation of the [`class` file format of the JVM][0]
///
/// This is the raw structure: everything is still in terms of constant pool indices. See
/// [`crate::model::ClassModel`] for the inflated view.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Only `java/lang/Object` (and `module-info`) have no superclass
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: u32 = 0xCAFEBABE;

    /// Read the raw structure of a class file, rejecting trailing bytes
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = ByteReader::new(bytes);
        let magic = reader.u32()?;
        if magic != ClassFile::MAGIC {
            return Err(Error::malformed(0, MalformedKind::BadMagic(magic)));
        }
        let version = Version::read(&mut reader)?;
        let constants = ConstantPool::read(&mut reader)?;
        let access_flags = ClassAccessFlags::read(&mut reader)?;
        let this_class = ClassConstantIndex::read(&mut reader)?;
        let super_class = match ConstantIndex::read(&mut reader)? {
            ConstantIndex(0) => None,
            index => Some(ClassConstantIndex(index)),
        };
        let interfaces = reader.table(ClassConstantIndex::read)?;
        let fields = reader.table(Field::read)?;
        let methods = reader.table(Method::read)?;
        let attributes = reader.table(Attribute::read)?;
        reader.expect_end()?;

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        ClassFile::MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class
            .map_or(ConstantIndex(0), |class| class.0)
            .serialize(writer)?;
        u16_count("interfaces", self.interfaces.len())?;
        self.interfaces.serialize(writer)?;
        u16_count("fields", self.fields.len())?;
        self.fields.serialize(writer)?;
        u16_count("methods", self.methods.len())?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}
