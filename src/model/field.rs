use crate::access_flags::FieldAccessFlags;
use crate::class_file::{AttributeLike, ByteReader, ConstantValue, Field, Signature};
use crate::constant_pool::{ConstantPool, LoadableConstant};
use crate::descriptors::{FieldType, ParseDescriptor};
use crate::errors::Error;
use crate::model::{unknown_attribute, UnknownAttribute};
use crate::names::{Name, UnqualifiedName};
use crate::options::Options;

/// Semantic representation of a field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldModel {
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
    pub elements: Vec<FieldElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldElement {
    AccessFlags(FieldAccessFlags),

    /// Initial value of a `static` field (`int`, `long`, `float`, `double`, or `String`)
    ConstantValue(LoadableConstant),
    Signature(String),
    Attribute(UnknownAttribute),
}

impl FieldModel {
    pub(crate) fn from_field(
        field: &Field,
        constants: &ConstantPool,
        options: &Options,
    ) -> Result<FieldModel, Error> {
        let name = UnqualifiedName::from_str(constants.utf8_at(field.name_index)?)?;
        let descriptor = FieldType::parse(constants.utf8_at(field.descriptor_index)?)?;

        let mut elements = vec![FieldElement::AccessFlags(field.access_flags)];
        for attribute in &field.attributes {
            let attribute_name = constants.utf8_at(attribute.name_index)?;
            let mut info = ByteReader::new(&attribute.info);
            let element = match attribute_name {
                ConstantValue::NAME => {
                    let value = ConstantValue::read_all(&mut info)?;
                    FieldElement::ConstantValue(constants.loadable_at(value.0)?)
                }
                Signature::NAME => {
                    let signature = Signature::read_all(&mut info)?;
                    FieldElement::Signature(constants.utf8_at(signature.0)?.to_owned())
                }
                other => match unknown_attribute(other, attribute, constants, options)? {
                    Some(unknown) => FieldElement::Attribute(unknown),
                    None => continue,
                },
            };
            elements.push(element);
        }

        Ok(FieldModel {
            name,
            descriptor,
            elements,
        })
    }

    pub fn access_flags(&self) -> FieldAccessFlags {
        self.elements
            .iter()
            .find_map(|element| match element {
                FieldElement::AccessFlags(flags) => Some(*flags),
                _ => None,
            })
            .unwrap_or_else(FieldAccessFlags::empty)
    }

    pub(crate) fn write(&self, constants: &mut ConstantPool) -> Result<Field, Error> {
        let name_index = constants.get_utf8(self.name.as_str())?;
        let descriptor_index = constants.intern(&self.descriptor)?;

        let mut attributes = vec![];
        for element in &self.elements {
            match element {
                FieldElement::AccessFlags(_) => (),
                FieldElement::ConstantValue(value) => {
                    let value = ConstantValue(constants.intern(value)?);
                    attributes.push(constants.get_attribute(value)?);
                }
                FieldElement::Signature(signature) => {
                    let signature = Signature(constants.get_utf8(signature)?);
                    attributes.push(constants.get_attribute(signature)?);
                }
                FieldElement::Attribute(unknown) => attributes.push(unknown.write(constants)?),
            }
        }

        Ok(Field {
            access_flags: self.access_flags(),
            name_index,
            descriptor_index,
            attributes,
        })
    }
}
