use crate::errors::Error;
use crate::names::{BinaryName, Name};
use crate::util::Width;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Conversion of types to their descriptor strings
pub trait RenderDescriptor {
    fn render(&self) -> String {
        let mut out = String::new();
        self.render_to(&mut out);
        out
    }

    fn render_to(&self, out: &mut String);
}

/// Parsing of types from their descriptor strings
pub trait ParseDescriptor: Sized {
    /// Parse a whole descriptor, rejecting leftover input
    fn parse(source: &str) -> Result<Self, Error> {
        let mut chars = source.chars().peekable();
        let parsed = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(parsed),
            Some(c) => Err(Error::InvalidDescriptor(format!(
                "unexpected '{}' after the end of '{}'",
                c, source
            ))),
        }
    }

    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    fn descriptor_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }

    fn from_descriptor_char(c: char) -> Option<BaseType> {
        Some(match c {
            'B' => BaseType::Byte,
            'C' => BaseType::Char,
            'D' => BaseType::Double,
            'F' => BaseType::Float,
            'I' => BaseType::Int,
            'J' => BaseType::Long,
            'S' => BaseType::Short,
            'Z' => BaseType::Boolean,
            _ => return None,
        })
    }
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, out: &mut String) {
        out.push(self.descriptor_char());
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        match source.next() {
            Some(c) => BaseType::from_descriptor_char(c)
                .ok_or_else(|| Error::InvalidDescriptor(format!("'{}' is not a base type", c))),
            None => Err(Error::InvalidDescriptor(String::from("missing base type"))),
        }
    }
}

/// Array of some element type
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// `A[]` has 0 additional dimensions, `A[][][]` has 2
    pub additional_dimensions: usize,

    /// Innermost non-array type
    pub element_type: T,
}

impl<T> ArrayType<T> {
    pub const fn dimensions(&self) -> usize {
        self.additional_dimensions + 1
    }
}

/// Reference types
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType {
    Object(BinaryName),
    ObjectArray(ArrayType<BinaryName>),
    PrimitiveArray(ArrayType<BaseType>),
}

impl RefType {
    pub const OBJECT: RefType = RefType::Object(BinaryName::OBJECT);
    pub const STRING: RefType = RefType::Object(BinaryName::STRING);
    pub const THROWABLE: RefType = RefType::Object(BinaryName::THROWABLE);
    pub const CLASS: RefType = RefType::Object(BinaryName::CLASS);

    pub const fn object(name: BinaryName) -> RefType {
        RefType::Object(name)
    }

    /// Array whose components have the given type
    pub fn array(component: FieldType) -> RefType {
        match component {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(arr)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(arr)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: arr.additional_dimensions + 1,
                element_type: arr.element_type,
            }),
        }
    }

    /// Type of the components, if this is an array
    pub fn component(&self) -> Option<FieldType> {
        match self {
            RefType::Object(_) => None,
            RefType::ObjectArray(arr) if arr.additional_dimensions == 0 => {
                Some(FieldType::object(arr.element_type.clone()))
            }
            RefType::PrimitiveArray(arr) if arr.additional_dimensions == 0 => {
                Some(FieldType::Base(arr.element_type))
            }
            RefType::ObjectArray(arr) => Some(FieldType::Ref(RefType::ObjectArray(ArrayType {
                additional_dimensions: arr.additional_dimensions - 1,
                element_type: arr.element_type.clone(),
            }))),
            RefType::PrimitiveArray(arr) => {
                Some(FieldType::Ref(RefType::PrimitiveArray(ArrayType {
                    additional_dimensions: arr.additional_dimensions - 1,
                    element_type: arr.element_type,
                })))
            }
        }
    }

    /// Number of array dimensions (0 for plain objects)
    pub fn dimensions(&self) -> usize {
        match self {
            RefType::Object(_) => 0,
            RefType::ObjectArray(arr) => arr.dimensions(),
            RefType::PrimitiveArray(arr) => arr.dimensions(),
        }
    }

    pub fn is_array(&self) -> bool {
        !matches!(self, RefType::Object(_))
    }

    /// Name used in `CONSTANT_Class` entries: a binary name for classes, a descriptor for arrays
    pub fn internal_name(&self) -> String {
        match self {
            RefType::Object(name) => name.as_str().to_owned(),
            _ => self.render(),
        }
    }

    /// Inverse of [`RefType::internal_name`]
    pub fn from_internal_name(name: &str) -> Result<RefType, Error> {
        if name.starts_with('[') {
            RefType::parse(name)
        } else {
            BinaryName::from_str(name).map(RefType::Object)
        }
    }
}

impl RenderDescriptor for RefType {
    fn render_to(&self, out: &mut String) {
        fn object(name: &BinaryName, out: &mut String) {
            out.push('L');
            out.push_str(name.as_str());
            out.push(';');
        }
        match self {
            RefType::Object(name) => object(name, out),
            RefType::ObjectArray(arr) => {
                (0..arr.dimensions()).for_each(|_| out.push('['));
                object(&arr.element_type, out);
            }
            RefType::PrimitiveArray(arr) => {
                (0..arr.dimensions()).for_each(|_| out.push('['));
                arr.element_type.render_to(out);
            }
        }
    }
}

fn parse_object_name(source: &mut Peekable<Chars>) -> Result<BinaryName, Error> {
    if source.next() != Some('L') {
        return Err(Error::InvalidDescriptor(String::from(
            "object types start with 'L'",
        )));
    }
    let mut name = String::new();
    loop {
        match source.next() {
            Some(';') => return BinaryName::from_string(name),
            Some(c) => name.push(c),
            None => {
                return Err(Error::InvalidDescriptor(format!(
                    "missing ';' after 'L{}'",
                    name
                )))
            }
        }
    }
}

impl ParseDescriptor for RefType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        match source.peek().copied() {
            Some('L') => parse_object_name(source).map(RefType::Object),
            Some('[') => {
                let mut dimensions = 0;
                while source.next_if_eq(&'[').is_some() {
                    dimensions += 1;
                }
                if dimensions > 255 {
                    return Err(Error::InvalidDescriptor(String::from(
                        "arrays have at most 255 dimensions",
                    )));
                }
                if source.peek() == Some(&'L') {
                    Ok(RefType::ObjectArray(ArrayType {
                        additional_dimensions: dimensions - 1,
                        element_type: parse_object_name(source)?,
                    }))
                } else {
                    Ok(RefType::PrimitiveArray(ArrayType {
                        additional_dimensions: dimensions - 1,
                        element_type: BaseType::parse_from(source)?,
                    }))
                }
            }
            Some(c) => Err(Error::InvalidDescriptor(format!(
                "'{}' does not start a reference type",
                c
            ))),
            None => Err(Error::InvalidDescriptor(String::from(
                "missing reference type",
            ))),
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.internal_name())
    }
}

/// Type of a field, parameter, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Ref(RefType),
}

impl Width for FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base) => base.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl FieldType {
    pub const fn object(name: BinaryName) -> FieldType {
        FieldType::Ref(RefType::Object(name))
    }

    pub fn array(component: FieldType) -> FieldType {
        FieldType::Ref(RefType::array(component))
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType {
        FieldType::Base(BaseType::Long)
    }

    pub const fn float() -> FieldType {
        FieldType::Base(BaseType::Float)
    }

    pub const fn double() -> FieldType {
        FieldType::Base(BaseType::Double)
    }

    pub const fn boolean() -> FieldType {
        FieldType::Base(BaseType::Boolean)
    }

    pub const fn byte() -> FieldType {
        FieldType::Base(BaseType::Byte)
    }

    pub const fn char() -> FieldType {
        FieldType::Base(BaseType::Char)
    }

    pub const fn short() -> FieldType {
        FieldType::Base(BaseType::Short)
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, out: &mut String) {
        match self {
            FieldType::Base(base) => base.render_to(out),
            FieldType::Ref(ref_type) => ref_type.render_to(out),
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        match source.peek().copied() {
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(_) => BaseType::parse_from(source).map(FieldType::Base),
            None => Err(Error::InvalidDescriptor(String::from("missing field type"))),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parameter and return types of a method
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,

    /// `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn new(parameters: Vec<FieldType>, return_type: Option<FieldType>) -> MethodDescriptor {
        MethodDescriptor {
            parameters,
            return_type,
        }
    }

    /// Number of local slots taken by the arguments (must be at most 255)
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let receiver = usize::from(has_this_param);
        receiver + self.parameters.iter().map(|p| p.width()).sum::<usize>()
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, out: &mut String) {
        out.push('(');
        for parameter in &self.parameters {
            parameter.render_to(out);
        }
        out.push(')');
        match &self.return_type {
            None => out.push('V'),
            Some(typ) => typ.render_to(out),
        }
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, Error> {
        if source.next() != Some('(') {
            return Err(Error::InvalidDescriptor(String::from(
                "method descriptors start with '('",
            )));
        }
        let mut parameters = vec![];
        while source.next_if_eq(&')').is_none() {
            parameters.push(FieldType::parse_from(source)?);
        }
        let return_type = if source.next_if_eq(&'V').is_some() {
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_types() {
        let descriptors = ["I", "J", "Ljava/lang/String;", "[[D", "[Ljava/lang/Object;"];
        for descriptor in descriptors {
            assert_eq!(FieldType::parse(descriptor).unwrap().render(), descriptor);
        }
        assert!(FieldType::parse("V").is_err());
        assert!(FieldType::parse("Ljava/lang/String").is_err());
        assert!(FieldType::parse("II").is_err());
    }

    #[test]
    fn method_descriptors() {
        let desc = MethodDescriptor::parse("(IJ[Ljava/lang/String;)V").unwrap();
        assert_eq!(desc.parameters.len(), 3);
        assert_eq!(desc.return_type, None);
        assert_eq!(desc.parameter_length(false), 4);
        assert_eq!(desc.parameter_length(true), 5);
        assert_eq!(desc.render(), "(IJ[Ljava/lang/String;)V");
        assert!(MethodDescriptor::parse("(I").is_err());
    }

    #[test]
    fn array_components() {
        let nested = RefType::parse("[[I").unwrap();
        assert_eq!(nested.dimensions(), 2);
        assert_eq!(nested.component(), Some(FieldType::array(FieldType::int())));
        assert_eq!(
            RefType::parse("[Ljava/lang/String;").unwrap().component(),
            Some(FieldType::object(BinaryName::STRING))
        );
        assert_eq!(RefType::OBJECT.component(), None);
    }

    #[test]
    fn class_constant_names() {
        assert_eq!(RefType::STRING.internal_name(), "java/lang/String");
        assert_eq!(
            RefType::array(FieldType::int()).internal_name(),
            "[I".to_string()
        );
        assert_eq!(
            RefType::from_internal_name("[Ljava/lang/Object;").unwrap(),
            RefType::array(FieldType::object(BinaryName::OBJECT))
        );
    }
}
