use super::{
    BootstrapMethod, ConstantPool, DynamicConstant, FieldRef, HandleMember, InvokeDynamic,
    LoadableConstant, MethodHandle, MethodRef,
};
use crate::class_file::{
    ClassConstantIndex, Constant, ConstantIndex, FieldRefConstantIndex, HandleKind,
    InvokeDynamicConstantIndex, JavaString, MethodRefConstantIndex, NameAndTypeConstantIndex,
    Utf8ConstantIndex,
};
use crate::descriptors::{FieldType, MethodDescriptor, ParseDescriptor, RefType};
use crate::errors::Error;
use crate::names::{BinaryName, Name, UnqualifiedName};

/// Dynamic constants can take other dynamic constants as bootstrap arguments; real class files
/// never nest them deeply, but a malicious one could make them cyclic.
const MAX_DYNAMIC_NESTING: usize = 32;

impl ConstantPool {
    fn entry(&self, index: ConstantIndex, expected: &'static str) -> Result<&Constant, Error> {
        self.get(index).ok_or(Error::InvalidConstantIndex {
            index: index.0,
            expected,
        })
    }

    fn mismatch<T>(index: ConstantIndex, expected: &'static str) -> Result<T, Error> {
        Err(Error::InvalidConstantIndex {
            index: index.0,
            expected,
        })
    }

    pub fn utf8_at(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.entry(index.0, "Utf8")? {
            Constant::Utf8(string) => match string.as_str() {
                Some(text) => Ok(text),
                None => Self::mismatch(index.0, "Utf8 without unpaired surrogates"),
            },
            _ => Self::mismatch(index.0, "Utf8"),
        }
    }

    /// Utf8 entry as stored, unpaired surrogates included
    pub fn java_string_at(&self, index: Utf8ConstantIndex) -> Result<&JavaString, Error> {
        match self.entry(index.0, "Utf8")? {
            Constant::Utf8(string) => Ok(string),
            _ => Self::mismatch(index.0, "Utf8"),
        }
    }

    /// Class entry, decoded into a reference type (memoized)
    pub fn class_at(&self, index: ClassConstantIndex) -> Result<RefType, Error> {
        if let Some(class) = self.class_cache.get(&index.0 .0) {
            return Ok(class.clone());
        }
        let name = match self.entry(index.0, "Class")? {
            Constant::Class(name) => self.utf8_at(*name)?,
            _ => return Self::mismatch(index.0, "Class"),
        };
        let class = RefType::from_internal_name(name)?;
        Ok(self
            .class_cache
            .insert(index.0 .0, Box::new(class))
            .clone())
    }

    /// Class entry that must name a class or interface (not an array)
    pub fn class_name_at(&self, index: ClassConstantIndex) -> Result<BinaryName, Error> {
        match self.class_at(index)? {
            RefType::Object(name) => Ok(name),
            _ => Self::mismatch(index.0, "Class naming a class or interface"),
        }
    }

    pub fn name_and_type_at(
        &self,
        index: NameAndTypeConstantIndex,
    ) -> Result<(&str, &str), Error> {
        match self.entry(index.0, "NameAndType")? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8_at(*name)?, self.utf8_at(*descriptor)?))
            }
            _ => Self::mismatch(index.0, "NameAndType"),
        }
    }

    pub fn string_at(&self, index: ConstantIndex) -> Result<&JavaString, Error> {
        match self.entry(index, "String")? {
            Constant::String(utf8) => self.java_string_at(*utf8),
            _ => Self::mismatch(index, "String"),
        }
    }

    pub fn field_ref_at(&self, index: FieldRefConstantIndex) -> Result<FieldRef, Error> {
        match self.entry(index.0, "Fieldref")? {
            Constant::FieldRef {
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                Ok(FieldRef {
                    class: self.class_name_at(*class)?,
                    name: UnqualifiedName::from_str(name)?,
                    descriptor: FieldType::parse(descriptor)?,
                })
            }
            _ => Self::mismatch(index.0, "Fieldref"),
        }
    }

    pub fn method_ref_at(&self, index: MethodRefConstantIndex) -> Result<MethodRef, Error> {
        match self.entry(index.0, "Methodref")? {
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                Ok(MethodRef {
                    class: self.class_at(*class)?,
                    name: UnqualifiedName::from_str(name)?,
                    descriptor: MethodDescriptor::parse(descriptor)?,
                    is_interface: *is_interface,
                })
            }
            _ => Self::mismatch(index.0, "Methodref"),
        }
    }

    pub fn method_handle_at(&self, index: ConstantIndex) -> Result<MethodHandle, Error> {
        match self.entry(index, "MethodHandle")? {
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                let member = if handle_kind.is_field() {
                    HandleMember::Field(self.field_ref_at(FieldRefConstantIndex(*member))?)
                } else {
                    HandleMember::Method(self.method_ref_at(MethodRefConstantIndex(*member))?)
                };
                Ok(MethodHandle {
                    kind: *handle_kind,
                    member,
                })
            }
            _ => Self::mismatch(index, "MethodHandle"),
        }
    }

    pub fn method_type_at(&self, index: ConstantIndex) -> Result<MethodDescriptor, Error> {
        match self.entry(index, "MethodType")? {
            Constant::MethodType { descriptor } => {
                MethodDescriptor::parse(self.utf8_at(*descriptor)?)
            }
            _ => Self::mismatch(index, "MethodType"),
        }
    }

    /// Constant that can be pushed by `ldc` or passed to a bootstrap method
    pub fn loadable_at(&self, index: ConstantIndex) -> Result<LoadableConstant, Error> {
        self.loadable_at_depth(index, 0)
    }

    fn loadable_at_depth(&self, index: ConstantIndex, depth: usize) -> Result<LoadableConstant, Error> {
        let loadable = match self.entry(index, "loadable constant")? {
            Constant::Integer(integer) => LoadableConstant::Integer(*integer),
            Constant::Float(float) => LoadableConstant::Float(*float),
            Constant::Long(long) => LoadableConstant::Long(*long),
            Constant::Double(double) => LoadableConstant::Double(*double),
            Constant::String(utf8) => LoadableConstant::String(self.java_string_at(*utf8)?.clone()),
            Constant::Class(_) => LoadableConstant::Class(self.class_at(ClassConstantIndex(index))?),
            Constant::MethodHandle { .. } => {
                LoadableConstant::MethodHandle(self.method_handle_at(index)?)
            }
            Constant::MethodType { .. } => {
                LoadableConstant::MethodType(self.method_type_at(index)?)
            }
            Constant::Dynamic { .. } => {
                LoadableConstant::Dynamic(Box::new(self.dynamic_at_depth(index, depth)?))
            }
            _ => return Self::mismatch(index, "loadable constant"),
        };
        Ok(loadable)
    }

    pub fn bootstrap_method_at(&self, index: u16) -> Result<BootstrapMethod, Error> {
        self.bootstrap_method_at_depth(index, 0)
    }

    fn bootstrap_method_at_depth(&self, index: u16, depth: usize) -> Result<BootstrapMethod, Error> {
        if depth > MAX_DYNAMIC_NESTING {
            return Err(Error::malformed(
                0,
                crate::errors::MalformedKind::NestingTooDeep,
            ));
        }
        let entry = self
            .bootstrap_entry(index)
            .ok_or(Error::InvalidConstantIndex {
                index,
                expected: "bootstrap method",
            })?;
        let handle = self.method_handle_at(entry.method_handle)?;
        let arguments = entry
            .arguments
            .iter()
            .map(|argument| self.loadable_at_depth(*argument, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BootstrapMethod { handle, arguments })
    }

    pub fn dynamic_at(&self, index: ConstantIndex) -> Result<DynamicConstant, Error> {
        self.dynamic_at_depth(index, 0)
    }

    fn dynamic_at_depth(&self, index: ConstantIndex, depth: usize) -> Result<DynamicConstant, Error> {
        match self.entry(index, "Dynamic")? {
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                Ok(DynamicConstant {
                    bootstrap: self.bootstrap_method_at_depth(*bootstrap_method, depth + 1)?,
                    name: UnqualifiedName::from_str(name)?,
                    descriptor: FieldType::parse(descriptor)?,
                })
            }
            _ => Self::mismatch(index, "Dynamic"),
        }
    }

    pub fn invoke_dynamic_at(&self, index: InvokeDynamicConstantIndex) -> Result<InvokeDynamic, Error> {
        match self.entry(index.0, "InvokeDynamic")? {
            Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                Ok(InvokeDynamic {
                    bootstrap: self.bootstrap_method_at(*bootstrap_method)?,
                    name: UnqualifiedName::from_str(name)?,
                    descriptor: MethodDescriptor::parse(descriptor)?,
                })
            }
            _ => Self::mismatch(index.0, "InvokeDynamic"),
        }
    }

    /// Method handle kind of a handle entry, without decoding the member
    pub fn handle_kind_at(&self, index: ConstantIndex) -> Result<HandleKind, Error> {
        match self.entry(index, "MethodHandle")? {
            Constant::MethodHandle { handle_kind, .. } => Ok(*handle_kind),
            _ => Self::mismatch(index, "MethodHandle"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptors::BaseType;

    #[test]
    fn decoding_inverts_interning() {
        let mut pool = ConstantPool::new();
        let field = FieldRef::new(
            BinaryName::SYSTEM,
            UnqualifiedName::OUT,
            FieldType::object(BinaryName::PRINTSTREAM),
        );
        let field_index = pool.intern(&field).unwrap();
        assert_eq!(pool.field_ref_at(field_index).unwrap(), field);

        let array = RefType::array(FieldType::Base(BaseType::Int));
        let class_index = pool.intern(&array).unwrap();
        assert_eq!(pool.class_at(class_index).unwrap(), array);
        assert_eq!(pool.class_at(class_index).unwrap(), array, "cached decode");
        assert!(pool.class_name_at(class_index).is_err());
    }

    #[test]
    fn wrong_kind_of_entry() {
        let mut pool = ConstantPool::new();
        let integer = pool.get_integer(3).unwrap();
        assert!(matches!(
            pool.utf8_at(Utf8ConstantIndex(integer)),
            Err(Error::InvalidConstantIndex { index: 1, .. })
        ));
        assert!(pool.loadable_at(ConstantIndex(0)).is_err());
        assert_eq!(
            pool.loadable_at(integer).unwrap(),
            LoadableConstant::Integer(3)
        );
    }
}
