use super::{
    BootstrapMethod, ConstantPool, DynamicConstant, FieldRef, HandleMember, InvokeDynamic,
    LoadableConstant, MethodHandle, MethodRef,
};
use crate::class_file::{
    BootstrapMethodEntry, ClassConstantIndex, Constant, ConstantIndex, FieldRefConstantIndex,
    InvokeDynamicConstantIndex, JavaString, MethodHandleConstantIndex, MethodRefConstantIndex,
    NameAndTypeConstantIndex, Utf8ConstantIndex,
};
use crate::descriptors::{FieldType, MethodDescriptor, RefType, RenderDescriptor};
use crate::errors::Error;
use crate::names::{BinaryName, Name};

/// Symbolic values which can be added to a constant pool
///
/// Adding is idempotent: a value equal to one added before (or present in a parsed pool) gets
/// the index of the existing entry. A failed add leaves the pool untouched.
pub trait ConstantsWriter<Index = ConstantIndex> {
    /// Get or insert a constant into the constant pool and return the associated index
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<Index, Error>;
}

impl ConstantPool {
    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8(&mut self, utf8: impl AsRef<str>) -> Result<Utf8ConstantIndex, Error> {
        self.get_java_utf8(JavaString::from(utf8.as_ref()))
    }

    /// Get or insert a utf8 constant that may hold unpaired surrogates
    pub fn get_java_utf8(&mut self, utf8: JavaString) -> Result<Utf8ConstantIndex, Error> {
        self.push_constant(Constant::Utf8(utf8)).map(Utf8ConstantIndex)
    }

    /// Get or insert a string constant (and its utf8 contents)
    pub fn get_string(&mut self, string: impl Into<JavaString>) -> Result<ConstantIndex, Error> {
        self.transaction(|pool| {
            let utf8 = pool.get_java_utf8(string.into())?;
            pool.push_constant(Constant::String(utf8))
        })
    }

    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Integer(integer))
    }

    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Float(float))
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Long(long))
    }

    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, Error> {
        self.push_constant(Constant::Double(double))
    }

    /// Get or insert a class constant from its internal name (a descriptor for arrays)
    pub fn get_class(&mut self, internal_name: impl AsRef<str>) -> Result<ClassConstantIndex, Error> {
        self.transaction(|pool| {
            let name = pool.get_utf8(internal_name)?;
            pool.push_constant(Constant::Class(name))
                .map(ClassConstantIndex)
        })
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: impl AsRef<str>,
        descriptor: impl AsRef<str>,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        self.transaction(|pool| {
            let name = pool.get_utf8(name)?;
            let descriptor = pool.get_utf8(descriptor)?;
            pool.push_constant(Constant::NameAndType { name, descriptor })
                .map(NameAndTypeConstantIndex)
        })
    }

    pub fn get_method_type(
        &mut self,
        descriptor: &MethodDescriptor,
    ) -> Result<ConstantIndex, Error> {
        self.transaction(|pool| {
            let descriptor = pool.get_utf8(descriptor.render())?;
            pool.push_constant(Constant::MethodType { descriptor })
        })
    }

    pub fn get_module(&mut self, name: impl AsRef<str>) -> Result<ConstantIndex, Error> {
        self.transaction(|pool| {
            let name = pool.get_utf8(name)?;
            pool.push_constant(Constant::Module(name))
        })
    }

    pub fn get_package(&mut self, name: impl AsRef<str>) -> Result<ConstantIndex, Error> {
        self.transaction(|pool| {
            let name = pool.get_utf8(name)?;
            pool.push_constant(Constant::Package(name))
        })
    }

    /// Get or insert a bootstrap method (along with its handle and arguments)
    pub fn get_bootstrap_method(&mut self, bootstrap: &BootstrapMethod) -> Result<u16, Error> {
        bootstrap.constant_index(self)
    }

    /// Get or insert any symbolic constant
    pub fn intern<I, C: ConstantsWriter<I> + ?Sized>(&mut self, constant: &C) -> Result<I, Error> {
        constant.constant_index(self)
    }
}

impl ConstantsWriter<ClassConstantIndex> for BinaryName {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<ClassConstantIndex, Error> {
        constants.get_class(self.as_str())
    }
}

/// When making a `CONSTANT_Class_info`, reference types are almost always objects. However,
/// there are a handful of places where an array type needs to be fit in (eg. for a `checkcast`
/// to an array type). See section 4.4.1 for more.
impl ConstantsWriter<ClassConstantIndex> for RefType {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<ClassConstantIndex, Error> {
        match self {
            RefType::Object(name) => constants.get_class(name.as_str()),
            other => constants.get_class(other.render()),
        }
    }
}

impl ConstantsWriter<FieldRefConstantIndex> for FieldRef {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<FieldRefConstantIndex, Error> {
        constants.transaction(|pool| {
            let class = self.class.constant_index(pool)?;
            let name_and_type = pool.get_name_and_type(&self.name, self.descriptor.render())?;
            pool.push_constant(Constant::FieldRef {
                class,
                name_and_type,
            })
            .map(FieldRefConstantIndex)
        })
    }
}

impl ConstantsWriter<MethodRefConstantIndex> for MethodRef {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<MethodRefConstantIndex, Error> {
        constants.transaction(|pool| {
            let class = self.class.constant_index(pool)?;
            let name_and_type = pool.get_name_and_type(&self.name, self.descriptor.render())?;
            pool.push_constant(Constant::MethodRef {
                class,
                name_and_type,
                is_interface: self.is_interface,
            })
            .map(MethodRefConstantIndex)
        })
    }
}

impl ConstantsWriter<MethodHandleConstantIndex> for MethodHandle {
    fn constant_index(
        &self,
        constants: &mut ConstantPool,
    ) -> Result<MethodHandleConstantIndex, Error> {
        constants.transaction(|pool| {
            let member: ConstantIndex = match &self.member {
                HandleMember::Field(field) => field.constant_index(pool)?.into(),
                HandleMember::Method(method) => method.constant_index(pool)?.into(),
            };
            pool.push_constant(Constant::MethodHandle {
                handle_kind: self.kind,
                member,
            })
            .map(MethodHandleConstantIndex)
        })
    }
}

impl ConstantsWriter<u16> for BootstrapMethod {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<u16, Error> {
        constants.transaction(|pool| {
            let method_handle = self.handle.constant_index(pool)?.into();
            let arguments = self
                .arguments
                .iter()
                .map(|argument| argument.constant_index(pool))
                .collect::<Result<Vec<_>, _>>()?;
            pool.push_bootstrap_method(BootstrapMethodEntry {
                method_handle,
                arguments,
            })
        })
    }
}

impl ConstantsWriter<ConstantIndex> for DynamicConstant {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<ConstantIndex, Error> {
        constants.transaction(|pool| {
            let bootstrap_method = self.bootstrap.constant_index(pool)?;
            let name_and_type = pool.get_name_and_type(&self.name, self.descriptor.render())?;
            pool.push_constant(Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            })
        })
    }
}

impl ConstantsWriter<InvokeDynamicConstantIndex> for InvokeDynamic {
    fn constant_index(
        &self,
        constants: &mut ConstantPool,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        constants.transaction(|pool| {
            let bootstrap_method = self.bootstrap.constant_index(pool)?;
            let name_and_type = pool.get_name_and_type(&self.name, self.descriptor.render())?;
            pool.push_constant(Constant::InvokeDynamic {
                bootstrap_method,
                name_and_type,
            })
            .map(InvokeDynamicConstantIndex)
        })
    }
}

impl ConstantsWriter<ConstantIndex> for LoadableConstant {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<ConstantIndex, Error> {
        match self {
            LoadableConstant::Integer(integer) => constants.get_integer(*integer),
            LoadableConstant::Float(float) => constants.get_float(*float),
            LoadableConstant::Long(long) => constants.get_long(*long),
            LoadableConstant::Double(double) => constants.get_double(*double),
            LoadableConstant::String(string) => constants.get_string(string.clone()),
            LoadableConstant::Class(class) => Ok(class.constant_index(constants)?.into()),
            LoadableConstant::MethodHandle(handle) => Ok(handle.constant_index(constants)?.into()),
            LoadableConstant::MethodType(descriptor) => constants.get_method_type(descriptor),
            LoadableConstant::Dynamic(dynamic) => dynamic.constant_index(constants),
        }
    }
}

impl ConstantsWriter<Utf8ConstantIndex> for FieldType {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<Utf8ConstantIndex, Error> {
        constants.get_utf8(self.render())
    }
}

impl ConstantsWriter<Utf8ConstantIndex> for MethodDescriptor {
    fn constant_index(&self, constants: &mut ConstantPool) -> Result<Utf8ConstantIndex, Error> {
        constants.get_utf8(self.render())
    }
}
