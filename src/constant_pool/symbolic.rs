use crate::class_file::{HandleKind, JavaString};
use crate::descriptors::{FieldType, MethodDescriptor, RefType, RenderDescriptor};
use crate::names::{BinaryName, UnqualifiedName};
use std::fmt;

/// Field reference, as used by `getfield`/`putfield`/`getstatic`/`putstatic`
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FieldRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

impl FieldRef {
    pub fn new(class: BinaryName, name: UnqualifiedName, descriptor: FieldType) -> FieldRef {
        FieldRef {
            class,
            name,
            descriptor,
        }
    }
}

/// Method reference, as used by the `invoke*` instructions
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodRef {
    /// Usually a class, but array types are allowed (`[I.clone()`)
    pub class: RefType,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,

    /// Selects `InterfaceMethodref` over `Methodref`
    pub is_interface: bool,
}

impl MethodRef {
    pub fn new(class: BinaryName, name: UnqualifiedName, descriptor: MethodDescriptor) -> MethodRef {
        MethodRef {
            class: RefType::Object(class),
            name,
            descriptor,
            is_interface: false,
        }
    }

    pub fn interface(
        class: BinaryName,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
    ) -> MethodRef {
        MethodRef {
            is_interface: true,
            ..MethodRef::new(class, name, descriptor)
        }
    }

    pub fn is_init(&self) -> bool {
        self.name == UnqualifiedName::INIT
    }
}

/// Target of a method handle
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum HandleMember {
    Field(FieldRef),
    Method(MethodRef),
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodHandle {
    pub kind: HandleKind,
    pub member: HandleMember,
}

/// Bootstrap method and its static arguments
#[derive(Clone, PartialEq, Debug)]
pub struct BootstrapMethod {
    pub handle: MethodHandle,
    pub arguments: Vec<LoadableConstant>,
}

/// Dynamically-computed constant (`CONSTANT_Dynamic`)
#[derive(Clone, PartialEq, Debug)]
pub struct DynamicConstant {
    pub bootstrap: BootstrapMethod,
    pub name: UnqualifiedName,
    pub descriptor: FieldType,
}

/// Dynamically-computed call site (`CONSTANT_InvokeDynamic`)
#[derive(Clone, PartialEq, Debug)]
pub struct InvokeDynamic {
    pub bootstrap: BootstrapMethod,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
}

/// Constants that `ldc` can push, and that can be bootstrap method arguments
#[derive(Clone, PartialEq, Debug)]
pub enum LoadableConstant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(JavaString),
    Class(RefType),
    MethodHandle(MethodHandle),
    MethodType(MethodDescriptor),
    Dynamic(Box<DynamicConstant>),
}

impl LoadableConstant {
    /// Type of the value pushed when the constant is loaded
    pub fn field_type(&self) -> FieldType {
        match self {
            LoadableConstant::Integer(_) => FieldType::int(),
            LoadableConstant::Float(_) => FieldType::float(),
            LoadableConstant::Long(_) => FieldType::long(),
            LoadableConstant::Double(_) => FieldType::double(),
            LoadableConstant::String(_) => FieldType::object(BinaryName::STRING),
            LoadableConstant::Class(_) => FieldType::object(BinaryName::CLASS),
            LoadableConstant::MethodHandle(_) => FieldType::object(BinaryName::METHODHANDLE),
            LoadableConstant::MethodType(_) => FieldType::object(BinaryName::METHODTYPE),
            LoadableConstant::Dynamic(dynamic) => dynamic.descriptor.clone(),
        }
    }

    /// Long and double constants need `ldc2_w`
    pub fn is_wide(&self) -> bool {
        matches!(
            self.field_type(),
            FieldType::Base(crate::descriptors::BaseType::Long)
                | FieldType::Base(crate::descriptors::BaseType::Double)
        )
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.name, self.descriptor.render())
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{}",
            self.class.internal_name(),
            self.name,
            self.descriptor.render()
        )
    }
}
