use crate::access_flags::MethodAccessFlags;
use crate::class_file::{
    AttributeLike, ByteReader, Code, Exceptions, Method, Signature, Version,
};
use crate::code::{assemble_code, parse_code, AssemblyTarget, CodeModel, MethodShape};
use crate::constant_pool::ConstantPool;
use crate::descriptors::{MethodDescriptor, ParseDescriptor, RenderDescriptor};
use crate::errors::Error;
use crate::model::{unknown_attribute, UnknownAttribute};
use crate::names::{BinaryName, Name, UnqualifiedName};
use crate::options::Options;
use crate::verifier::ClassInfo;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Semantic representation of a method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodModel {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub elements: Vec<MethodElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodElement {
    AccessFlags(MethodAccessFlags),

    /// Method body (absent for `abstract` and `native` methods)
    Code(LazyCode),

    /// Checked exceptions the method declares
    Exceptions(Vec<BinaryName>),

    /// Generic signature
    ///
    /// [Format](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.9.1)
    Signature(String),
    Attribute(UnknownAttribute),
}

/// Method body that is decoded into a [`CodeModel`] the first time it is looked at
///
/// Parsed methods keep their raw `Code` attribute along with the pool it refers to, so bodies
/// nobody asks for are never decoded. Decoding errors surface on first access. Bodies built in
/// memory start out decoded.
///
/// Decoding takes `&self` and is cached, so a shared model can be inflated from several threads.
#[derive(Clone)]
pub struct LazyCode(Body);

#[derive(Clone)]
enum Body {
    Inflated(CodeModel),
    Raw {
        raw: Box<RawCode>,
        inflated: OnceLock<CodeModel>,
    },
}

#[derive(Clone)]
struct RawCode {
    code: Code,
    constants: Arc<ConstantPool>,
    this_class: BinaryName,
    name: UnqualifiedName,
    descriptor: MethodDescriptor,
    is_static: bool,
    options: Options,
}

impl RawCode {
    fn inflate(&self) -> Result<CodeModel, Error> {
        log::trace!(
            "Inflating {}.{}{} ({} bytes)",
            self.this_class,
            self.name,
            self.descriptor.render(),
            self.code.code_array.len()
        );
        let shape = MethodShape {
            this_class: &self.this_class,
            name: &self.name,
            descriptor: &self.descriptor,
            is_static: self.is_static,
        };
        parse_code(&self.code, &self.constants, shape, &self.options)
    }
}

impl LazyCode {
    /// Decoded body, decoding it now if this is the first access
    pub fn get(&self) -> Result<&CodeModel, Error> {
        match &self.0 {
            Body::Inflated(code) => Ok(code),
            Body::Raw { raw, inflated } => {
                if let Some(code) = inflated.get() {
                    return Ok(code);
                }
                let code = raw.inflate()?;
                Ok(inflated.get_or_init(|| code))
            }
        }
    }

    /// Decoded body, for editing in place
    pub fn get_mut(&mut self) -> Result<&mut CodeModel, Error> {
        if let Body::Raw { raw, inflated } = &mut self.0 {
            let code = match inflated.take() {
                Some(code) => code,
                None => raw.inflate()?,
            };
            self.0 = Body::Inflated(code);
        }
        match &mut self.0 {
            Body::Inflated(code) => Ok(code),
            Body::Raw { .. } => unreachable!("body was just inflated"),
        }
    }

    pub fn into_model(self) -> Result<CodeModel, Error> {
        match self.0 {
            Body::Inflated(code) => Ok(code),
            Body::Raw { raw, inflated } => match inflated.into_inner() {
                Some(code) => Ok(code),
                None => raw.inflate(),
            },
        }
    }

    /// Has the body been decoded yet?
    pub fn is_inflated(&self) -> bool {
        match &self.0 {
            Body::Inflated(_) => true,
            Body::Raw { inflated, .. } => inflated.get().is_some(),
        }
    }
}

impl From<CodeModel> for LazyCode {
    fn from(code: CodeModel) -> LazyCode {
        LazyCode(Body::Inflated(code))
    }
}

impl fmt::Debug for LazyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Body::Inflated(code) => fmt::Debug::fmt(code, f),
            Body::Raw { raw, inflated } => match inflated.get() {
                Some(code) => fmt::Debug::fmt(code, f),
                None => write!(f, "LazyCode({} bytes)", raw.code.code_array.len()),
            },
        }
    }
}

/// Bodies are equal when they decode to the same code (undecodable bodies are never equal)
impl PartialEq for LazyCode {
    fn eq(&self, other: &LazyCode) -> bool {
        match (self.get(), other.get()) {
            (Ok(code), Ok(other)) => code == other,
            _ => false,
        }
    }
}

impl MethodModel {
    pub(crate) fn from_method(
        method: &Method,
        constants: &Arc<ConstantPool>,
        this_class: &BinaryName,
        options: &Options,
    ) -> Result<MethodModel, Error> {
        let name = UnqualifiedName::from_str(constants.utf8_at(method.name_index)?)?;
        let descriptor = MethodDescriptor::parse(constants.utf8_at(method.descriptor_index)?)?;

        let mut elements = vec![MethodElement::AccessFlags(method.access_flags)];
        for attribute in &method.attributes {
            let attribute_name = constants.utf8_at(attribute.name_index)?;
            let mut info = ByteReader::new(&attribute.info);
            let element = match attribute_name {
                Code::NAME => MethodElement::Code(LazyCode(Body::Raw {
                    raw: Box::new(RawCode {
                        code: Code::read_all(&mut info)?,
                        constants: constants.clone(),
                        this_class: this_class.clone(),
                        name: name.clone(),
                        descriptor: descriptor.clone(),
                        is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
                        options: options.clone(),
                    }),
                    inflated: OnceLock::new(),
                })),
                Exceptions::NAME => {
                    let exceptions = Exceptions::read_all(&mut info)?
                        .0
                        .into_iter()
                        .map(|class| constants.class_name_at(class))
                        .collect::<Result<Vec<_>, Error>>()?;
                    MethodElement::Exceptions(exceptions)
                }
                Signature::NAME => {
                    let signature = Signature::read_all(&mut info)?;
                    MethodElement::Signature(constants.utf8_at(signature.0)?.to_owned())
                }
                other => match unknown_attribute(other, attribute, constants, options)? {
                    Some(unknown) => MethodElement::Attribute(unknown),
                    None => continue,
                },
            };
            elements.push(element);
        }

        Ok(MethodModel {
            name,
            descriptor,
            elements,
        })
    }

    pub fn access_flags(&self) -> MethodAccessFlags {
        self.elements
            .iter()
            .find_map(|element| match element {
                MethodElement::AccessFlags(flags) => Some(*flags),
                _ => None,
            })
            .unwrap_or_else(MethodAccessFlags::empty)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags().contains(MethodAccessFlags::STATIC)
    }

    /// Body as it is stored, without decoding it
    pub fn lazy_code(&self) -> Option<&LazyCode> {
        self.elements.iter().find_map(|element| match element {
            MethodElement::Code(code) => Some(code),
            _ => None,
        })
    }

    /// Decoded body (`None` for `abstract` and `native` methods)
    pub fn code(&self) -> Result<Option<&CodeModel>, Error> {
        self.lazy_code().map(LazyCode::get).transpose()
    }

    pub fn shape<'a>(&'a self, this_class: &'a BinaryName) -> MethodShape<'a> {
        MethodShape {
            this_class,
            name: &self.name,
            descriptor: &self.descriptor,
            is_static: self.is_static(),
        }
    }

    /// Serialize the method, assembling its code
    pub(crate) fn write(
        &self,
        constants: &mut ConstantPool,
        this_class: &BinaryName,
        class_info: &ClassInfo,
        version: Version,
        options: &Options,
    ) -> Result<Method, Error> {
        let name_index = constants.get_utf8(self.name.as_str())?;
        let descriptor_index = constants.intern(&self.descriptor)?;

        let mut attributes = vec![];
        for element in &self.elements {
            match element {
                MethodElement::AccessFlags(_) => (),
                MethodElement::Code(code) => {
                    let code = code.get()?;
                    let target = AssemblyTarget {
                        method: self.shape(this_class),
                        class_info,
                        version,
                    };
                    let mut labels = code.label_generator();
                    let code = assemble_code(&code.elements, &mut labels, target, constants, options)
                        .map_err(|err| {
                            log::error!(
                                "Cannot assemble {}.{}{}: {}",
                                this_class,
                                self.name,
                                self.descriptor.render(),
                                err
                            );
                            err
                        })?;
                    attributes.push(constants.get_attribute(code)?);
                }
                MethodElement::Exceptions(exceptions) => {
                    let exceptions = exceptions
                        .iter()
                        .map(|class| constants.intern(class))
                        .collect::<Result<Vec<_>, Error>>()?;
                    attributes.push(constants.get_attribute(Exceptions(exceptions))?);
                }
                MethodElement::Signature(signature) => {
                    let signature = Signature(constants.get_utf8(signature)?);
                    attributes.push(constants.get_attribute(signature)?);
                }
                MethodElement::Attribute(unknown) => attributes.push(unknown.write(constants)?),
            }
        }

        Ok(Method {
            access_flags: self.access_flags(),
            name_index,
            descriptor_index,
            attributes,
        })
    }
}
