//! Inflated view of class files, as streams of elements
//!
//! Parsing goes through two phases: [`ClassFile::parse`] reads the raw structure (everything is
//! still a constant pool index), then the model resolves every index into symbolic values. Method
//! bodies are only turned into [code elements](crate::code::CodeElement) when something first
//! looks at them (see [`LazyCode`]). Elements are what
//! [transforms](crate::transform) and [builders](crate::builder) consume, so a parsed class can be
//! fed straight back into a builder:
//!
//! ```text,ignore,no_run
//!   bytes ──► ClassFile ──► ClassModel ──► Pipeline ──► ClassBuilder ──► bytes
//! ```

mod field;
mod method;

pub use field::*;
pub use method::*;

use crate::access_flags::{ClassAccessFlags, InnerClassAccessFlags};
use crate::builder::ClassBuilder;
use crate::class_file::{
    Attribute, AttributeLike, BootstrapMethods, ByteReader, ClassFile, InnerClasses, NestHost,
    NestMembers, Signature, SourceFile, Version,
};
use crate::constant_pool::ConstantPool;
use crate::errors::Error;
use crate::names::{BinaryName, Name, UnqualifiedName};
use crate::options::{AttributeAction, Options};
use crate::transform::{ElementSink, Pipeline};
use std::sync::Arc;

/// Parsed class
///
/// The source constant pool is kept around: builders in [shared
/// mode](crate::options::ConstantPoolMode::Shared) start from a copy of it, which keeps the indices
/// inside opaque attributes valid. Method bodies share it too, since they are only decoded once
/// they are [accessed](LazyCode).
#[derive(Debug, Clone)]
pub struct ClassModel {
    this_class: BinaryName,
    elements: Vec<ClassElement>,
    constants: Arc<ConstantPool>,
}

/// Top-level element of a class
#[derive(Debug, Clone, PartialEq)]
pub enum ClassElement {
    Version(Version),
    AccessFlags(ClassAccessFlags),

    /// `None` only for `java/lang/Object`
    Superclass(Option<BinaryName>),
    Interfaces(Vec<BinaryName>),
    Field(FieldModel),
    Method(MethodModel),
    Signature(String),
    SourceFile(String),
    InnerClasses(Vec<InnerClass>),
    NestHost(BinaryName),
    NestMembers(Vec<BinaryName>),
    Attribute(UnknownAttribute),
}

/// Entry of the `InnerClasses` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub inner_class: BinaryName,
    pub outer_class: Option<BinaryName>,

    /// `None` for anonymous classes
    pub inner_name: Option<UnqualifiedName>,
    pub access_flags: InnerClassAccessFlags,
}

/// Attribute that isn't modeled, carried as raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAttribute {
    pub name: String,
    pub info: Vec<u8>,

    /// Identity of the constant pool the bytes may refer to
    pub pool: Option<u64>,
}

impl UnknownAttribute {
    /// Attribute whose content does not refer to any constant pool
    pub fn unbound(name: impl Into<String>, info: Vec<u8>) -> UnknownAttribute {
        UnknownAttribute {
            name: name.into(),
            info,
            pool: None,
        }
    }

    /// Write the attribute against a pool
    ///
    /// This fails if the attribute is bound to some other pool, since its content would then
    /// refer to the wrong entries.
    pub fn write(&self, constants: &mut ConstantPool) -> Result<Attribute, Error> {
        if let Some(pool) = self.pool {
            if pool != constants.id() {
                return Err(Error::AlienAttribute(self.name.clone()));
            }
        }
        Ok(Attribute {
            name_index: constants.get_utf8(&self.name)?,
            info: self.info.clone(),
        })
    }
}

/// Consult the attribute resolver about an attribute that isn't modeled
pub(crate) fn unknown_attribute(
    name: &str,
    attribute: &Attribute,
    constants: &ConstantPool,
    options: &Options,
) -> Result<Option<UnknownAttribute>, Error> {
    let pool = match options.attribute_resolver.resolve(name) {
        AttributeAction::Keep => Some(constants.id()),
        AttributeAction::KeepUnbound => None,
        AttributeAction::Drop => {
            log::debug!("Dropping attribute {}", name);
            return Ok(None);
        }
        AttributeAction::Fail => return Err(Error::UnknownAttribute(name.to_owned())),
    };
    log::debug!("Keeping attribute {} ({} bytes)", name, attribute.info.len());
    Ok(Some(UnknownAttribute {
        name: name.to_owned(),
        info: attribute.info.clone(),
        pool,
    }))
}

impl ClassModel {
    /// Parse and inflate a class file
    pub fn parse(bytes: &[u8], options: &Options) -> Result<ClassModel, Error> {
        log::debug!("Parsing class file ({} bytes)", bytes.len());
        let class_file = ClassFile::parse(bytes)?;
        let model = ClassModel::from_class_file(class_file, options)?;
        log::debug!(
            "Parsed {} ({} fields, {} methods)",
            model.this_class,
            model.fields().count(),
            model.methods().count()
        );
        Ok(model)
    }

    /// Inflate the raw structure of a class file
    pub fn from_class_file(class_file: ClassFile, options: &Options) -> Result<ClassModel, Error> {
        let ClassFile {
            version,
            mut constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        } = class_file;

        // Bootstrap methods are needed to decode `invokedynamic` and dynamic constants
        for attribute in &attributes {
            if constants.utf8_at(attribute.name_index)? == BootstrapMethods::NAME {
                let table = BootstrapMethods::read_all(&mut ByteReader::new(&attribute.info))?;
                constants.load_bootstrap_methods(table.0);
            }
        }

        let this_class = constants.class_name_at(this_class)?;
        let superclass = match super_class {
            Some(class) => Some(constants.class_name_at(class)?),
            None => None,
        };
        let interfaces = interfaces
            .into_iter()
            .map(|class| constants.class_name_at(class))
            .collect::<Result<Vec<_>, Error>>()?;
        let constants = Arc::new(constants);

        let mut elements = vec![
            ClassElement::Version(version),
            ClassElement::AccessFlags(access_flags),
            ClassElement::Superclass(superclass),
            ClassElement::Interfaces(interfaces),
        ];
        for field in &fields {
            elements.push(ClassElement::Field(FieldModel::from_field(
                field, &constants, options,
            )?));
        }
        for method in &methods {
            elements.push(ClassElement::Method(MethodModel::from_method(
                method,
                &constants,
                &this_class,
                options,
            )?));
        }

        for attribute in &attributes {
            let name = constants.utf8_at(attribute.name_index)?;
            let mut info = ByteReader::new(&attribute.info);
            let element = match name {
                BootstrapMethods::NAME => continue,
                SourceFile::NAME => {
                    let source = SourceFile::read_all(&mut info)?;
                    ClassElement::SourceFile(constants.utf8_at(source.0)?.to_owned())
                }
                Signature::NAME => {
                    let signature = Signature::read_all(&mut info)?;
                    ClassElement::Signature(constants.utf8_at(signature.0)?.to_owned())
                }
                InnerClasses::NAME => {
                    let mut inner_classes = vec![];
                    for entry in InnerClasses::read_all(&mut info)?.0 {
                        inner_classes.push(InnerClass {
                            inner_class: constants.class_name_at(entry.inner_class)?,
                            outer_class: match entry.outer_class {
                                Some(class) => Some(constants.class_name_at(class)?),
                                None => None,
                            },
                            inner_name: match entry.inner_name {
                                Some(name) => Some(UnqualifiedName::from_str(constants.utf8_at(name)?)?),
                                None => None,
                            },
                            access_flags: entry.access_flags,
                        });
                    }
                    ClassElement::InnerClasses(inner_classes)
                }
                NestHost::NAME => {
                    let host = NestHost::read_all(&mut info)?;
                    ClassElement::NestHost(constants.class_name_at(host.0)?)
                }
                NestMembers::NAME => {
                    let members = NestMembers::read_all(&mut info)?
                        .0
                        .into_iter()
                        .map(|class| constants.class_name_at(class))
                        .collect::<Result<Vec<_>, Error>>()?;
                    ClassElement::NestMembers(members)
                }
                other => match unknown_attribute(other, attribute, &constants, options)? {
                    Some(unknown) => ClassElement::Attribute(unknown),
                    None => continue,
                },
            };
            elements.push(element);
        }

        Ok(ClassModel {
            this_class,
            elements,
            constants,
        })
    }

    /// Class assembled in memory rather than parsed (it gets an empty constant pool)
    pub fn new(this_class: BinaryName, elements: Vec<ClassElement>) -> ClassModel {
        ClassModel {
            this_class,
            elements,
            constants: Arc::new(ConstantPool::new()),
        }
    }

    pub fn this_class(&self) -> &BinaryName {
        &self.this_class
    }

    pub fn elements(&self) -> &[ClassElement] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<ClassElement> {
        self.elements
    }

    /// Constant pool the class was read with
    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    pub fn version(&self) -> Version {
        self.elements
            .iter()
            .find_map(|element| match element {
                ClassElement::Version(version) => Some(*version),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn access_flags(&self) -> ClassAccessFlags {
        self.elements
            .iter()
            .find_map(|element| match element {
                ClassElement::AccessFlags(flags) => Some(*flags),
                _ => None,
            })
            .unwrap_or_else(ClassAccessFlags::empty)
    }

    pub fn superclass(&self) -> Option<&BinaryName> {
        self.elements.iter().find_map(|element| match element {
            ClassElement::Superclass(superclass) => superclass.as_ref(),
            _ => None,
        })
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags().contains(ClassAccessFlags::INTERFACE)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldModel> + '_ {
        self.elements.iter().filter_map(|element| match element {
            ClassElement::Field(field) => Some(field),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodModel> + '_ {
        self.elements.iter().filter_map(|element| match element {
            ClassElement::Method(method) => Some(method),
            _ => None,
        })
    }

    /// Find a method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodModel> {
        use crate::descriptors::RenderDescriptor;
        self.methods()
            .find(|method| method.name.as_str() == name && method.descriptor.render() == descriptor)
    }

    /// Feed the elements of the class through a pipeline into a new class
    pub fn transform(
        &self,
        options: &Options,
        pipeline: Pipeline<ClassBuilder, ClassElement>,
    ) -> Result<Vec<u8>, Error> {
        log::debug!(
            "Transforming {} through {} stages",
            self.this_class,
            pipeline.len()
        );
        let mut builder = ClassBuilder::for_model(self, options.clone()).with_pipeline(pipeline);
        builder.run(self.elements.iter().cloned())?;
        builder.build()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::access_flags::{FieldAccessFlags, MethodAccessFlags};
    use crate::code::CodeModel;
    use crate::descriptors::{FieldType, MethodDescriptor};
    use crate::options::{ConstantPoolMode, KeepAttributes};
    use std::sync::Arc;

    fn sample_class(options: &Options) -> Vec<u8> {
        let mut builder = ClassBuilder::new(BinaryName::from_str("demo/Sample").unwrap(), options.clone());
        builder
            .with(ClassElement::SourceFile(String::from("Sample.java")))
            .unwrap()
            .with(ClassElement::Attribute(UnknownAttribute::unbound(
                "Custom",
                vec![1, 2, 3],
            )))
            .unwrap();
        builder
            .with_field(
                UnqualifiedName::from_str("count").unwrap(),
                FieldType::int(),
                FieldAccessFlags::PRIVATE,
                |_| Ok(()),
            )
            .unwrap();
        builder
            .with_method(
                UnqualifiedName::from_str("id").unwrap(),
                MethodDescriptor::new(vec![FieldType::int()], Some(FieldType::int())),
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                |method| {
                    method.with_code(|code| {
                        code.iload(0)?.return_value(Some(&FieldType::int()))?;
                        Ok(())
                    })?;
                    Ok(())
                },
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn parse_inflates_elements() {
        let bytes = sample_class(&Options::default());
        let model = ClassModel::parse(&bytes, &Options::default()).unwrap();

        assert_eq!(model.this_class().as_str(), "demo/Sample");
        assert_eq!(model.superclass(), Some(&BinaryName::OBJECT));
        assert_eq!(model.fields().count(), 1);
        let method = model.method("id", "(I)I").expect("method is there");
        assert!(method.code().unwrap().is_some());
        assert!(model
            .elements()
            .contains(&ClassElement::SourceFile(String::from("Sample.java"))));
        assert!(model.elements().iter().any(|element| matches!(
            element,
            ClassElement::Attribute(UnknownAttribute { name, pool: Some(_), .. }) if name == "Custom"
        )));
    }

    #[test]
    fn bodies_are_decoded_on_first_access() {
        let mut bytes = sample_class(&Options::default());

        let model = ClassModel::parse(&bytes, &Options::default()).unwrap();
        let method = model.method("id", "(I)I").unwrap();
        let code = method.lazy_code().unwrap();
        assert!(!code.is_inflated());
        let first = code.get().unwrap() as *const CodeModel;
        assert!(code.is_inflated());
        assert_eq!(first, code.get().unwrap() as *const CodeModel, "decoded once");

        // `iload_0; ireturn` becomes a reserved opcode followed by `ireturn`
        let body = [0x1a, 0xac];
        let at = bytes
            .windows(body.len())
            .position(|window| window == body)
            .unwrap();
        bytes[at] = 0xfe;
        let model = ClassModel::parse(&bytes, &Options::default()).unwrap();
        let method = model.method("id", "(I)I").unwrap();
        assert!(method.code().is_err());
        assert!(model.transform(&Options::default(), Pipeline::identity()).is_err());
    }

    #[test]
    fn shared_models_inflate_from_any_thread() {
        let bytes = sample_class(&Options::default());
        let model = ClassModel::parse(&bytes, &Options::default()).unwrap();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let code = model.method("id", "(I)I").unwrap().code().unwrap();
                    assert!(code.is_some());
                });
            }
        });
        assert!(model.method("id", "(I)I").unwrap().lazy_code().unwrap().is_inflated());
    }

    #[test]
    fn attribute_resolver_decides() {
        let bytes = sample_class(&Options::default());

        let failing = Options {
            attribute_resolver: Arc::new(|name: &str| {
                if name == "Custom" {
                    AttributeAction::Fail
                } else {
                    AttributeAction::Keep
                }
            }),
            ..Options::default()
        };
        assert!(matches!(
            ClassModel::parse(&bytes, &failing),
            Err(Error::UnknownAttribute(ref name)) if name == "Custom"
        ));

        let dropping = Options {
            attribute_resolver: Arc::new(|_: &str| AttributeAction::Drop),
            ..Options::default()
        };
        let model = ClassModel::parse(&bytes, &dropping).unwrap();
        assert!(!model
            .elements()
            .iter()
            .any(|element| matches!(element, ClassElement::Attribute(_))));
    }

    #[test]
    fn bound_attributes_need_the_source_pool() {
        let bytes = sample_class(&Options::default());
        let keep = Options {
            attribute_resolver: Arc::new(KeepAttributes),
            ..Options::default()
        };
        let model = ClassModel::parse(&bytes, &keep).unwrap();
        assert!(model.transform(&keep, Pipeline::identity()).is_ok());

        let fresh_pool = Options {
            constant_pool: ConstantPoolMode::New,
            ..keep
        };
        assert!(matches!(
            model.transform(&fresh_pool, Pipeline::identity()),
            Err(Error::AlienAttribute(ref name)) if name == "Custom"
        ));
    }
}
