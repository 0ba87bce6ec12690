use crate::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::builder::{FieldBuilder, MethodBuilder};
use crate::class_file::{
    ClassFile, InnerClassEntry, InnerClasses, NestHost, NestMembers, Signature, SourceFile,
    Version,
};
use crate::constant_pool::ConstantPool;
use crate::descriptors::{FieldType, MethodDescriptor};
use crate::errors::Error;
use crate::model::{ClassElement, ClassModel, FieldModel, MethodModel};
use crate::names::{BinaryName, Name, UnqualifiedName};
use crate::options::{ConstantPoolMode, Options};
use crate::transform::{ElementSink, Pipeline, Stages};
use crate::verifier::ClassInfo;

/// Builds a class file out of [`ClassElement`]s
///
/// Members are kept in their symbolic form until [`ClassBuilder::build`], which is when method
/// bodies get assembled and everything gets interned in the constant pool.
pub struct ClassBuilder {
    this_class: BinaryName,
    options: Options,
    constants: ConstantPool,

    version: Version,
    access_flags: ClassAccessFlags,
    superclass: Option<BinaryName>,
    interfaces: Vec<BinaryName>,
    fields: Vec<FieldModel>,
    methods: Vec<MethodModel>,

    /// Class-level elements that become attributes
    attributes: Vec<ClassElement>,

    stages: Stages<ClassBuilder, ClassElement>,
}

impl ClassBuilder {
    /// Builder for a `public` class extending `java/lang/Object`
    pub fn new(this_class: BinaryName, options: Options) -> ClassBuilder {
        ClassBuilder {
            this_class,
            options,
            constants: ConstantPool::new(),
            version: Version::default(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            superclass: Some(BinaryName::OBJECT),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
            stages: Stages::default(),
        }
    }

    /// Builder for a rewritten version of `model` (its elements still need to be fed in)
    ///
    /// In shared mode, the constant pool starts off as a copy of the model's pool.
    pub fn for_model(model: &ClassModel, options: Options) -> ClassBuilder {
        let constants = match options.constant_pool {
            ConstantPoolMode::Shared => model.constants().clone(),
            ConstantPoolMode::New => ConstantPool::new(),
        };
        ClassBuilder {
            constants,
            ..ClassBuilder::new(model.this_class().clone(), options)
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline<ClassBuilder, ClassElement>) -> ClassBuilder {
        self.stages = Stages::new(pipeline);
        self
    }

    pub fn this_class(&self) -> &BinaryName {
        &self.this_class
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Pool the class will be written with
    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    /// Build a field and emit it
    pub fn with_field(
        &mut self,
        name: UnqualifiedName,
        descriptor: FieldType,
        access_flags: FieldAccessFlags,
        body: impl FnOnce(&mut FieldBuilder) -> Result<(), Error>,
    ) -> Result<&mut ClassBuilder, Error> {
        let mut field = FieldBuilder::new(name, descriptor, access_flags);
        body(&mut field)?;
        self.with(ClassElement::Field(field.finish()))
    }

    /// Build a method and emit it
    pub fn with_method(
        &mut self,
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
        body: impl FnOnce(&mut MethodBuilder) -> Result<(), Error>,
    ) -> Result<&mut ClassBuilder, Error> {
        let mut method = MethodBuilder::new(name, descriptor, access_flags);
        body(&mut method)?;
        self.with(ClassElement::Method(method.finish()))
    }

    /// Assemble every method and serialize the class
    pub fn build(mut self) -> Result<Vec<u8>, Error> {
        let this_class = self.constants.intern(&self.this_class)?;
        let super_class = match &self.superclass {
            Some(superclass) => Some(self.constants.intern(superclass)?),
            None => None,
        };
        let mut interfaces = Vec::with_capacity(self.interfaces.len());
        for interface in &self.interfaces {
            interfaces.push(self.constants.intern(interface)?);
        }

        let class_info = ClassInfo {
            superclass: self.superclass.clone(),
            is_interface: self.access_flags.contains(ClassAccessFlags::INTERFACE),
        };

        let mut fields = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            fields.push(field.write(&mut self.constants)?);
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            methods.push(method.write(
                &mut self.constants,
                &self.this_class,
                &class_info,
                self.version,
                &self.options,
            )?);
        }

        let mut attributes = vec![];
        for element in &self.attributes {
            let attribute = match element {
                ClassElement::Signature(signature) => {
                    let signature = Signature(self.constants.get_utf8(signature)?);
                    self.constants.get_attribute(signature)?
                }
                ClassElement::SourceFile(source) => {
                    let source = SourceFile(self.constants.get_utf8(source)?);
                    self.constants.get_attribute(source)?
                }
                ClassElement::InnerClasses(inner_classes) => {
                    let mut entries = Vec::with_capacity(inner_classes.len());
                    for inner in inner_classes {
                        entries.push(InnerClassEntry {
                            inner_class: self.constants.intern(&inner.inner_class)?,
                            outer_class: match &inner.outer_class {
                                Some(outer) => Some(self.constants.intern(outer)?),
                                None => None,
                            },
                            inner_name: match &inner.inner_name {
                                Some(name) => Some(self.constants.get_utf8(name.as_str())?),
                                None => None,
                            },
                            access_flags: inner.access_flags,
                        });
                    }
                    self.constants.get_attribute(InnerClasses(entries))?
                }
                ClassElement::NestHost(host) => {
                    let host = NestHost(self.constants.intern(host)?);
                    self.constants.get_attribute(host)?
                }
                ClassElement::NestMembers(members) => {
                    let mut classes = Vec::with_capacity(members.len());
                    for member in members {
                        classes.push(self.constants.intern(member)?);
                    }
                    self.constants.get_attribute(NestMembers(classes))?
                }
                ClassElement::Attribute(unknown) => unknown.write(&mut self.constants)?,
                _ => continue,
            };
            attributes.push(attribute);
        }

        // Code assembly may have added bootstrap methods, so this goes last
        if let Some(bootstrap_methods) = self.constants.bootstrap_methods_attribute()? {
            attributes.push(bootstrap_methods);
        }

        let class_file = ClassFile {
            version: self.version,
            constants: self.constants,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        let bytes = class_file.to_bytes()?;
        log::debug!(
            "Built {} ({} constants, {} bytes)",
            self.this_class,
            class_file.constants.count(),
            bytes.len()
        );
        Ok(bytes)
    }
}

impl ElementSink<ClassElement> for ClassBuilder {
    fn store(&mut self, element: ClassElement) -> Result<(), Error> {
        match element {
            ClassElement::Version(version) => self.version = version,
            ClassElement::AccessFlags(flags) => self.access_flags = flags,
            ClassElement::Superclass(superclass) => self.superclass = superclass,
            ClassElement::Interfaces(interfaces) => self.interfaces = interfaces,
            ClassElement::Field(field) => self.fields.push(field),
            ClassElement::Method(method) => self.methods.push(method),
            other => self.attributes.push(other),
        }
        Ok(())
    }

    fn stages(&mut self) -> &mut Stages<ClassBuilder, ClassElement> {
        &mut self.stages
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class_file::{AttributeLike, ByteReader, Code};

    fn name(s: &str) -> UnqualifiedName {
        UnqualifiedName::from_str(s).unwrap()
    }

    #[test]
    fn empty_class_is_well_formed() {
        let this = BinaryName::from_str("demo/Empty").unwrap();
        let bytes = ClassBuilder::new(this, Options::default()).build().unwrap();
        let class = ClassFile::parse(&bytes).unwrap();

        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(class.version, Version::JAVA8);
        assert_eq!(
            class.constants.class_name_at(class.this_class).unwrap().as_str(),
            "demo/Empty"
        );
        assert!(class.fields.is_empty() && class.methods.is_empty());
    }

    #[test]
    fn methods_get_assembled() {
        let this = BinaryName::from_str("demo/Consts").unwrap();
        let mut builder = ClassBuilder::new(this, Options::default());
        builder
            .with_method(
                name("five"),
                MethodDescriptor::new(vec![], Some(FieldType::int())),
                MethodAccessFlags::STATIC,
                |method| {
                    method.with_code(|code| {
                        code.iconst(5)?.return_value(Some(&FieldType::int()))?;
                        Ok(())
                    })?;
                    Ok(())
                },
            )
            .unwrap();
        let class = ClassFile::parse(&builder.build().unwrap()).unwrap();

        let method = &class.methods[0];
        assert_eq!(class.constants.utf8_at(method.name_index).unwrap(), "five");
        let code = method
            .attributes
            .iter()
            .find(|attribute| class.constants.utf8_at(attribute.name_index).unwrap() == Code::NAME)
            .expect("method has code");
        let code = Code::read_all(&mut ByteReader::new(&code.info)).unwrap();
        assert_eq!(code.code_array, vec![0x08, 0xac]);
        assert_eq!((code.max_stack, code.max_locals), (1, 0));
    }

    #[test]
    fn elements_override_defaults() {
        let this = BinaryName::from_str("demo/Marker").unwrap();
        let mut builder = ClassBuilder::new(this, Options::default());
        builder
            .with(ClassElement::Version(Version::JAVA17))
            .unwrap()
            .with(ClassElement::AccessFlags(
                ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
            ))
            .unwrap()
            .with(ClassElement::Interfaces(vec![BinaryName::SERIALIZABLE]))
            .unwrap();
        let class = ClassFile::parse(&builder.build().unwrap()).unwrap();

        assert_eq!(class.version, Version::JAVA17);
        assert!(class.access_flags.contains(ClassAccessFlags::INTERFACE));
        assert_eq!(class.interfaces.len(), 1);
    }
}
