use crate::access_flags::MethodAccessFlags;
use crate::code::CodeBuilder;
use crate::descriptors::MethodDescriptor;
use crate::errors::Error;
use crate::model::{MethodElement, MethodModel};
use crate::names::UnqualifiedName;
use crate::transform::{ElementSink, Pipeline, Stages};

/// Builds up a method from [`MethodElement`]s
pub struct MethodBuilder {
    name: UnqualifiedName,
    descriptor: MethodDescriptor,

    /// Latest `AccessFlags` element wins
    access_flags: MethodAccessFlags,

    elements: Vec<MethodElement>,
    stages: Stages<MethodBuilder, MethodElement>,
}

impl MethodBuilder {
    pub fn new(
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
    ) -> MethodBuilder {
        MethodBuilder {
            name,
            descriptor,
            access_flags,
            elements: vec![],
            stages: Stages::default(),
        }
    }

    /// Builder for a rewritten version of `method` (its elements still need to be fed in)
    pub fn for_model(method: &MethodModel) -> MethodBuilder {
        MethodBuilder::new(
            method.name.clone(),
            method.descriptor.clone(),
            method.access_flags(),
        )
    }

    pub fn with_pipeline(
        mut self,
        pipeline: Pipeline<MethodBuilder, MethodElement>,
    ) -> MethodBuilder {
        self.stages = Stages::new(pipeline);
        self
    }

    pub fn name(&self) -> &UnqualifiedName {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Generate a body for the method
    ///
    /// The code goes through the method's stages as a single `Code` element once `body` returns.
    pub fn with_code(
        &mut self,
        body: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
    ) -> Result<&mut MethodBuilder, Error> {
        let mut code = CodeBuilder::new(&self.descriptor, self.is_static());
        body(&mut code)?;
        let code = code.finish()?;
        self.with(MethodElement::Code(code.into()))
    }

    pub fn finish(self) -> MethodModel {
        let mut elements = Vec::with_capacity(self.elements.len() + 1);
        elements.push(MethodElement::AccessFlags(self.access_flags));
        elements.extend(self.elements);
        MethodModel {
            name: self.name,
            descriptor: self.descriptor,
            elements,
        }
    }
}

impl ElementSink<MethodElement> for MethodBuilder {
    fn store(&mut self, element: MethodElement) -> Result<(), Error> {
        match element {
            MethodElement::AccessFlags(flags) => self.access_flags = flags,
            other => self.elements.push(other),
        }
        Ok(())
    }

    fn stages(&mut self) -> &mut Stages<MethodBuilder, MethodElement> {
        &mut self.stages
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::descriptors::FieldType;
    use crate::names::Name;

    #[test]
    fn access_flags_come_first() {
        let mut builder = MethodBuilder::new(
            UnqualifiedName::from_str("answer").unwrap(),
            MethodDescriptor::new(vec![], Some(FieldType::int())),
            MethodAccessFlags::PUBLIC,
        );
        builder
            .with_code(|code| {
                code.bipush(42)?.return_value(Some(&FieldType::int()))?;
                Ok(())
            })
            .unwrap();
        builder
            .with(MethodElement::AccessFlags(
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            ))
            .unwrap();

        let method = builder.finish();
        assert!(matches!(
            method.elements[0],
            MethodElement::AccessFlags(flags) if flags.contains(MethodAccessFlags::STATIC)
        ));
        assert_eq!(method.elements.len(), 2, "only one access flags element");
        assert!(method.code().unwrap().is_some());
    }

    #[test]
    fn code_errors_surface() {
        let mut builder = MethodBuilder::new(
            UnqualifiedName::from_str("broken").unwrap(),
            MethodDescriptor::new(vec![], None),
            MethodAccessFlags::STATIC,
        );
        let result = builder.with_code(|code| {
            let label = code.new_label();
            code.goto(label)?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::UnboundLabel(_))));
    }
}
