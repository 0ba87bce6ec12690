use crate::access_flags::FieldAccessFlags;
use crate::descriptors::FieldType;
use crate::errors::Error;
use crate::model::{FieldElement, FieldModel};
use crate::names::UnqualifiedName;
use crate::transform::{ElementSink, Pipeline, Stages};

pub struct FieldBuilder {
    name: UnqualifiedName,
    descriptor: FieldType,
    access_flags: FieldAccessFlags,
    elements: Vec<FieldElement>,
    stages: Stages<FieldBuilder, FieldElement>,
}

impl FieldBuilder {
    pub fn new(
        name: UnqualifiedName,
        descriptor: FieldType,
        access_flags: FieldAccessFlags,
    ) -> FieldBuilder {
        FieldBuilder {
            name,
            descriptor,
            access_flags,
            elements: vec![],
            stages: Stages::default(),
        }
    }

    /// Builder for a rewritten version of `field` (its elements still need to be fed in)
    pub fn for_model(field: &FieldModel) -> FieldBuilder {
        FieldBuilder::new(field.name.clone(), field.descriptor.clone(), field.access_flags())
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline<FieldBuilder, FieldElement>) -> FieldBuilder {
        self.stages = Stages::new(pipeline);
        self
    }

    pub fn name(&self) -> &UnqualifiedName {
        &self.name
    }

    pub fn descriptor(&self) -> &FieldType {
        &self.descriptor
    }

    pub fn finish(self) -> FieldModel {
        let mut elements = Vec::with_capacity(self.elements.len() + 1);
        elements.push(FieldElement::AccessFlags(self.access_flags));
        elements.extend(self.elements);
        FieldModel {
            name: self.name,
            descriptor: self.descriptor,
            elements,
        }
    }
}

impl ElementSink<FieldElement> for FieldBuilder {
    fn store(&mut self, element: FieldElement) -> Result<(), Error> {
        match element {
            FieldElement::AccessFlags(flags) => self.access_flags = flags,
            other => self.elements.push(other),
        }
        Ok(())
    }

    fn stages(&mut self) -> &mut Stages<FieldBuilder, FieldElement> {
        &mut self.stages
    }
}
