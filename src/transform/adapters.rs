use crate::builder::{ClassBuilder, FieldBuilder, MethodBuilder};
use crate::code::{CodeBuilder, CodeElement};
use crate::errors::Error;
use crate::model::{ClassElement, FieldElement, MethodElement};
use crate::transform::{ElementSink, Pipeline, Transform};

/// Lift a method-level pipeline into a class transform
///
/// Every method of the class gets rebuilt through a fresh pipeline from `factory`. Everything
/// else passes through untouched.
pub fn transforming_methods<F>(factory: F) -> TransformingMethods<F>
where
    F: FnMut() -> Pipeline<MethodBuilder, MethodElement>,
{
    TransformingMethods { factory }
}

/// Lift a field-level pipeline into a class transform
pub fn transforming_fields<F>(factory: F) -> TransformingFields<F>
where
    F: FnMut() -> Pipeline<FieldBuilder, FieldElement>,
{
    TransformingFields { factory }
}

/// Lift a code-level pipeline into a method transform
///
/// Methods without code are left alone.
pub fn transforming_code<F>(factory: F) -> TransformingCode<F>
where
    F: FnMut() -> Pipeline<CodeBuilder, CodeElement>,
{
    TransformingCode { factory }
}

pub struct TransformingMethods<F> {
    factory: F,
}

impl<F> Transform<ClassBuilder, ClassElement> for TransformingMethods<F>
where
    F: FnMut() -> Pipeline<MethodBuilder, MethodElement>,
{
    fn accept(&mut self, builder: &mut ClassBuilder, element: ClassElement) -> Result<(), Error> {
        let method = match element {
            ClassElement::Method(method) => method,
            other => {
                builder.with(other)?;
                return Ok(());
            }
        };
        let mut method_builder = MethodBuilder::for_model(&method).with_pipeline((self.factory)());
        method_builder.run(method.elements)?;
        builder.with(ClassElement::Method(method_builder.finish()))?;
        Ok(())
    }
}

pub struct TransformingFields<F> {
    factory: F,
}

impl<F> Transform<ClassBuilder, ClassElement> for TransformingFields<F>
where
    F: FnMut() -> Pipeline<FieldBuilder, FieldElement>,
{
    fn accept(&mut self, builder: &mut ClassBuilder, element: ClassElement) -> Result<(), Error> {
        let field = match element {
            ClassElement::Field(field) => field,
            other => {
                builder.with(other)?;
                return Ok(());
            }
        };
        let mut field_builder = FieldBuilder::for_model(&field).with_pipeline((self.factory)());
        field_builder.run(field.elements)?;
        builder.with(ClassElement::Field(field_builder.finish()))?;
        Ok(())
    }
}

pub struct TransformingCode<F> {
    factory: F,
}

impl<F> Transform<MethodBuilder, MethodElement> for TransformingCode<F>
where
    F: FnMut() -> Pipeline<CodeBuilder, CodeElement>,
{
    fn accept(&mut self, builder: &mut MethodBuilder, element: MethodElement) -> Result<(), Error> {
        let code = match element {
            MethodElement::Code(code) => code.into_model()?,
            other => {
                builder.with(other)?;
                return Ok(());
            }
        };
        let mut code_builder = CodeBuilder::for_model(&code, builder.descriptor(), builder.is_static())
            .with_pipeline((self.factory)());
        code_builder.run(code.elements)?;
        builder.with(MethodElement::Code(code_builder.finish()?.into()))?;
        Ok(())
    }
}
