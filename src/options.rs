use crate::verifier::{ClassHierarchy, ClassHierarchyResolver};
use std::fmt;
use std::sync::Arc;

/// Knobs controlling how classes are parsed and written
pub struct Options {
    /// Whether `StackMapTable` attributes are computed when code is assembled
    ///
    /// Frames are never generated for class versions older than Java 6, regardless of this.
    pub stack_maps: StackMaps,

    /// What to do with conditional and `goto` jumps whose offset does not fit in 16 bits
    pub short_jumps: ShortJumps,

    /// What to do with blocks that cannot be reached from the method entry
    ///
    /// Stack map frames can't be inferred for unreachable code, yet every block after an
    /// unconditional jump needs one.
    pub dead_code: DeadCode,

    /// Whether line numbers and local variable tables are kept when parsing and writing
    pub debug_elements: DebugElements,

    /// Whether transformed classes reuse the constant pool of the class they came from
    ///
    /// Reusing it keeps every existing index stable (so opaque attributes stay valid) at the cost
    /// of carrying over entries that might no longer be referenced.
    pub constant_pool: ConstantPoolMode,

    /// Decides what happens to attributes this crate does not model
    pub attribute_resolver: Arc<dyn AttributeResolver>,

    /// Supplies superclass information when frames need to merge two reference types
    pub class_hierarchy: Arc<dyn ClassHierarchyResolver>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            stack_maps: StackMaps::Generate,
            short_jumps: ShortJumps::Fix,
            dead_code: DeadCode::Patch,
            debug_elements: DebugElements::Pass,
            constant_pool: ConstantPoolMode::Shared,
            attribute_resolver: Arc::new(KeepAttributes),
            class_hierarchy: ClassHierarchy::shared_jdk(),
        }
    }
}

impl Clone for Options {
    fn clone(&self) -> Options {
        Options {
            stack_maps: self.stack_maps,
            short_jumps: self.short_jumps,
            dead_code: self.dead_code,
            debug_elements: self.debug_elements,
            constant_pool: self.constant_pool,
            attribute_resolver: self.attribute_resolver.clone(),
            class_hierarchy: self.class_hierarchy.clone(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("stack_maps", &self.stack_maps)
            .field("short_jumps", &self.short_jumps)
            .field("dead_code", &self.dead_code)
            .field("debug_elements", &self.debug_elements)
            .field("constant_pool", &self.constant_pool)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StackMaps {
    Generate,
    Drop,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShortJumps {
    /// Rewrite oversized jumps into `goto_w`
    Fix,

    /// Fail with [`Error::ShortJumpOverflow`](crate::errors::Error::ShortJumpOverflow)
    Fail,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeadCode {
    /// Overwrite unreachable code with `nop`s ending in `athrow`, and cut it out of exception
    /// handler ranges
    Patch,

    /// Leave unreachable code as is (the class will likely fail verification)
    Keep,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DebugElements {
    Pass,
    Drop,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstantPoolMode {
    /// Start from a copy of the source class constant pool
    Shared,

    /// Start from an empty constant pool
    New,
}

/// What to do with an attribute that isn't modeled
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttributeAction {
    /// Keep the raw bytes, assuming they may refer to the constant pool they came from
    Keep,

    /// Keep the raw bytes, which are known not to refer to any constant pool
    KeepUnbound,

    /// Silently discard
    Drop,

    /// Refuse to parse the class
    Fail,
}

/// Decides the fate of attributes this crate does not model, by name
pub trait AttributeResolver: Send + Sync {
    fn resolve(&self, name: &str) -> AttributeAction;
}

impl<F> AttributeResolver for F
where
    F: Fn(&str) -> AttributeAction + Send + Sync,
{
    fn resolve(&self, name: &str) -> AttributeAction {
        self(name)
    }
}

/// Keep every unknown attribute, bound to the pool it was read with
#[derive(Debug, Copy, Clone, Default)]
pub struct KeepAttributes;

impl AttributeResolver for KeepAttributes {
    fn resolve(&self, _name: &str) -> AttributeAction {
        AttributeAction::Keep
    }
}
