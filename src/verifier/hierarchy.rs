use crate::descriptors::{FieldType, RefType};
use crate::errors::VerifierErrorKind;
use crate::names::BinaryName;
use crate::verifier::InferredType;
use elsa::sync::FrozenMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// What the verifier needs to know about a class it did not define
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassInfo {
    /// `None` only for `java/lang/Object`
    pub superclass: Option<BinaryName>,
    pub is_interface: bool,
}

impl ClassInfo {
    pub fn class(superclass: BinaryName) -> ClassInfo {
        ClassInfo {
            superclass: Some(superclass),
            is_interface: false,
        }
    }

    pub fn interface() -> ClassInfo {
        ClassInfo {
            superclass: Some(BinaryName::OBJECT),
            is_interface: true,
        }
    }
}

/// Source of superclass information, consulted when two reference types meet in a frame
pub trait ClassHierarchyResolver: Send + Sync {
    fn resolve(&self, class: &BinaryName) -> Option<ClassInfo>;
}

impl<F> ClassHierarchyResolver for F
where
    F: Fn(&BinaryName) -> Option<ClassInfo> + Send + Sync,
{
    fn resolve(&self, class: &BinaryName) -> Option<ClassInfo> {
        self(class)
    }
}

/// Combinators on resolvers
pub trait ClassHierarchyResolverExt: ClassHierarchyResolver + Sized {
    /// Ask `fallback` about classes this resolver doesn't know
    fn or_else<R: ClassHierarchyResolver>(self, fallback: R) -> OrElse<Self, R> {
        OrElse {
            first: self,
            second: fallback,
        }
    }

    /// Remember every answer (including unknown classes)
    fn cached(self) -> CachingResolver<Self> {
        CachingResolver::new(self)
    }
}

impl<R: ClassHierarchyResolver> ClassHierarchyResolverExt for R {}

pub struct OrElse<A, B> {
    first: A,
    second: B,
}

impl<A: ClassHierarchyResolver, B: ClassHierarchyResolver> ClassHierarchyResolver for OrElse<A, B> {
    fn resolve(&self, class: &BinaryName) -> Option<ClassInfo> {
        self.first
            .resolve(class)
            .or_else(|| self.second.resolve(class))
    }
}

/// Memoizes the answers of a slower resolver (eg. one that reads class files from disk)
pub struct CachingResolver<R> {
    inner: R,
    cache: FrozenMap<BinaryName, Box<Option<ClassInfo>>>,
}

impl<R: ClassHierarchyResolver> CachingResolver<R> {
    pub fn new(inner: R) -> CachingResolver<R> {
        CachingResolver {
            inner,
            cache: FrozenMap::new(),
        }
    }
}

impl<R: ClassHierarchyResolver> ClassHierarchyResolver for CachingResolver<R> {
    fn resolve(&self, class: &BinaryName) -> Option<ClassInfo> {
        if let Some(cached) = self.cache.get(class) {
            return cached.clone();
        }
        let resolved = self.inner.resolve(class);
        self.cache.insert(class.clone(), Box::new(resolved)).clone()
    }
}

/// Fixed table of classes
#[derive(Clone, Debug, Default)]
pub struct ClassHierarchy {
    classes: HashMap<BinaryName, ClassInfo>,
}

const JDK_CLASSES: &[(&str, &str)] = &[
    ("java/lang/String", "java/lang/Object"),
    ("java/lang/Class", "java/lang/Object"),
    ("java/lang/Number", "java/lang/Object"),
    ("java/lang/Boolean", "java/lang/Object"),
    ("java/lang/Character", "java/lang/Object"),
    ("java/lang/Math", "java/lang/Object"),
    ("java/lang/System", "java/lang/Object"),
    ("java/lang/Thread", "java/lang/Object"),
    ("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
    ("java/lang/StringBuffer", "java/lang/AbstractStringBuilder"),
    ("java/lang/AbstractStringBuilder", "java/lang/Object"),
    ("java/lang/Enum", "java/lang/Object"),
    ("java/lang/Record", "java/lang/Object"),
    ("java/lang/Void", "java/lang/Object"),
    ("java/lang/Byte", "java/lang/Number"),
    ("java/lang/Short", "java/lang/Number"),
    ("java/lang/Integer", "java/lang/Number"),
    ("java/lang/Long", "java/lang/Number"),
    ("java/lang/Float", "java/lang/Number"),
    ("java/lang/Double", "java/lang/Number"),
    ("java/lang/Throwable", "java/lang/Object"),
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
    ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/NumberFormatException", "java/lang/IllegalArgumentException"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
    ("java/lang/AssertionError", "java/lang/Error"),
    ("java/lang/invoke/MethodHandle", "java/lang/Object"),
    ("java/lang/invoke/MethodType", "java/lang/Object"),
    ("java/lang/invoke/MethodHandles", "java/lang/Object"),
    ("java/lang/invoke/MethodHandles$Lookup", "java/lang/Object"),
    ("java/lang/invoke/CallSite", "java/lang/Object"),
    ("java/io/IOException", "java/lang/Exception"),
    ("java/io/UncheckedIOException", "java/lang/RuntimeException"),
    ("java/io/OutputStream", "java/lang/Object"),
    ("java/io/InputStream", "java/lang/Object"),
    ("java/io/FilterOutputStream", "java/io/OutputStream"),
    ("java/io/PrintStream", "java/io/FilterOutputStream"),
    ("java/util/AbstractCollection", "java/lang/Object"),
    ("java/util/AbstractList", "java/util/AbstractCollection"),
    ("java/util/ArrayList", "java/util/AbstractList"),
    ("java/util/AbstractMap", "java/lang/Object"),
    ("java/util/HashMap", "java/util/AbstractMap"),
    ("java/util/Objects", "java/lang/Object"),
    ("java/util/Arrays", "java/lang/Object"),
];

const JDK_INTERFACES: &[&str] = &[
    "java/lang/Cloneable",
    "java/io/Serializable",
    "java/lang/Comparable",
    "java/lang/CharSequence",
    "java/lang/Runnable",
    "java/lang/Iterable",
    "java/lang/AutoCloseable",
    "java/io/Closeable",
    "java/util/Collection",
    "java/util/List",
    "java/util/Set",
    "java/util/Map",
    "java/util/Iterator",
    "java/util/function/Function",
    "java/util/function/Supplier",
];

impl ClassHierarchy {
    pub fn new() -> ClassHierarchy {
        ClassHierarchy::default()
    }

    /// Table preloaded with common `java.lang`, `java.io`, and `java.util` types
    pub fn jdk() -> ClassHierarchy {
        let mut hierarchy = ClassHierarchy::new();
        hierarchy.classes.insert(
            BinaryName::OBJECT,
            ClassInfo {
                superclass: None,
                is_interface: false,
            },
        );
        for &(class, superclass) in JDK_CLASSES {
            hierarchy.classes.insert(
                BinaryName::name(class),
                ClassInfo::class(BinaryName::name(superclass)),
            );
        }
        for &interface in JDK_INTERFACES {
            hierarchy
                .classes
                .insert(BinaryName::name(interface), ClassInfo::interface());
        }
        hierarchy
    }

    /// Process-wide shared copy of [`ClassHierarchy::jdk`]
    pub fn shared_jdk() -> Arc<dyn ClassHierarchyResolver> {
        static SHARED: OnceLock<Arc<dyn ClassHierarchyResolver>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(ClassHierarchy::jdk()))
            .clone()
    }

    pub fn with_class(mut self, class: BinaryName, info: ClassInfo) -> ClassHierarchy {
        self.classes.insert(class, info);
        self
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassHierarchyResolver for ClassHierarchy {
    fn resolve(&self, class: &BinaryName) -> Option<ClassInfo> {
        self.classes.get(class).cloned()
    }
}

/// Subtyping questions asked while inferring or checking frames
///
/// Interfaces are treated like `java/lang/Object` (as the JVM verifier does): anything is
/// assignable to an interface type, and the least upper bound of an interface with anything else
/// is `java/lang/Object`.
pub struct Hierarchy<'a> {
    resolver: &'a dyn ClassHierarchyResolver,

    /// The class being built or verified, which the resolver may not know about
    this_class: Option<(BinaryName, ClassInfo)>,

    /// Unknown classes are tolerated (as direct subclasses of `java/lang/Object`) instead of
    /// failing with [`VerifierErrorKind::UnknownClass`]
    lenient: bool,
}

impl<'a> Hierarchy<'a> {
    pub fn new(resolver: &'a dyn ClassHierarchyResolver) -> Hierarchy<'a> {
        Hierarchy {
            resolver,
            this_class: None,
            lenient: false,
        }
    }

    pub fn with_this_class(mut self, name: BinaryName, info: ClassInfo) -> Hierarchy<'a> {
        self.this_class = Some((name, info));
        self
    }

    pub fn lenient(mut self, lenient: bool) -> Hierarchy<'a> {
        self.lenient = lenient;
        self
    }

    fn resolve(&self, class: &BinaryName) -> Result<Option<ClassInfo>, VerifierErrorKind> {
        if let Some((name, info)) = &self.this_class {
            if name == class {
                return Ok(Some(info.clone()));
            }
        }
        match self.resolver.resolve(class) {
            Some(info) => Ok(Some(info)),
            None if self.lenient => Ok(None),
            None => Err(VerifierErrorKind::UnknownClass(class.clone())),
        }
    }

    fn is_interface(&self, class: &BinaryName) -> Result<bool, VerifierErrorKind> {
        if class == &BinaryName::OBJECT {
            return Ok(false);
        }
        Ok(self.resolve(class)?.map_or(false, |info| info.is_interface))
    }

    /// The class followed by its superclasses, ending with `java/lang/Object`
    fn superclass_chain(&self, class: &BinaryName) -> Result<Vec<BinaryName>, VerifierErrorKind> {
        let mut chain = vec![class.clone()];
        let mut seen: HashSet<BinaryName> = HashSet::new();
        seen.insert(class.clone());

        let mut current = class.clone();
        while current != BinaryName::OBJECT {
            let next = match self.resolve(&current)? {
                Some(ClassInfo {
                    superclass: Some(superclass),
                    ..
                }) => superclass,
                _ => BinaryName::OBJECT,
            };
            if !seen.insert(next.clone()) {
                log::warn!("Cyclic superclass chain through {}", next);
                break;
            }
            chain.push(next.clone());
            current = next;
        }
        if chain.last() != Some(&BinaryName::OBJECT) {
            chain.push(BinaryName::OBJECT);
        }
        Ok(chain)
    }

    fn is_class_assignable(
        &self,
        sub_type: &BinaryName,
        super_type: &BinaryName,
    ) -> Result<bool, VerifierErrorKind> {
        if sub_type == super_type || super_type == &BinaryName::OBJECT {
            return Ok(true);
        }
        if self.is_interface(super_type)? {
            return Ok(true);
        }
        if self.lenient
            && (self.resolve(sub_type)?.is_none() || self.resolve(super_type)?.is_none())
        {
            return Ok(true);
        }
        Ok(self.superclass_chain(sub_type)?.contains(super_type))
    }

    fn is_array_supertype(&self, super_type: &BinaryName) -> bool {
        super_type == &BinaryName::OBJECT
            || super_type == &BinaryName::CLONEABLE
            || super_type == &BinaryName::SERIALIZABLE
    }

    /// Can a value of type `sub_type` be used where `super_type` is expected?
    pub fn is_assignable_ref(
        &self,
        sub_type: &RefType,
        super_type: &RefType,
    ) -> Result<bool, VerifierErrorKind> {
        match (sub_type, super_type) {
            (RefType::PrimitiveArray(_) | RefType::ObjectArray(_), RefType::Object(object)) => {
                Ok(self.is_array_supertype(object))
            }

            (RefType::PrimitiveArray(arr1), RefType::PrimitiveArray(arr2)) => Ok(arr1 == arr2),

            // A `int[][]` is an `Object[]`
            (RefType::PrimitiveArray(arr1), RefType::ObjectArray(arr2)) => Ok(arr1
                .additional_dimensions
                > arr2.additional_dimensions
                && self.is_array_supertype(&arr2.element_type)),

            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
                if arr1.additional_dimensions < arr2.additional_dimensions {
                    Ok(false)
                } else if arr1.additional_dimensions == arr2.additional_dimensions {
                    self.is_class_assignable(&arr1.element_type, &arr2.element_type)
                } else {
                    Ok(self.is_array_supertype(&arr2.element_type))
                }
            }

            (RefType::Object(class1), RefType::Object(class2)) => {
                self.is_class_assignable(class1, class2)
            }

            _ => Ok(false),
        }
    }

    /// Can a value of verification type `sub_type` be used where `super_type` is expected?
    pub fn is_assignable(
        &self,
        sub_type: &InferredType,
        super_type: &InferredType,
    ) -> Result<bool, VerifierErrorKind> {
        match (sub_type, super_type) {
            (_, InferredType::Top) => Ok(true),
            (InferredType::Null, InferredType::Object(_)) => Ok(true),
            (InferredType::Object(ref1), InferredType::Object(ref2)) => {
                self.is_assignable_ref(ref1, ref2)
            }
            (sub_type, super_type) => Ok(sub_type == super_type),
        }
    }

    /// Is the type something that can be thrown?
    pub fn is_throwable(&self, typ: &InferredType) -> Result<bool, VerifierErrorKind> {
        match typ {
            InferredType::Null => Ok(true),
            InferredType::Object(RefType::Object(class)) => {
                if self.lenient && self.resolve(class)?.is_none() {
                    return Ok(true);
                }
                Ok(self.superclass_chain(class)?.contains(&BinaryName::THROWABLE))
            }
            _ => Ok(false),
        }
    }

    /// Least upper bound of two reference types
    pub fn common_supertype(
        &self,
        type1: &RefType,
        type2: &RefType,
    ) -> Result<RefType, VerifierErrorKind> {
        if type1 == type2 {
            return Ok(type1.clone());
        }
        match (type1, type2) {
            (RefType::Object(class1), RefType::Object(class2)) => {
                if self.is_interface(class1)? || self.is_interface(class2)? {
                    return Ok(RefType::OBJECT);
                }
                let chain1 = self.superclass_chain(class1)?;
                let chain2: HashSet<BinaryName> =
                    self.superclass_chain(class2)?.into_iter().collect();
                let common = chain1
                    .into_iter()
                    .find(|class| chain2.contains(class))
                    .unwrap_or(BinaryName::OBJECT);
                Ok(RefType::Object(common))
            }
            (RefType::Object(_), _) | (_, RefType::Object(_)) => Ok(RefType::OBJECT),
            _ => match (type1.component(), type2.component()) {
                (Some(FieldType::Ref(component1)), Some(FieldType::Ref(component2))) => {
                    let component = self.common_supertype(&component1, &component2)?;
                    Ok(RefType::array(FieldType::Ref(component)))
                }
                _ => Ok(RefType::OBJECT),
            },
        }
    }

    /// Merge two verification types flowing into the same slot, `None` if they are incompatible
    pub fn merge(
        &self,
        type1: &InferredType,
        type2: &InferredType,
    ) -> Result<Option<InferredType>, VerifierErrorKind> {
        Ok(match (type1, type2) {
            _ if type1 == type2 => Some(type1.clone()),
            (InferredType::Null, InferredType::Object(_)) => Some(type2.clone()),
            (InferredType::Object(_), InferredType::Null) => Some(type1.clone()),
            (InferredType::Object(ref1), InferredType::Object(ref2)) => {
                Some(InferredType::Object(self.common_supertype(ref1, ref2)?))
            }
            _ => None,
        })
    }
}
