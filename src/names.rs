use crate::errors::Error;
use std::borrow::Cow;
use std::fmt;

/// Validated names, backed by either a static string or an owned one
pub trait Name: Sized {
    /// Check that a string is a legal name of this kind
    fn check_valid(name: &str) -> Result<(), Error>;

    fn as_cow(&self) -> &Cow<'static, str>;

    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Validate an owned string
    fn from_string(name: String) -> Result<Self, Error>;

    /// Validate and copy a borrowed string
    fn from_str(name: &str) -> Result<Self, Error> {
        Self::from_string(name.to_owned())
    }
}

/// Declares a name type along with its well-known values
///
/// Validation is left to a separate `check_valid` function, everything else is the same for all
/// kinds of names.
macro_rules! name_type {
    (
        $(#[$doc:meta])*
        $name:ident validated by $check:path {
            $( $constant:ident = $value:literal, )*
        }
    ) => {
        $(#[$doc])*
        #[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            /// Unchecked constructor for names known to be valid
            pub(crate) const fn name(value: &'static str) -> $name {
                $name(Cow::Borrowed(value))
            }

            $( pub const $constant: $name = $name::name($value); )*
        }

        impl Name for $name {
            fn check_valid(name: &str) -> Result<(), Error> {
                $check(name)
            }

            fn as_cow(&self) -> &Cow<'static, str> {
                &self.0
            }

            fn from_string(name: String) -> Result<Self, Error> {
                $check(&name)?;
                Ok($name(Cow::Owned(name)))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

name_type! {
    /// Names of methods and fields
    ///
    /// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.2>
    UnqualifiedName validated by check_unqualified {
        INIT = "<init>",
        CLINIT = "<clinit>",
        MAIN = "main",
        VALUEOF = "valueOf",
        PRINTLN = "println",
        OUT = "out",
    }
}

name_type! {
    /// Internal names of classes and interfaces (`java/lang/Object`)
    ///
    /// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.1>
    BinaryName validated by check_binary {
        OBJECT = "java/lang/Object",
        STRING = "java/lang/String",
        CLASS = "java/lang/Class",
        THROWABLE = "java/lang/Throwable",
        EXCEPTION = "java/lang/Exception",
        ERROR = "java/lang/Error",
        CLONEABLE = "java/lang/Cloneable",
        SERIALIZABLE = "java/io/Serializable",
        NUMBER = "java/lang/Number",
        INTEGER = "java/lang/Integer",
        LONG = "java/lang/Long",
        SYSTEM = "java/lang/System",
        PRINTSTREAM = "java/io/PrintStream",
        METHODHANDLE = "java/lang/invoke/MethodHandle",
        METHODTYPE = "java/lang/invoke/MethodType",
        ARITHMETICEXCEPTION = "java/lang/ArithmeticException",
    }
}

fn check_unqualified(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidName(String::from("unqualified name is empty")));
    }
    if let Some(bad) = name.chars().find(|c| matches!(c, '.' | ';' | '[' | '/')) {
        return Err(Error::InvalidName(format!(
            "unqualified name '{}' contains '{}'",
            name, bad
        )));
    }
    let special = name == "<init>" || name == "<clinit>";
    if !special && name.contains(&['<', '>'][..]) {
        return Err(Error::InvalidName(format!(
            "only <init> and <clinit> may contain angle brackets, not '{}'",
            name
        )));
    }
    Ok(())
}

/// Slash separated segments, each of which is a valid unqualified name
fn check_binary(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidName(String::from("binary name is empty")));
    }
    match name
        .split('/')
        .find(|segment| segment.is_empty() || segment.contains(&['.', ';', '['][..]))
    {
        Some(segment) => Err(Error::InvalidName(format!(
            "binary name '{}' has an invalid segment '{}'",
            name, segment
        ))),
        None => Ok(()),
    }
}
