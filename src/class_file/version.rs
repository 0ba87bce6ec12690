use crate::class_file::{ByteReader, Serialize};
use crate::errors::Error;
use byteorder::WriteBytesExt;
use std::fmt;

/// Class file format version
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    const fn release(major: u16) -> Version {
        Version { major, minor: 0 }
    }

    pub const JAVA1_4: Version = Version::release(48);
    pub const JAVA5: Version = Version::release(49);
    pub const JAVA6: Version = Version::release(50);
    pub const JAVA7: Version = Version::release(51);
    pub const JAVA8: Version = Version::release(52);
    pub const JAVA11: Version = Version::release(55);
    pub const JAVA17: Version = Version::release(61);
    pub const JAVA21: Version = Version::release(65);

    /// Type-checking verification (and so `StackMapTable`) exists from Java 6 onwards
    pub fn has_stack_map_frames(self) -> bool {
        self.major >= 50
    }

    pub fn read(reader: &mut ByteReader) -> Result<Version, Error> {
        let minor = reader.u16()?;
        let major = reader.u16()?;
        Ok(Version { major, minor })
    }
}

impl Default for Version {
    fn default() -> Version {
        Version::JAVA8
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        self.minor.serialize(writer)?;
        self.major.serialize(writer)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
