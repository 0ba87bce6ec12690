use crate::errors::{Error, MalformedKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Utility trait for serializing data inside class files
///
/// Class files have some peculiarities that make a dedicated trait more convenient than a general
/// serialization framework:
///
///   - everything is big endian
///   - tags are always `u8`
///   - sequences are usually prefixed by a `u16` length, which has to be checked rather than
///     truncated
///
pub trait Serialize {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error>;
}

macro_rules! serialize_number {
    ($($ty:ty => $write:ident),*) => {
        $(
            impl Serialize for $ty {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
                    writer.$write::<BigEndian>(*self)?;
                    Ok(())
                }
            }
        )*
    };
}

serialize_number!(
    u16 => write_u16,
    u32 => write_u32,
    i16 => write_i16,
    i32 => write_i32,
    i64 => write_i64,
    f32 => write_f32,
    f64 => write_f64
);

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_u8(*self)?;
        Ok(())
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_i8(*self)?;
        Ok(())
    }
}

/// Check that a table fits behind a `u2` count
pub fn u16_count(what: &'static str, count: usize) -> Result<u16, Error> {
    u16::try_from(count).map_err(|_| Error::TooManyEntries { what, count })
}

/// Sequences are prefixed with their `u16` length
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        u16_count("table entries", self.len())?.serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

/// Big-endian cursor over class file bytes which reports failures with the absolute offset at
/// which they happened.
#[derive(Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,

    /// Offset of `bytes[0]` inside the whole class file
    base: usize,
}

macro_rules! read_number {
    ($($name:ident: $ty:ty => $read:ident),*) => {
        $(
            pub fn $name(&mut self) -> Result<$ty, Error> {
                let at = self.offset();
                let mut rest = &self.bytes[self.position..];
                let value = rest
                    .$read::<BigEndian>()
                    .map_err(|_| Error::malformed(at, MalformedKind::Truncated))?;
                self.position += std::mem::size_of::<$ty>();
                Ok(value)
            }
        )*
    };
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteReader<'a> {
        ByteReader {
            bytes,
            position: 0,
            base: 0,
        }
    }

    /// Absolute offset of the next byte
    pub fn offset(&self) -> usize {
        self.base + self.position
    }

    /// Offset relative to the start of this reader
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Error at the current position
    pub fn error(&self, kind: MalformedKind) -> Error {
        Error::malformed(self.offset(), kind)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or_else(|| self.error(MalformedKind::Truncated))?;
        self.position += 1;
        Ok(byte)
    }

    pub fn i8(&mut self) -> Result<i8, Error> {
        self.u8().map(|b| b as i8)
    }

    read_number!(
        u16: u16 => read_u16,
        u32: u32 => read_u32,
        i16: i16 => read_i16,
        i32: i32 => read_i32,
        i64: i64 => read_i64,
        f32: f32 => read_f32,
        f64: f64 => read_f64
    );

    /// Borrow the next `len` bytes
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(self.error(MalformedKind::Truncated));
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Split off a reader over the next `len` bytes, keeping absolute offsets
    pub fn sub_reader(&mut self, len: usize) -> Result<ByteReader<'a>, Error> {
        let base = self.offset();
        let bytes = self.bytes(len)?;
        Ok(ByteReader {
            bytes,
            position: 0,
            base,
        })
    }

    /// Skip ahead to the next multiple of four relative to the start of this reader
    pub fn align4(&mut self) -> Result<(), Error> {
        while self.position % 4 != 0 {
            self.u8()?;
        }
        Ok(())
    }

    /// Read a `u2`-counted table
    pub fn table<T>(
        &mut self,
        mut read: impl FnMut(&mut ByteReader<'a>) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        let count = self.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(read(self)?);
        }
        Ok(entries)
    }

    /// Fail if there is anything left to read
    pub fn expect_end(&self) -> Result<(), Error> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(self.error(MalformedKind::TrailingBytes(n))),
        }
    }
}
