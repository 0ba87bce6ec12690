//! Deduplicating constant pool
//!
//! The same [`ConstantPool`] type is used for pools read out of class files and for pools being
//! built up for new ones. Entries are append only: once a constant has an index it never moves,
//! which is what lets a derived class share its source's pool and keep every existing index valid.

mod decode;
mod intern;
mod symbolic;

pub use intern::*;
pub use symbolic::*;

use crate::class_file::{
    u16_count, Attribute, AttributeLike, BootstrapMethodEntry, ByteReader, Constant, ConstantIndex,
    JavaString, Serialize, Utf8ConstantIndex,
};
use crate::descriptors::RefType;
use crate::errors::{Error, MalformedKind};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use elsa::sync::FrozenMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_pool_id() -> u64 {
    NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Class file constants pool, along with the bootstrap method table
///
/// Every distinct constant is stored at most once when added through this type. Pools read from
/// class files may already contain duplicates: those are kept where they are (indices in the rest
/// of the class file point at them), and the lowest index holding a given content is the one
/// handed out afterwards.
pub struct ConstantPool {
    /// Identifies the pool that opaque attributes were read against
    id: u64,

    constants: OffsetVec<Constant>,

    /// Canonical index of every constant
    indices: HashMap<Constant, ConstantIndex>,

    bootstrap_methods: Vec<BootstrapMethodEntry>,
    bootstrap_indices: HashMap<BootstrapMethodEntry, u16>,

    /// Decoded `CONSTANT_Class` entries (entries are immutable, so this is never invalidated)
    class_cache: FrozenMap<u16, Box<RefType>>,
}

/// Most entries a pool can hold, counting the unusable index 0
pub const MAX_CONSTANT_POOL_COUNT: usize = u16::MAX as usize;

/// Most entries the `BootstrapMethods` table can hold
pub const MAX_BOOTSTRAP_METHODS: usize = u16::MAX as usize;

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            id: fresh_pool_id(),
            constants: OffsetVec::starting_at(Offset(1)),
            indices: HashMap::new(),
            bootstrap_methods: vec![],
            bootstrap_indices: HashMap::new(),
            class_cache: FrozenMap::new(),
        }
    }

    /// Identity of the pool, shared by clones
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `constant_pool_count` as written in the class file (one more than the last index)
    pub fn count(&self) -> usize {
        self.constants.offset_len().0
    }

    /// Number of entries in the bootstrap method table
    pub fn bootstrap_method_count(&self) -> usize {
        self.bootstrap_methods.len()
    }

    /// Raw entry at an index
    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get_offset(Offset(index.0 as usize))
    }

    /// Raw entries along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.constants
            .iter()
            .map(|(offset, constant)| (ConstantIndex(offset.0 as u16), constant))
    }

    pub fn bootstrap_entry(&self, index: u16) -> Option<&BootstrapMethodEntry> {
        self.bootstrap_methods.get(index as usize)
    }

    /// Read the `constant_pool_count` and entries of a class file
    pub fn read(reader: &mut ByteReader) -> Result<ConstantPool, Error> {
        let count = reader.u16()? as usize;
        let mut pool = ConstantPool::new();
        while pool.count() < count.max(1) {
            let at = reader.offset();
            let constant = Constant::read(reader)?;
            if pool.count() + constant.width() > count {
                return Err(Error::malformed(
                    at,
                    MalformedKind::InvalidReference(String::from(
                        "two-slot constant in the last pool slot",
                    )),
                ));
            }
            let offset = pool.constants.push(constant.clone());
            pool.indices
                .entry(constant)
                .or_insert(ConstantIndex(offset.0 as u16));
        }
        log::trace!("read constant pool with {} slots", pool.count());
        Ok(pool)
    }

    /// Install the entries of a parsed `BootstrapMethods` attribute
    pub fn load_bootstrap_methods(&mut self, entries: Vec<BootstrapMethodEntry>) {
        for entry in entries {
            let index = self.bootstrap_methods.len() as u16;
            self.bootstrap_indices.entry(entry.clone()).or_insert(index);
            self.bootstrap_methods.push(entry);
        }
    }

    /// Push a constant into the pool unless an equal one is already there
    ///
    /// Note: the largest valid index is 65534, indexing starts at 1, and some constants take two
    /// spaces.
    pub(crate) fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        if let Some(index) = self.indices.get(&constant) {
            return Ok(*index);
        }
        if let Constant::Utf8(string) = &constant {
            let len = string.modified_utf8_len();
            if len > u16::MAX as usize {
                return Err(Error::Utf8TooLong(len));
            }
        }

        let offset = self.count();
        if offset + constant.width() > MAX_CONSTANT_POOL_COUNT {
            return Err(Error::ConstantPoolOverflow { constant, offset });
        }
        let index = ConstantIndex(offset as u16);
        self.constants.push(constant.clone());
        self.indices.insert(constant, index);
        Ok(index)
    }

    /// Get or insert an entry of the bootstrap method table
    pub(crate) fn push_bootstrap_method(&mut self, entry: BootstrapMethodEntry) -> Result<u16, Error> {
        if let Some(index) = self.bootstrap_indices.get(&entry) {
            return Ok(*index);
        }
        let count = self.bootstrap_methods.len();
        if count >= MAX_BOOTSTRAP_METHODS {
            return Err(Error::BootstrapMethodOverflow(count + 1));
        }
        let index = count as u16;
        self.bootstrap_methods.push(entry.clone());
        self.bootstrap_indices.insert(entry, index);
        Ok(index)
    }

    /// Run `add`, undoing every entry it added if it fails
    ///
    /// Interning a composite constant adds several entries; a failure part way through (usually
    /// an overflow) must not leave the first few behind.
    pub fn transaction<T>(
        &mut self,
        add: impl FnOnce(&mut ConstantPool) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let constants_len = self.constants.len();
        let bootstrap_len = self.bootstrap_methods.len();
        let result = add(self);
        if result.is_err() {
            self.rollback(constants_len, bootstrap_len);
        }
        result
    }

    fn rollback(&mut self, constants_len: usize, bootstrap_len: usize) {
        while self.constants.len() > constants_len {
            if let Some((offset, constant)) = self.constants.pop() {
                if self.indices.get(&constant) == Some(&ConstantIndex(offset.0 as u16)) {
                    self.indices.remove(&constant);
                }
            }
        }
        for entry in self.bootstrap_methods.drain(bootstrap_len..) {
            self.bootstrap_indices.remove(&entry);
        }
    }

    /// Serialize a structured attribute, adding its name to the pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    /// The `BootstrapMethods` attribute, if any bootstrap methods were added
    ///
    /// This may add the attribute name to the pool, so it has to be called before the pool is
    /// written out.
    pub fn bootstrap_methods_attribute(&mut self) -> Result<Option<Attribute>, Error> {
        if self.bootstrap_methods.is_empty() {
            return Ok(None);
        }
        let table = crate::class_file::BootstrapMethods(self.bootstrap_methods.clone());
        self.get_attribute(table).map(Some)
    }

    /// Index of a `Utf8` entry, if it is already present
    pub fn find_utf8(&self, string: &str) -> Option<Utf8ConstantIndex> {
        self.indices
            .get(&Constant::Utf8(JavaString::from(string)))
            .map(|index| Utf8ConstantIndex(*index))
    }
}

impl Default for ConstantPool {
    fn default() -> ConstantPool {
        ConstantPool::new()
    }
}

/// Clones share the identity of the original (indices mean the same thing in both)
impl Clone for ConstantPool {
    fn clone(&self) -> ConstantPool {
        ConstantPool {
            id: self.id,
            constants: self.constants.clone(),
            indices: self.indices.clone(),
            bootstrap_methods: self.bootstrap_methods.clone(),
            bootstrap_indices: self.bootstrap_indices.clone(),
            class_cache: FrozenMap::new(),
        }
    }
}

impl fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<(), Error> {
        u16_count("constant pool entries", self.count())?.serialize(writer)?;
        for constant in self.constants.values() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pool_count_limit() {
        let mut pool = ConstantPool::new();
        for i in 1..MAX_CONSTANT_POOL_COUNT as i32 {
            pool.get_integer(i).unwrap();
        }
        assert_eq!(pool.count(), MAX_CONSTANT_POOL_COUNT);
        assert!(matches!(
            pool.get_integer(-1),
            Err(Error::ConstantPoolOverflow { offset: 65535, .. })
        ));

        // Existing constants are still found
        assert_eq!(pool.get_integer(7).unwrap(), ConstantIndex(7));
        assert_eq!(pool.count(), MAX_CONSTANT_POOL_COUNT);
    }

    #[test]
    fn failed_intern_leaves_no_trace() {
        let mut pool = ConstantPool::new();
        for i in 1..(MAX_CONSTANT_POOL_COUNT as i32 - 1) {
            pool.get_integer(i).unwrap();
        }
        let before = pool.count();

        // Needs a `Utf8` and a `String`, but only one slot is left
        assert!(pool.get_string("hello").is_err());
        assert_eq!(pool.count(), before);
        assert!(pool.find_utf8("hello").is_none());

        // The freed slot is usable again
        assert!(pool.get_utf8("hello").is_ok());
    }

    #[test]
    fn long_utf8_is_rejected() {
        let mut pool = ConstantPool::new();
        let fits = "a".repeat(65535);
        let too_long = "a".repeat(65536);
        assert!(pool.get_utf8(&fits).is_ok());
        assert!(matches!(
            pool.get_utf8(&too_long),
            Err(Error::Utf8TooLong(65536))
        ));

        // NUL takes two bytes in modified UTF-8
        let nuls = "\0".repeat(32768);
        assert!(matches!(pool.get_utf8(&nuls), Err(Error::Utf8TooLong(65536))));
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.get_long(1).unwrap(), ConstantIndex(1));
        assert_eq!(pool.get_integer(1).unwrap(), ConstantIndex(3));
        assert_eq!(pool.get_double(f64::NAN).unwrap(), ConstantIndex(4));
        assert_eq!(pool.get_double(f64::NAN).unwrap(), ConstantIndex(4));
        assert_eq!(pool.count(), 6);
        assert!(pool.get(ConstantIndex(2)).is_none());
    }

    #[test]
    fn parsed_duplicates_keep_the_lowest_index() {
        let bytes = [
            0, 4, // count
            3, 0, 0, 0, 9, // #1 = Integer 9
            3, 0, 0, 0, 9, // #2 = Integer 9
            3, 0, 0, 0, 10, // #3 = Integer 10
        ];
        let mut reader = ByteReader::new(&bytes);
        let mut pool = ConstantPool::read(&mut reader).unwrap();
        reader.expect_end().unwrap();
        assert_eq!(pool.get_integer(9).unwrap(), ConstantIndex(1));
        assert_eq!(pool.get(ConstantIndex(2)), Some(&Constant::Integer(9)));
        assert_eq!(pool.count(), 4);
    }
}
