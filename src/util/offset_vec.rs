use std::fmt;
use std::ops::Sub;

/// Things that occupy a variable number of slots (bytes of bytecode, constant pool entries,
/// operand stack or local variable slots).
pub trait Width {
    fn width(&self) -> usize;
}

/// Position inside an [`OffsetVec`], counted in slots rather than in entries
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Offset(pub usize);

impl Sub for Offset {
    type Output = isize;

    fn sub(self, other: Offset) -> isize {
        (self.0 as isize) - (other.0 as isize)
    }
}

/// Why looking up an offset failed
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OffsetLookup {
    /// The offset lands inside the entry at this index
    Misaligned(usize),

    /// The offset is at or past the end
    OutOfBounds,
}

/// Vector whose entries are addressed by the running sum of the widths of the entries before
/// them. Constant pools (longs and doubles take two slots), bytecode (instructions are 1 to
/// several bytes), and operand stacks (longs and doubles again) all look like this.
#[derive(Clone)]
pub struct OffsetVec<T> {
    entries: Vec<T>,
    starts: Vec<Offset>,
    base: Offset,
    end: Offset,
}

impl<T: Width> OffsetVec<T> {
    pub fn new() -> OffsetVec<T> {
        OffsetVec::starting_at(Offset(0))
    }

    /// Empty vector whose first entry will be at `base` (the constant pool starts at 1)
    pub fn starting_at(base: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: Vec::new(),
            starts: Vec::new(),
            base,
            end: base,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset the next pushed entry would get
    pub fn offset_len(&self) -> Offset {
        self.end
    }

    /// Append an entry, returning its offset
    pub fn push(&mut self, entry: T) -> Offset {
        let at = self.end;
        self.end.0 += entry.width();
        self.starts.push(at);
        self.entries.push(entry);
        at
    }

    /// Remove the last entry
    pub fn pop(&mut self) -> Option<(Offset, T)> {
        let entry = self.entries.pop()?;
        let at = self.starts.pop().unwrap_or(self.base);
        self.end = at;
        Some((at, entry))
    }

    /// Drop every entry from index `len` onwards
    pub fn truncate(&mut self, len: usize) {
        if len < self.entries.len() {
            self.end = self.starts[len];
            self.entries.truncate(len);
            self.starts.truncate(len);
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Index of the entry starting exactly at `offset`
    pub fn index_of(&self, offset: Offset) -> Result<usize, OffsetLookup> {
        match self.starts.binary_search(&offset) {
            Ok(index) => Ok(index),
            Err(0) => Err(OffsetLookup::OutOfBounds),
            Err(_) if offset >= self.end => Err(OffsetLookup::OutOfBounds),
            Err(next) => Err(OffsetLookup::Misaligned(next - 1)),
        }
    }

    /// Entry starting exactly at `offset`
    pub fn get_offset(&self, offset: Offset) -> Option<&T> {
        self.index_of(offset).ok().map(|index| &self.entries[index])
    }

    /// Entry (and its offset) at a position
    pub fn get_index(&self, index: usize) -> Option<(Offset, &T)> {
        self.entries.get(index).map(|entry| (self.starts[index], entry))
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut T> {
        self.entries.get_mut(index)
    }

    /// Offset of the entry at `index`, or the end offset when `index == len`
    pub fn offset_of(&self, index: usize) -> Offset {
        self.starts.get(index).copied().unwrap_or(self.end)
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.last()
    }

    /// Entries together with their offsets
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Offset, &T)> + ExactSizeIterator + '_ {
        self.starts.iter().copied().zip(self.entries.iter())
    }

    /// Entries without their offsets
    pub fn values(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Mutate entries in place; the closure must not change the width of any entry
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        for entry in &mut self.entries {
            let before = entry.width();
            f(entry);
            debug_assert_eq!(before, entry.width(), "entry width changed in place");
        }
    }

    pub fn into_values(self) -> Vec<T> {
        self.entries
    }
}

impl<T: PartialEq> PartialEq for OffsetVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && self.entries == other.entries
    }
}

impl<T: Eq> Eq for OffsetVec<T> {}

impl<T: Width> Default for OffsetVec<T> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(entries: I) -> Self {
        let mut vec = OffsetVec::new();
        vec.extend(entries);
        vec
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, entries: I) {
        for entry in entries {
            self.push(entry);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.starts.iter().map(|at| at.0).zip(self.entries.iter()))
            .finish()
    }
}
