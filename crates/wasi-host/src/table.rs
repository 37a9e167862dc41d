use crate::dir::DirEntry;
use crate::file::FileEntry;
use crate::stdio::StdioEntry;
use crate::{Error, ErrorExt};
use tracing::debug;

/// Upper bound (exclusive) on descriptor ids.
pub const MAX_DESCRIPTORS: u32 = 1 << 16;

/// The lowest id handed out by [`Table::allocate`]; 0, 1 and 2 are reserved
/// for stdio.
const FIRST_ALLOCATED: u32 = 3;

/// An open resource, addressed by its slot in the [`DescriptorTable`].
pub enum Descriptor {
    File(FileEntry),
    Directory(DirEntry),
    Stdio(StdioEntry),
}

impl Descriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            Descriptor::File(_) => "file",
            Descriptor::Directory(_) => "directory",
            Descriptor::Stdio(_) => "stdio",
        }
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Descriptor").field(&self.kind()).finish()
    }
}

pub type DescriptorTable = Table<Descriptor>;

/// The `Table` type maps u32 ids to owned resources.
///
/// Ids are slot indices. A slot holds exactly one resource or nothing, so an
/// id can never name two resources, and dropping a resource out of its slot
/// is what releases the host handle behind it.
pub struct Table<T> {
    slots: Vec<Option<T>>,
}

impl<T> Table<T> {
    /// Create an empty table. Allocations will begin at 3, above stdio.
    pub fn new() -> Self {
        Table { slots: Vec::new() }
    }

    /// Place a resource at a specific id, returning whatever it displaced.
    /// Used at bootstrap for the stdio ids.
    pub fn insert_at(&mut self, fd: u32, entry: T) -> Result<Option<T>, Error> {
        let ix = Self::index(fd)?;
        self.ensure_slot(ix);
        Ok(self.slots[ix].replace(entry))
    }

    /// Insert a resource at the lowest unused id >= 3.
    pub fn allocate(&mut self, entry: T) -> Result<u32, Error> {
        let first = FIRST_ALLOCATED as usize;
        self.ensure_slot(first - 1);
        let ix = match self.slots[first..].iter().position(Option::is_none) {
            Some(offset) => first + offset,
            None => self.slots.len(),
        };
        if ix >= MAX_DESCRIPTORS as usize {
            return Err(Error::too_many_open_files().context("descriptor table is full"));
        }
        self.ensure_slot(ix);
        self.slots[ix] = Some(entry);
        let fd = u32::try_from(ix)?;
        debug!(fd, "allocated descriptor");
        Ok(fd)
    }

    pub fn contains_key(&self, fd: u32) -> bool {
        self.slot(fd).is_some()
    }

    pub fn get(&self, fd: u32) -> Result<&T, Error> {
        self.slot(fd)
            .ok_or_else(|| Error::badf().context(format!("descriptor {fd} is not open")))
    }

    pub fn get_mut(&mut self, fd: u32) -> Result<&mut T, Error> {
        self.slots
            .get_mut(fd as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::badf().context(format!("descriptor {fd} is not open")))
    }

    /// Remove the resource at `fd` and hand it back; dropping it closes it.
    pub fn close(&mut self, fd: u32) -> Result<T, Error> {
        let entry = self
            .slots
            .get_mut(fd as usize)
            .and_then(Option::take)
            .ok_or_else(|| Error::badf().context(format!("descriptor {fd} is not open")))?;
        self.shrink();
        debug!(fd, "closed descriptor");
        Ok(entry)
    }

    /// Move the resource at `from` to `to`, returning the resource `to` held
    /// before, if any. Afterwards `from` is closed.
    pub fn renumber(&mut self, from: u32, to: u32) -> Result<Option<T>, Error> {
        if !self.contains_key(from) {
            return Err(Error::badf().context(format!("renumber source {from} is not open")));
        }
        let to_ix = Self::index(to)?;
        if from == to {
            return Ok(None);
        }
        self.ensure_slot(to_ix);
        self.slots.swap(from as usize, to_ix);
        let displaced = self.slots[from as usize].take();
        self.shrink();
        debug!(from, to, replaced = displaced.is_some(), "renumbered descriptor");
        Ok(displaced)
    }

    /// Open ids, ascending.
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(ix, _)| ix as u32)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, fd: u32) -> Option<&T> {
        self.slots.get(fd as usize).and_then(Option::as_ref)
    }

    fn index(fd: u32) -> Result<usize, Error> {
        if fd >= MAX_DESCRIPTORS {
            return Err(Error::badf().context(format!("descriptor {fd} is out of range")));
        }
        Ok(fd as usize)
    }

    fn ensure_slot(&mut self, ix: usize) {
        if self.slots.len() <= ix {
            self.slots.resize_with(ix + 1, || None);
        }
    }

    fn shrink(&mut self) {
        while let Some(None) = self.slots.last() {
            self.slots.pop();
        }
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}
