use crate::clocks::SystemTimeSpec;
use crate::table::{Descriptor, DescriptorTable};
use crate::{Error, ErrorExt};
use bitflags::bitflags;
use cap_fs_ext::MetadataExt;
use fs_set_times::SetTimes;
use std::io::{self, IoSlice, IoSliceMut, Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use system_interface::fs::{FileIoExt, GetSetFdFlags};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

impl FileType {
    /// The preview1 `filetype` byte.
    pub fn raw(self) -> u8 {
        self as u8
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FdFlags: u16 {
        const APPEND   = 0b1;
        const DSYNC    = 0b10;
        const NONBLOCK = 0b100;
        const RSYNC    = 0b1000;
        const SYNC     = 0b10000;
    }
}

impl FdFlags {
    /// Flags that need synchronized I/O, which no host call here can provide.
    pub const SYNC_FAMILY: FdFlags = FdFlags::DSYNC.union(FdFlags::RSYNC).union(FdFlags::SYNC);
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OFlags: u16 {
        const CREATE    = 0b1;
        const DIRECTORY = 0b10;
        const EXCLUSIVE = 0b100;
        const TRUNCATE  = 0b1000;
    }
}

bitflags! {
    /// The I/O a descriptor was opened for.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FileAccessMode: u32 {
        const READ  = 0b1;
        const WRITE = 0b10;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filestat {
    pub device_id: u64,
    pub inode: u64,
    pub filetype: FileType,
    pub nlink: u64,
    pub size: u64,
    pub atim: Option<SystemTime>,
    pub mtim: Option<SystemTime>,
    pub ctim: Option<SystemTime>,
}

impl Filestat {
    pub(crate) fn from_metadata(meta: &cap_std::fs::Metadata) -> Self {
        Filestat {
            device_id: meta.dev(),
            inode: meta.ino(),
            filetype: filetype_from(&meta.file_type()),
            nlink: meta.nlink(),
            size: meta.len(),
            atim: meta.accessed().map(|t| t.into_std()).ok(),
            mtim: meta.modified().map(|t| t.into_std()).ok(),
            ctim: meta.created().map(|t| t.into_std()).ok(),
        }
    }

    /// A stat for something with no host metadata, like an in-memory pipe.
    pub(crate) fn synthetic(filetype: FileType) -> Self {
        Filestat {
            device_id: 0,
            inode: 0,
            filetype,
            nlink: 0,
            size: 0,
            atim: None,
            mtim: None,
            ctim: None,
        }
    }
}

/// Nanoseconds since the Unix epoch, as the preview1 ABI expresses
/// timestamps. Missing or pre-epoch times read as 0.
pub fn timestamp(t: Option<SystemTime>) -> Result<u64, Error> {
    match t.map(|t| t.duration_since(UNIX_EPOCH)) {
        Some(Ok(d)) => Ok(u64::try_from(d.as_nanos())?),
        _ => Ok(0),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdStat {
    pub filetype: FileType,
    pub flags: FdFlags,
    pub access_mode: FileAccessMode,
}

/// A regular host file opened through a preopened directory.
pub struct FileEntry {
    file: cap_std::fs::File,
    access_mode: FileAccessMode,
}

impl FileEntry {
    pub fn new(file: cap_std::fs::File, access_mode: FileAccessMode) -> Self {
        FileEntry { file, access_mode }
    }

    pub fn access_mode(&self) -> FileAccessMode {
        self.access_mode
    }

    pub fn file(&self) -> &cap_std::fs::File {
        &self.file
    }

    fn require(&self, mode: FileAccessMode) -> Result<(), Error> {
        if self.access_mode.contains(mode) {
            Ok(())
        } else {
            Err(Error::badf().context(format!("descriptor not opened for {mode:?}")))
        }
    }

    pub fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> Result<u64, Error> {
        self.require(FileAccessMode::READ)?;
        let n = Read::read_vectored(&mut self.file, bufs)?;
        Ok(u64::try_from(n)?)
    }

    pub fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<u64, Error> {
        self.require(FileAccessMode::WRITE)?;
        let n = Write::write_vectored(&mut self.file, bufs)?;
        Ok(u64::try_from(n)?)
    }

    /// Read at an absolute 64-bit offset without moving the cursor.
    pub fn read_vectored_at(&self, bufs: &mut [IoSliceMut<'_>], offset: u64) -> Result<u64, Error> {
        self.require(FileAccessMode::READ)?;
        let n = self.file.read_vectored_at(bufs, offset)?;
        Ok(u64::try_from(n)?)
    }

    /// Write at an absolute 64-bit offset without moving the cursor. Writing
    /// past the end extends the file; the gap reads back as zeros.
    pub fn write_vectored_at(&self, bufs: &[IoSlice<'_>], offset: u64) -> Result<u64, Error> {
        self.require(FileAccessMode::WRITE)?;
        let n = self.file.write_vectored_at(bufs, offset)?;
        Ok(u64::try_from(n)?)
    }

    /// Truncate or zero-extend to exactly `size` bytes.
    pub fn set_size(&self, size: u64) -> Result<(), Error> {
        self.require(FileAccessMode::WRITE)?;
        self.file.set_len(size)?;
        Ok(())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        Ok(Seek::seek(&mut self.file, pos)?)
    }

    pub fn sync(&self) -> Result<(), Error> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn datasync(&self) -> Result<(), Error> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn filestat(&self) -> Result<Filestat, Error> {
        let meta = self.file.metadata()?;
        Ok(Filestat::from_metadata(&meta))
    }

    pub fn fdstat(&self) -> Result<FdStat, Error> {
        let meta = self.file.metadata()?;
        Ok(FdStat {
            filetype: filetype_from(&meta.file_type()),
            flags: get_fd_flags(&self.file)?,
            access_mode: self.access_mode,
        })
    }

    pub fn set_fdflags(&mut self, fdflags: FdFlags) -> Result<(), Error> {
        if fdflags.intersects(FdFlags::SYNC_FAMILY) {
            return Err(Error::invalid_argument().context("cannot set DSYNC, SYNC, or RSYNC flag"));
        }
        let set_fd_flags = self.file.new_set_fd_flags(to_sysif_fdflags(fdflags))?;
        self.file.set_fd_flags(set_fd_flags)?;
        Ok(())
    }

    /// Apply both timestamps in a single host call.
    pub fn set_times(
        &self,
        atim: Option<SystemTimeSpec>,
        mtim: Option<SystemTimeSpec>,
    ) -> Result<(), Error> {
        SetTimes::set_times(
            &self.file,
            atim.map(SystemTimeSpec::into_fd_spec),
            mtim.map(SystemTimeSpec::into_fd_spec),
        )?;
        Ok(())
    }
}

pub fn filetype_from(ft: &cap_std::fs::FileType) -> FileType {
    use cap_fs_ext::FileTypeExt;
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::SymbolicLink
    } else if ft.is_socket() {
        FileType::SocketStream
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_char_device() {
        FileType::CharacterDevice
    } else if ft.is_file() {
        FileType::RegularFile
    } else {
        FileType::Unknown
    }
}

pub(crate) fn to_sysif_fdflags(f: FdFlags) -> system_interface::fs::FdFlags {
    let mut out = system_interface::fs::FdFlags::empty();
    if f.contains(FdFlags::APPEND) {
        out |= system_interface::fs::FdFlags::APPEND;
    }
    if f.contains(FdFlags::NONBLOCK) {
        out |= system_interface::fs::FdFlags::NONBLOCK;
    }
    out
}

fn get_fd_flags(file: &cap_std::fs::File) -> io::Result<FdFlags> {
    let f = file.get_fd_flags()?;
    let mut out = FdFlags::empty();
    if f.contains(system_interface::fs::FdFlags::APPEND) {
        out |= FdFlags::APPEND;
    }
    if f.contains(system_interface::fs::FdFlags::DSYNC) {
        out |= FdFlags::DSYNC;
    }
    if f.contains(system_interface::fs::FdFlags::NONBLOCK) {
        out |= FdFlags::NONBLOCK;
    }
    if f.contains(system_interface::fs::FdFlags::RSYNC) {
        out |= FdFlags::RSYNC;
    }
    if f.contains(system_interface::fs::FdFlags::SYNC) {
        out |= FdFlags::SYNC;
    }
    Ok(out)
}

pub trait TableFileExt {
    fn get_file(&self, fd: u32) -> Result<&FileEntry, Error>;
    fn get_file_mut(&mut self, fd: u32) -> Result<&mut FileEntry, Error>;
}

impl TableFileExt for DescriptorTable {
    fn get_file(&self, fd: u32) -> Result<&FileEntry, Error> {
        match self.get(fd)? {
            Descriptor::File(file) => Ok(file),
            other => Err(Error::badf().context(format!("descriptor {fd} is a {}", other.kind()))),
        }
    }

    fn get_file_mut(&mut self, fd: u32) -> Result<&mut FileEntry, Error> {
        match self.get_mut(fd)? {
            Descriptor::File(file) => Ok(file),
            other => Err(Error::badf().context(format!("descriptor {fd} is a {}", other.kind()))),
        }
    }
}
