//! The snapshot-preview1 host calls.
//!
//! [`WasiSnapshotPreview1`] has one method per supported preview1 function.
//! Guest memory is already marshalled by the caller: strings arrive as
//! `&str`, buffers as slices, and results come back as plain values for the
//! caller to store. Every method returns `Result<_, Error>`; see
//! [`Error::downcast`] for turning the error into a preview1 errno.

use crate::clocks::{ClockId, TimestampSpec};
use crate::dir::{OpenResult, ReaddirCursor, ReaddirEntity, TableDirExt};
use crate::exit::I32Exit;
use crate::file::{FdFlags, FileAccessMode, FileType, OFlags, TableFileExt};
use crate::random;
use crate::table::Descriptor;
use crate::{Error, ErrorExt, WasiCtx};
use cap_std::time::Duration;
use std::io::{IoSlice, IoSliceMut, SeekFrom};
use tracing::{debug, trace};

pub mod types {
    use crate::file::{self, FdFlags, FileType};
    use crate::{Error, ErrorExt};
    use bitflags::bitflags;

    pub type Fd = u32;
    pub type Size = u32;
    pub type Filesize = u64;
    pub type Filedelta = i64;
    pub type Timestamp = u64;
    pub type Dircookie = u64;
    pub type Exitcode = u32;

    bitflags! {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct Rights: u64 {
            const FD_DATASYNC             = 1 << 0;
            const FD_READ                 = 1 << 1;
            const FD_SEEK                 = 1 << 2;
            const FD_FDSTAT_SET_FLAGS     = 1 << 3;
            const FD_SYNC                 = 1 << 4;
            const FD_TELL                 = 1 << 5;
            const FD_WRITE                = 1 << 6;
            const FD_ADVISE               = 1 << 7;
            const FD_ALLOCATE             = 1 << 8;
            const PATH_CREATE_DIRECTORY   = 1 << 9;
            const PATH_CREATE_FILE        = 1 << 10;
            const PATH_LINK_SOURCE        = 1 << 11;
            const PATH_LINK_TARGET        = 1 << 12;
            const PATH_OPEN               = 1 << 13;
            const FD_READDIR              = 1 << 14;
            const PATH_READLINK           = 1 << 15;
            const PATH_RENAME_SOURCE      = 1 << 16;
            const PATH_RENAME_TARGET      = 1 << 17;
            const PATH_FILESTAT_GET       = 1 << 18;
            const PATH_FILESTAT_SET_SIZE  = 1 << 19;
            const PATH_FILESTAT_SET_TIMES = 1 << 20;
            const FD_FILESTAT_GET         = 1 << 21;
            const FD_FILESTAT_SET_SIZE    = 1 << 22;
            const FD_FILESTAT_SET_TIMES   = 1 << 23;
            const PATH_SYMLINK            = 1 << 24;
            const PATH_REMOVE_DIRECTORY   = 1 << 25;
            const PATH_UNLINK_FILE        = 1 << 26;
            const POLL_FD_READWRITE       = 1 << 27;
            const SOCK_SHUTDOWN           = 1 << 28;
            const SOCK_ACCEPT             = 1 << 29;
        }
    }

    bitflags! {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct Lookupflags: u32 {
            const SYMLINK_FOLLOW = 0b1;
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Whence {
        Set,
        Cur,
        End,
    }

    impl TryFrom<u8> for Whence {
        type Error = Error;
        fn try_from(raw: u8) -> Result<Whence, Error> {
            match raw {
                0 => Ok(Whence::Set),
                1 => Ok(Whence::Cur),
                2 => Ok(Whence::End),
                _ => Err(Error::invalid_argument().context(format!("unknown whence {raw}"))),
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Filestat {
        pub dev: u64,
        pub ino: u64,
        pub filetype: FileType,
        pub nlink: u64,
        pub size: Filesize,
        pub atim: Timestamp,
        pub mtim: Timestamp,
        pub ctim: Timestamp,
    }

    impl TryFrom<file::Filestat> for Filestat {
        type Error = Error;
        fn try_from(stat: file::Filestat) -> Result<Filestat, Error> {
            Ok(Filestat {
                dev: stat.device_id,
                ino: stat.inode,
                filetype: stat.filetype,
                nlink: stat.nlink,
                size: stat.size,
                atim: file::timestamp(stat.atim)?,
                mtim: file::timestamp(stat.mtim)?,
                ctim: file::timestamp(stat.ctim)?,
            })
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Fdstat {
        pub fs_filetype: FileType,
        pub fs_flags: FdFlags,
        pub fs_rights_base: Rights,
        pub fs_rights_inheriting: Rights,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Prestat {
        Dir { pr_name_len: Size },
    }

    /// The fixed-size header `fd_readdir` writes before each name.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Dirent {
        pub d_next: Dircookie,
        pub d_ino: u64,
        pub d_namlen: u32,
        pub d_type: FileType,
    }

    impl Dirent {
        pub const SIZE: usize = 24;

        /// The little-endian guest layout: `d_next` at 0, `d_ino` at 8,
        /// `d_namlen` at 16, `d_type` at 20, padded to 24.
        pub fn to_bytes(&self) -> [u8; Dirent::SIZE] {
            let mut bytes = [0; Dirent::SIZE];
            bytes[0..8].copy_from_slice(&self.d_next.to_le_bytes());
            bytes[8..16].copy_from_slice(&self.d_ino.to_le_bytes());
            bytes[16..20].copy_from_slice(&self.d_namlen.to_le_bytes());
            bytes[20] = self.d_type.raw();
            bytes
        }
    }

    // The default subset of base rights reported for directories. Some guest
    // libcs check for these before attempting path operations.
    pub(crate) fn directory_base_rights() -> Rights {
        Rights::PATH_CREATE_DIRECTORY
            | Rights::PATH_CREATE_FILE
            | Rights::PATH_OPEN
            | Rights::FD_READDIR
            | Rights::PATH_REMOVE_DIRECTORY
            | Rights::PATH_UNLINK_FILE
            | Rights::PATH_FILESTAT_GET
            | Rights::PATH_FILESTAT_SET_TIMES
            | Rights::FD_FILESTAT_GET
            | Rights::FD_FILESTAT_SET_TIMES
    }

    pub(crate) fn directory_inheriting_rights() -> Rights {
        Rights::FD_DATASYNC
            | Rights::FD_READ
            | Rights::FD_SEEK
            | Rights::FD_FDSTAT_SET_FLAGS
            | Rights::FD_SYNC
            | Rights::FD_TELL
            | Rights::FD_WRITE
            | Rights::FD_FILESTAT_GET
            | Rights::FD_FILESTAT_SET_SIZE
            | Rights::FD_FILESTAT_SET_TIMES
            | directory_base_rights()
    }
}

use types::{
    Dircookie, Dirent, Exitcode, Fd, Fdstat, Filedelta, Filesize, Filestat, Lookupflags, Prestat,
    Rights, Size, Timestamp, Whence,
};

pub trait WasiSnapshotPreview1 {
    /// Write argv into `argv_buf`, each NUL-terminated, and return the offset
    /// of each argument within it.
    fn args_get(&mut self, argv_buf: &mut [u8]) -> Result<Vec<Size>, Error>;
    /// `(argc, bytes needed by args_get)`.
    fn args_sizes_get(&mut self) -> Result<(Size, Size), Error>;
    fn environ_get(&mut self, environ_buf: &mut [u8]) -> Result<Vec<Size>, Error>;
    fn environ_sizes_get(&mut self) -> Result<(Size, Size), Error>;

    fn clock_res_get(&mut self, id: u32) -> Result<Timestamp, Error>;
    fn clock_time_get(&mut self, id: u32, precision: Timestamp) -> Result<Timestamp, Error>;

    fn fd_close(&mut self, fd: Fd) -> Result<(), Error>;
    fn fd_datasync(&mut self, fd: Fd) -> Result<(), Error>;
    fn fd_fdstat_get(&mut self, fd: Fd) -> Result<Fdstat, Error>;
    fn fd_fdstat_set_flags(&mut self, fd: Fd, flags: FdFlags) -> Result<(), Error>;
    fn fd_filestat_get(&mut self, fd: Fd) -> Result<Filestat, Error>;
    fn fd_filestat_set_size(&mut self, fd: Fd, size: Filesize) -> Result<(), Error>;
    fn fd_filestat_set_times(&mut self, fd: Fd, times: TimestampSpec) -> Result<(), Error>;
    fn fd_pread(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        offset: Filesize,
    ) -> Result<Size, Error>;
    fn fd_prestat_get(&mut self, fd: Fd) -> Result<Prestat, Error>;
    fn fd_prestat_dir_name(&mut self, fd: Fd, path: &mut [u8]) -> Result<(), Error>;
    fn fd_pwrite(&mut self, fd: Fd, ciovs: &[IoSlice<'_>], offset: Filesize)
    -> Result<Size, Error>;
    fn fd_read(&mut self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<Size, Error>;
    /// Fill `buf` with dirent headers and names starting at `cookie`. A
    /// result equal to `buf.len()` means more entries may follow.
    fn fd_readdir(&mut self, fd: Fd, buf: &mut [u8], cookie: Dircookie) -> Result<Size, Error>;
    fn fd_renumber(&mut self, from: Fd, to: Fd) -> Result<(), Error>;
    fn fd_seek(&mut self, fd: Fd, offset: Filedelta, whence: Whence) -> Result<Filesize, Error>;
    fn fd_sync(&mut self, fd: Fd) -> Result<(), Error>;
    fn fd_tell(&mut self, fd: Fd) -> Result<Filesize, Error>;
    fn fd_write(&mut self, fd: Fd, ciovs: &[IoSlice<'_>]) -> Result<Size, Error>;

    fn path_create_directory(&mut self, dirfd: Fd, path: &str) -> Result<(), Error>;
    fn path_filestat_get(
        &mut self,
        dirfd: Fd,
        flags: Lookupflags,
        path: &str,
    ) -> Result<Filestat, Error>;
    fn path_filestat_set_times(
        &mut self,
        dirfd: Fd,
        flags: Lookupflags,
        path: &str,
        times: TimestampSpec,
    ) -> Result<(), Error>;
    fn path_open(
        &mut self,
        dirfd: Fd,
        dirflags: Lookupflags,
        path: &str,
        oflags: OFlags,
        fs_rights_base: Rights,
        fs_rights_inheriting: Rights,
        fdflags: FdFlags,
    ) -> Result<Fd, Error>;
    fn path_remove_directory(&mut self, dirfd: Fd, path: &str) -> Result<(), Error>;
    fn path_unlink_file(&mut self, dirfd: Fd, path: &str) -> Result<(), Error>;

    /// The guest's request to exit. The caller unwinds the instance with the
    /// returned value and decides whether to end the host process.
    fn proc_exit(&mut self, status: Exitcode) -> I32Exit;

    fn random_get(&mut self, buf: &mut [u8]) -> Result<(), Error>;
}

impl WasiSnapshotPreview1 for WasiCtx {
    fn args_get(&mut self, argv_buf: &mut [u8]) -> Result<Vec<Size>, Error> {
        self.args.write_to(argv_buf)
    }

    fn args_sizes_get(&mut self) -> Result<(Size, Size), Error> {
        Ok((self.args.number_elements(), self.args.cumulative_size()))
    }

    fn environ_get(&mut self, environ_buf: &mut [u8]) -> Result<Vec<Size>, Error> {
        self.env.write_to(environ_buf)
    }

    fn environ_sizes_get(&mut self) -> Result<(Size, Size), Error> {
        Ok((self.env.number_elements(), self.env.cumulative_size()))
    }

    fn clock_res_get(&mut self, id: u32) -> Result<Timestamp, Error> {
        let resolution = self.clocks.resolution(ClockId::try_from(id)?)?;
        Ok(u64::try_from(resolution.as_nanos())?)
    }

    fn clock_time_get(&mut self, id: u32, precision: Timestamp) -> Result<Timestamp, Error> {
        let reading = self
            .clocks
            .now_with(ClockId::try_from(id)?, Duration::from_nanos(precision))?;
        reading.as_nanos()
    }

    fn fd_close(&mut self, fd: Fd) -> Result<(), Error> {
        // A failed flush leaves the descriptor open.
        if let Descriptor::Stdio(stdio) = self.table.get_mut(fd)? {
            stdio.flush()?;
        }
        self.table.close(fd)?;
        Ok(())
    }

    fn fd_datasync(&mut self, fd: Fd) -> Result<(), Error> {
        self.table.get_file(fd)?.datasync()
    }

    fn fd_fdstat_get(&mut self, fd: Fd) -> Result<Fdstat, Error> {
        match self.table.get(fd)? {
            Descriptor::File(file) => {
                let fdstat = file.fdstat()?;
                Ok(Fdstat {
                    fs_filetype: fdstat.filetype,
                    fs_flags: fdstat.flags,
                    fs_rights_base: access_rights(fdstat.access_mode),
                    fs_rights_inheriting: Rights::empty(),
                })
            }
            Descriptor::Directory(_) => Ok(Fdstat {
                fs_filetype: FileType::Directory,
                fs_flags: FdFlags::empty(),
                fs_rights_base: types::directory_base_rights(),
                fs_rights_inheriting: types::directory_inheriting_rights(),
            }),
            Descriptor::Stdio(stdio) => Ok(Fdstat {
                fs_filetype: stdio.stream().filetype(),
                fs_flags: FdFlags::empty(),
                fs_rights_base: access_rights(stdio.kind().access_mode()),
                fs_rights_inheriting: Rights::empty(),
            }),
        }
    }

    fn fd_fdstat_set_flags(&mut self, fd: Fd, flags: FdFlags) -> Result<(), Error> {
        trace!(fd, ?flags, "fd_fdstat_set_flags");
        self.table.get_file_mut(fd)?.set_fdflags(flags)
    }

    fn fd_filestat_get(&mut self, fd: Fd) -> Result<Filestat, Error> {
        let stat = match self.table.get(fd)? {
            Descriptor::File(file) => file.filestat()?,
            Descriptor::Directory(dir) => dir.filestat()?,
            Descriptor::Stdio(stdio) => stdio.filestat(),
        };
        Filestat::try_from(stat)
    }

    fn fd_filestat_set_size(&mut self, fd: Fd, size: Filesize) -> Result<(), Error> {
        trace!(fd, size, "fd_filestat_set_size");
        self.table.get_file(fd)?.set_size(size)
    }

    fn fd_filestat_set_times(&mut self, fd: Fd, times: TimestampSpec) -> Result<(), Error> {
        let (atim, mtim) = times.resolve()?;
        match self.table.get(fd)? {
            Descriptor::File(file) => file.set_times(atim, mtim),
            Descriptor::Directory(dir) => dir.set_times(atim, mtim),
            Descriptor::Stdio(_) => Err(Error::badf().context("stdio has no timestamps")),
        }
    }

    fn fd_pread(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        offset: Filesize,
    ) -> Result<Size, Error> {
        trace!(fd, offset, "fd_pread");
        let n = match self.table.get(fd)? {
            Descriptor::File(file) => file.read_vectored_at(iovs, offset)?,
            Descriptor::Stdio(_) => return Err(Error::seek_pipe()),
            Descriptor::Directory(_) => return Err(Error::badf()),
        };
        Ok(Size::try_from(n)?)
    }

    fn fd_prestat_get(&mut self, fd: Fd) -> Result<Prestat, Error> {
        let preopen = preopen_name(self, fd)?;
        Ok(Prestat::Dir {
            pr_name_len: Size::try_from(preopen.len())?,
        })
    }

    fn fd_prestat_dir_name(&mut self, fd: Fd, path: &mut [u8]) -> Result<(), Error> {
        let name = preopen_name(self, fd)?;
        if name.len() > path.len() {
            return Err(Error::name_too_long().context(format!(
                "preopen name needs {} bytes, buffer has {}",
                name.len(),
                path.len()
            )));
        }
        path[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }

    fn fd_pwrite(
        &mut self,
        fd: Fd,
        ciovs: &[IoSlice<'_>],
        offset: Filesize,
    ) -> Result<Size, Error> {
        trace!(fd, offset, "fd_pwrite");
        let n = match self.table.get(fd)? {
            Descriptor::File(file) => file.write_vectored_at(ciovs, offset)?,
            Descriptor::Stdio(_) => return Err(Error::seek_pipe()),
            Descriptor::Directory(_) => return Err(Error::badf()),
        };
        Ok(Size::try_from(n)?)
    }

    fn fd_read(&mut self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<Size, Error> {
        let n = match self.table.get_mut(fd)? {
            Descriptor::File(file) => file.read_vectored(iovs)?,
            Descriptor::Stdio(stdio) => stdio.read_vectored(iovs)?,
            Descriptor::Directory(_) => return Err(Error::badf()),
        };
        Ok(Size::try_from(n)?)
    }

    fn fd_readdir(&mut self, fd: Fd, buf: &mut [u8], cookie: Dircookie) -> Result<Size, Error> {
        let buf_len = buf.len();
        let mut bufused = 0;
        for entity in self
            .table
            .get_dir(fd)?
            .readdir(ReaddirCursor::from(cookie))?
        {
            let entity = entity?;
            let dirent_raw = dirent(&entity)?.to_bytes();
            let name_raw = entity.name.as_bytes();

            // Copy as many bytes of the dirent as we can, up to the end of the buffer.
            let dirent_copy_len = dirent_raw.len().min(buf_len - bufused);
            buf[bufused..bufused + dirent_copy_len]
                .copy_from_slice(&dirent_raw[..dirent_copy_len]);
            // A partially copied entry tells the guest the buffer is full, not
            // that the directory ended.
            if dirent_copy_len < dirent_raw.len() {
                return Ok(Size::try_from(buf_len)?);
            }
            bufused += dirent_copy_len;

            let name_copy_len = name_raw.len().min(buf_len - bufused);
            buf[bufused..bufused + name_copy_len].copy_from_slice(&name_raw[..name_copy_len]);
            if name_copy_len < name_raw.len() {
                return Ok(Size::try_from(buf_len)?);
            }
            bufused += name_copy_len;
        }
        Ok(Size::try_from(bufused)?)
    }

    fn fd_renumber(&mut self, from: Fd, to: Fd) -> Result<(), Error> {
        if from != to && self.table.contains_key(from) {
            if let Ok(Descriptor::Stdio(displaced)) = self.table.get_mut(to) {
                displaced.flush()?;
            }
        }
        self.table.renumber(from, to)?;
        Ok(())
    }

    fn fd_seek(&mut self, fd: Fd, offset: Filedelta, whence: Whence) -> Result<Filesize, Error> {
        let pos = match whence {
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
            Whence::Set => SeekFrom::Start(
                u64::try_from(offset)
                    .map_err(|_| Error::invalid_argument().context("negative seek offset"))?,
            ),
        };
        match self.table.get_mut(fd)? {
            Descriptor::File(file) => file.seek(pos),
            Descriptor::Stdio(_) => Err(Error::seek_pipe()),
            Descriptor::Directory(_) => Err(Error::badf()),
        }
    }

    fn fd_sync(&mut self, fd: Fd) -> Result<(), Error> {
        self.table.get_file(fd)?.sync()
    }

    fn fd_tell(&mut self, fd: Fd) -> Result<Filesize, Error> {
        self.fd_seek(fd, 0, Whence::Cur)
    }

    fn fd_write(&mut self, fd: Fd, ciovs: &[IoSlice<'_>]) -> Result<Size, Error> {
        let n = match self.table.get_mut(fd)? {
            Descriptor::File(file) => file.write_vectored(ciovs)?,
            Descriptor::Stdio(stdio) => stdio.write_vectored(ciovs)?,
            Descriptor::Directory(_) => return Err(Error::badf()),
        };
        Ok(Size::try_from(n)?)
    }

    fn path_create_directory(&mut self, dirfd: Fd, path: &str) -> Result<(), Error> {
        self.resolve(dirfd, path)?.create_dir()
    }

    fn path_filestat_get(
        &mut self,
        dirfd: Fd,
        flags: Lookupflags,
        path: &str,
    ) -> Result<Filestat, Error> {
        let stat = self
            .resolve(dirfd, path)?
            .filestat(flags.contains(Lookupflags::SYMLINK_FOLLOW))?;
        Filestat::try_from(stat)
    }

    fn path_filestat_set_times(
        &mut self,
        dirfd: Fd,
        flags: Lookupflags,
        path: &str,
        times: TimestampSpec,
    ) -> Result<(), Error> {
        let (atim, mtim) = times.resolve()?;
        self.resolve(dirfd, path)?.set_times(
            flags.contains(Lookupflags::SYMLINK_FOLLOW),
            atim,
            mtim,
        )
    }

    fn path_open(
        &mut self,
        dirfd: Fd,
        dirflags: Lookupflags,
        path: &str,
        oflags: OFlags,
        fs_rights_base: Rights,
        _fs_rights_inheriting: Rights,
        fdflags: FdFlags,
    ) -> Result<Fd, Error> {
        let mut access_mode = FileAccessMode::empty();
        if fs_rights_base.contains(Rights::FD_READ) {
            access_mode |= FileAccessMode::READ;
        }
        if fs_rights_base.contains(Rights::FD_WRITE) {
            access_mode |= FileAccessMode::WRITE;
        }

        let resolved = self.resolve(dirfd, path)?;
        let opened = resolved.open(
            dirflags.contains(Lookupflags::SYMLINK_FOLLOW),
            oflags,
            access_mode,
            fdflags,
        )?;
        let descriptor = match opened {
            OpenResult::File(file) => Descriptor::File(file),
            OpenResult::Dir(dir) => Descriptor::Directory(dir),
        };
        let fd = self.table.allocate(descriptor)?;
        debug!(fd, dirfd, path, ?oflags, ?access_mode, "path_open");
        Ok(fd)
    }

    fn path_remove_directory(&mut self, dirfd: Fd, path: &str) -> Result<(), Error> {
        self.resolve(dirfd, path)?.remove_dir()
    }

    fn path_unlink_file(&mut self, dirfd: Fd, path: &str) -> Result<(), Error> {
        self.resolve(dirfd, path)?.unlink_file()
    }

    fn proc_exit(&mut self, status: Exitcode) -> I32Exit {
        // Preview1 exit codes are unsigned; the host status keeps the bits.
        I32Exit(status.cast_signed())
    }

    fn random_get(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        random::fill(&mut *self.random, buf)
    }
}

fn access_rights(access_mode: FileAccessMode) -> Rights {
    let mut rights = Rights::empty();
    if access_mode.contains(FileAccessMode::READ) {
        rights |= Rights::FD_READ;
    }
    if access_mode.contains(FileAccessMode::WRITE) {
        rights |= Rights::FD_WRITE;
    }
    rights
}

fn preopen_name(ctx: &WasiCtx, fd: Fd) -> Result<String, Error> {
    let path = match ctx.table.get(fd)? {
        Descriptor::Directory(dir) => dir.preopen_path(),
        _ => None,
    };
    let path = path.ok_or_else(|| Error::badf().context(format!("{fd} is not a preopen")))?;
    let name = path
        .to_str()
        .ok_or_else(|| Error::illegal_byte_sequence().context("preopen name"))?;
    Ok(name.to_owned())
}

fn dirent(entity: &ReaddirEntity) -> Result<Dirent, Error> {
    Ok(Dirent {
        d_next: u64::from(entity.next),
        d_ino: entity.inode,
        d_namlen: u32::try_from(entity.name.len())?,
        d_type: entity.filetype,
    })
}
