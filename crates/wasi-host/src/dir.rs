use crate::clocks::SystemTimeSpec;
use crate::file::{FdFlags, FileAccessMode, FileEntry, FileType, Filestat, OFlags, filetype_from};
use crate::path::ResolvedPath;
use crate::table::{Descriptor, DescriptorTable};
use crate::{Error, ErrorExt};
use cap_fs_ext::{DirEntryExt, DirExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A host directory granted to the instance at startup.
///
/// Preopens live in the context, not the descriptor table, so closing or
/// renumbering the descriptor that first named one leaves it intact for the
/// directories opened beneath it.
#[derive(Debug)]
pub struct PreopenedDir {
    fd: u32,
    guest_path: PathBuf,
    host_path: PathBuf,
    root: cap_std::fs::Dir,
}

impl PreopenedDir {
    pub(crate) fn new(
        fd: u32,
        guest_path: PathBuf,
        host_path: PathBuf,
        root: cap_std::fs::Dir,
    ) -> Self {
        PreopenedDir {
            fd,
            guest_path,
            host_path,
            root,
        }
    }

    /// The id the preopen was first installed at.
    pub fn fd(&self) -> u32 {
        self.fd
    }

    /// The name the guest sees, e.g. `/tmp`.
    pub fn guest_path(&self) -> &Path {
        &self.guest_path
    }

    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    pub fn root(&self) -> &cap_std::fs::Dir {
        &self.root
    }
}

/// An open directory descriptor.
pub struct DirEntry {
    preopen: usize,
    relative: PathBuf,
    preopen_path: Option<PathBuf>,
    dir: cap_std::fs::Dir,
}

impl DirEntry {
    /// The descriptor for the root of preopen number `preopen`.
    pub(crate) fn preopen_root(preopen: usize, guest_path: PathBuf, dir: cap_std::fs::Dir) -> Self {
        DirEntry {
            preopen,
            relative: PathBuf::new(),
            preopen_path: Some(guest_path),
            dir,
        }
    }

    pub(crate) fn nested(preopen: usize, relative: PathBuf, dir: cap_std::fs::Dir) -> Self {
        DirEntry {
            preopen,
            relative,
            preopen_path: None,
            dir,
        }
    }

    /// Index of the owning preopen in the context.
    pub fn preopen(&self) -> usize {
        self.preopen
    }

    /// This directory's location below its preopen root.
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// The guest-visible name, only for preopen roots.
    pub fn preopen_path(&self) -> Option<&Path> {
        self.preopen_path.as_deref()
    }

    pub fn filestat(&self) -> Result<Filestat, Error> {
        let meta = self.dir.dir_metadata()?;
        Ok(Filestat::from_metadata(&meta))
    }

    pub fn set_times(
        &self,
        atim: Option<SystemTimeSpec>,
        mtim: Option<SystemTimeSpec>,
    ) -> Result<(), Error> {
        DirExt::set_times(
            &self.dir,
            Path::new("."),
            atim.map(SystemTimeSpec::into_path_spec),
            mtim.map(SystemTimeSpec::into_path_spec),
        )?;
        Ok(())
    }

    /// Entries of this directory starting at `cursor`: `.` and `..` first,
    /// then the host entries in host order. Each entity carries the cursor
    /// of the entry after it.
    pub fn readdir(
        &self,
        cursor: ReaddirCursor,
    ) -> Result<impl Iterator<Item = Result<ReaddirEntity, Error>> + '_, Error> {
        // cap_std's entries() does not include . and .., we prepend them.
        let dir_meta = self.dir.dir_metadata()?;
        let dots: Vec<Result<(FileType, u64, String), Error>> = vec![
            Ok((FileType::Directory, dir_meta.ino(), ".".to_owned())),
            Ok((FileType::Directory, dir_meta.ino(), "..".to_owned())),
        ];
        let entries = self.dir.entries()?.map(|entry| {
            let entry = entry?;
            let meta = entry.full_metadata()?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| Error::illegal_byte_sequence().context("filename"))?;
            Ok((filetype_from(&meta.file_type()), meta.ino(), name))
        });

        let skip = usize::try_from(u64::from(cursor))?;
        Ok(dots
            .into_iter()
            .chain(entries)
            .enumerate()
            .map(|(ix, r)| {
                r.map(|(filetype, inode, name)| ReaddirEntity {
                    next: ReaddirCursor::from(ix as u64 + 1),
                    filetype,
                    inode,
                    name,
                })
            })
            .skip(skip))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaddirCursor(u64);

impl From<u64> for ReaddirCursor {
    fn from(c: u64) -> ReaddirCursor {
        ReaddirCursor(c)
    }
}

impl From<ReaddirCursor> for u64 {
    fn from(c: ReaddirCursor) -> u64 {
        c.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaddirEntity {
    pub next: ReaddirCursor,
    pub inode: u64,
    pub name: String,
    pub filetype: FileType,
}

/// What `path_open` produced.
pub enum OpenResult {
    File(FileEntry),
    Dir(DirEntry),
}

impl ResolvedPath<'_> {
    pub fn open(
        &self,
        symlink_follow: bool,
        oflags: OFlags,
        access_mode: FileAccessMode,
        fdflags: FdFlags,
    ) -> Result<OpenResult, Error> {
        use cap_fs_ext::{FollowSymlinks, OpenOptionsFollowExt, OpenOptionsMaybeDirExt};

        if fdflags.intersects(FdFlags::SYNC_FAMILY) {
            warn!(?fdflags, "synchronized I/O requested at open");
            return Err(Error::not_supported().context("SYNC family of FdFlags"));
        }

        if oflags.contains(OFlags::DIRECTORY) {
            if oflags.intersects(OFlags::CREATE | OFlags::EXCLUSIVE | OFlags::TRUNCATE) {
                return Err(Error::invalid_argument()
                    .context("directory oflag used with create, exclusive, or truncate"));
            }
            return self.open_dir(symlink_follow).map(OpenResult::Dir);
        }

        let read = access_mode.contains(FileAccessMode::READ);
        let write = access_mode.contains(FileAccessMode::WRITE);
        let mut opts = cap_std::fs::OpenOptions::new();
        if oflags.contains(OFlags::CREATE | OFlags::EXCLUSIVE) {
            opts.create_new(true);
            opts.write(true);
        } else if oflags.contains(OFlags::CREATE) {
            opts.create(true);
            opts.write(true);
        }
        if oflags.contains(OFlags::TRUNCATE) {
            opts.truncate(true);
            opts.write(true);
        }
        if write {
            opts.write(true);
        }
        if read || !write {
            // Open read-only when no access was asked for, so the host lets
            // us open the file at all; the access mode still rejects reads.
            opts.read(true);
        }
        if fdflags.contains(FdFlags::APPEND) {
            opts.append(true);
        }
        opts.follow(if symlink_follow {
            FollowSymlinks::Yes
        } else {
            FollowSymlinks::No
        });
        opts.maybe_dir(true);
        // O_NONBLOCK must be set by the open itself, or opening a FIFO with
        // no peer blocks the host.
        #[cfg(unix)]
        if fdflags.contains(FdFlags::NONBLOCK) {
            use cap_std::fs::OpenOptionsExt;
            opts.custom_flags(libc::O_NONBLOCK);
        }

        let file = self.root().open_with(self.lookup_path(), &opts)?;
        if file.metadata()?.is_dir() {
            let dir = cap_std::fs::Dir::from_std_file(file.into_std());
            return Ok(OpenResult::Dir(DirEntry::nested(
                self.preopen_index(),
                self.relative().to_path_buf(),
                dir,
            )));
        }
        if self.must_be_dir() {
            return Err(Error::not_dir());
        }
        #[cfg(not(unix))]
        let file = {
            use system_interface::fs::GetSetFdFlags;
            let mut file = file;
            if fdflags.contains(FdFlags::NONBLOCK) {
                let set_fd_flags =
                    file.new_set_fd_flags(system_interface::fs::FdFlags::NONBLOCK)?;
                file.set_fd_flags(set_fd_flags)?;
            }
            file
        };
        Ok(OpenResult::File(FileEntry::new(file, access_mode)))
    }

    fn open_dir(&self, symlink_follow: bool) -> Result<DirEntry, Error> {
        let dir = if symlink_follow || self.relative().as_os_str().is_empty() {
            self.root().open_dir(self.path())?
        } else {
            self.root().open_dir_nofollow(self.path())?
        };
        Ok(DirEntry::nested(
            self.preopen_index(),
            self.relative().to_path_buf(),
            dir,
        ))
    }

    pub fn create_dir(&self) -> Result<(), Error> {
        self.root().create_dir(self.path())?;
        Ok(())
    }

    pub fn remove_dir(&self) -> Result<(), Error> {
        if self.relative().as_os_str().is_empty() {
            return Err(Error::not_capable().context("cannot remove a preopened directory"));
        }
        self.root().remove_dir(self.path())?;
        Ok(())
    }

    pub fn unlink_file(&self) -> Result<(), Error> {
        if self.must_be_dir() {
            // unlink never removes directories, so `name/` can only fail.
            let meta = self.root().symlink_metadata(self.path())?;
            return Err(if meta.is_dir() {
                Error::is_dir()
            } else {
                Error::not_dir()
            });
        }
        self.root().remove_file_or_symlink(self.path())?;
        Ok(())
    }

    pub fn filestat(&self, symlink_follow: bool) -> Result<Filestat, Error> {
        let path = self.lookup_path();
        let meta = if symlink_follow {
            self.root().metadata(&path)?
        } else {
            self.root().symlink_metadata(&path)?
        };
        Ok(Filestat::from_metadata(&meta))
    }

    pub fn set_times(
        &self,
        symlink_follow: bool,
        atim: Option<SystemTimeSpec>,
        mtim: Option<SystemTimeSpec>,
    ) -> Result<(), Error> {
        let atim = atim.map(SystemTimeSpec::into_path_spec);
        let mtim = mtim.map(SystemTimeSpec::into_path_spec);
        let path = self.lookup_path();
        if symlink_follow {
            DirExt::set_times(self.root(), &path, atim, mtim)?;
        } else {
            self.root().set_symlink_times(&path, atim, mtim)?;
        }
        Ok(())
    }
}

pub trait TableDirExt {
    fn get_dir(&self, fd: u32) -> Result<&DirEntry, Error>;
}

impl TableDirExt for DescriptorTable {
    fn get_dir(&self, fd: u32) -> Result<&DirEntry, Error> {
        match self.get(fd)? {
            Descriptor::Directory(dir) => Ok(dir),
            other => Err(Error::not_dir().context(format!("descriptor {fd} is a {}", other.kind()))),
        }
    }
}
