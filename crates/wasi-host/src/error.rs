//! Errors returned by host calls.
//!
//! Every host call returns `Result<T, Error>`. An [`Error`] is either an
//! [`Errno`], which the dispatch layer hands back to the guest as its preview1
//! code, or a trap, which aborts the instance. Use [`Error::downcast`] to tell
//! the two apart.

use std::fmt;
use std::io;
use std::num::TryFromIntError;

/// The recoverable error conditions a host call can report to the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Errno {
    /// No such file or directory.
    #[error("NoSuchFileOrDirectory: no such file or directory")]
    NoSuchFileOrDirectory,
    /// The descriptor is not open, or not open for the requested access.
    #[error("BadFileDescriptor: bad file descriptor")]
    BadFileDescriptor,
    /// The request would escape the capabilities the instance holds.
    #[error("NotCapable: capabilities insufficient")]
    NotCapable,
    /// The host refused the operation.
    #[error("PermissionDenied: permission denied")]
    PermissionDenied,
    /// A directory was expected.
    #[error("NotDirectory: not a directory")]
    NotDirectory,
    /// A directory was not expected.
    #[error("IsDirectory: is a directory")]
    IsDirectory,
    #[error("FileTooLarge: file too large")]
    FileTooLarge,
    #[error("InvalidArgument: invalid argument")]
    InvalidArgument,
    #[error("NoSpace: no space left on device")]
    NoSpace,
    #[error("Exists: file exists")]
    Exists,
    #[error("NotEmpty: directory not empty")]
    NotEmpty,
    /// Too many levels of symbolic links.
    #[error("Loop: too many levels of symbolic links")]
    Loop,
    #[error("NameTooLong: filename too long")]
    NameTooLong,
    /// A path or string contained a NUL byte.
    #[error("IllegalByteSequence: illegal byte sequence")]
    IllegalByteSequence,
    #[error("NotSupported: not supported")]
    NotSupported,
    /// Positional I/O or seeking on a stream.
    #[error("SeekPipe: invalid seek")]
    SeekPipe,
    #[error("Overflow: value too large to be stored in data type")]
    Overflow,
    #[error("TooManyOpenFiles: too many open files")]
    TooManyOpenFiles,
    /// The operation would block on a non-blocking descriptor.
    #[error("Again: resource unavailable, try again")]
    Again,
    /// A signal interrupted the host call.
    #[error("Intr: interrupted function")]
    Intr,
    #[error("Busy: device or resource busy")]
    Busy,
    #[error("Io: I/O error")]
    Io,
}

impl Errno {
    /// The snapshot-preview1 numeric code for this error.
    pub fn raw(&self) -> u16 {
        match self {
            Errno::PermissionDenied => 2,
            Errno::Again => 6,
            Errno::BadFileDescriptor => 8,
            Errno::Busy => 10,
            Errno::Exists => 20,
            Errno::FileTooLarge => 22,
            Errno::IllegalByteSequence => 25,
            Errno::Intr => 27,
            Errno::InvalidArgument => 28,
            Errno::Io => 29,
            Errno::IsDirectory => 31,
            Errno::Loop => 32,
            Errno::TooManyOpenFiles => 33,
            Errno::NameTooLong => 37,
            Errno::NoSuchFileOrDirectory => 44,
            Errno::NoSpace => 51,
            Errno::NotDirectory => 54,
            Errno::NotEmpty => 55,
            Errno::NotSupported => 58,
            Errno::Overflow => 61,
            Errno::SeekPipe => 70,
            Errno::NotCapable => 76,
        }
    }
}

/// An error from a host call: an [`Errno`] with optional context, or a trap.
pub struct Error {
    inner: anyhow::Error,
}

impl Error {
    /// An unrecoverable condition. The dispatch layer must abort the instance
    /// rather than return a code to the guest.
    pub fn trap(inner: anyhow::Error) -> Error {
        Error { inner }
    }

    /// Returns the guest-visible errno, or gives back the trap.
    pub fn downcast(self) -> Result<Errno, anyhow::Error> {
        self.inner.downcast()
    }

    pub fn downcast_ref(&self) -> Option<&Errno> {
        self.inner.downcast_ref()
    }

    /// The errno carried by this error, `None` for traps.
    pub fn errno(&self) -> Option<Errno> {
        self.downcast_ref().copied()
    }

    pub fn is_trap(&self) -> bool {
        self.errno().is_none()
    }

    pub fn context(self, s: impl Into<String>) -> Self {
        Error {
            inner: self.inner.context(s.into()),
        }
    }

    pub fn into_anyhow(self) -> anyhow::Error {
        self.inner
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Error {
        Error {
            inner: anyhow::Error::from(errno),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

pub trait ErrorExt {
    fn not_found() -> Self;
    fn badf() -> Self;
    fn not_capable() -> Self;
    fn perm() -> Self;
    fn not_dir() -> Self;
    fn is_dir() -> Self;
    fn too_big() -> Self;
    fn invalid_argument() -> Self;
    fn no_space() -> Self;
    fn exist() -> Self;
    fn not_empty() -> Self;
    fn loop_() -> Self;
    fn name_too_long() -> Self;
    fn illegal_byte_sequence() -> Self;
    fn not_supported() -> Self;
    fn seek_pipe() -> Self;
    fn overflow() -> Self;
    fn too_many_open_files() -> Self;
    fn again() -> Self;
    fn interrupted() -> Self;
    fn busy() -> Self;
    fn io() -> Self;
}

impl ErrorExt for Error {
    fn not_found() -> Self {
        Errno::NoSuchFileOrDirectory.into()
    }
    fn badf() -> Self {
        Errno::BadFileDescriptor.into()
    }
    fn not_capable() -> Self {
        Errno::NotCapable.into()
    }
    fn perm() -> Self {
        Errno::PermissionDenied.into()
    }
    fn not_dir() -> Self {
        Errno::NotDirectory.into()
    }
    fn is_dir() -> Self {
        Errno::IsDirectory.into()
    }
    fn too_big() -> Self {
        Errno::FileTooLarge.into()
    }
    fn invalid_argument() -> Self {
        Errno::InvalidArgument.into()
    }
    fn no_space() -> Self {
        Errno::NoSpace.into()
    }
    fn exist() -> Self {
        Errno::Exists.into()
    }
    fn not_empty() -> Self {
        Errno::NotEmpty.into()
    }
    fn loop_() -> Self {
        Errno::Loop.into()
    }
    fn name_too_long() -> Self {
        Errno::NameTooLong.into()
    }
    fn illegal_byte_sequence() -> Self {
        Errno::IllegalByteSequence.into()
    }
    fn not_supported() -> Self {
        Errno::NotSupported.into()
    }
    fn seek_pipe() -> Self {
        Errno::SeekPipe.into()
    }
    fn overflow() -> Self {
        Errno::Overflow.into()
    }
    fn too_many_open_files() -> Self {
        Errno::TooManyOpenFiles.into()
    }
    fn again() -> Self {
        Errno::Again.into()
    }
    fn interrupted() -> Self {
        Errno::Intr.into()
    }
    fn busy() -> Self {
        Errno::Busy.into()
    }
    fn io() -> Self {
        Errno::Io.into()
    }
}

#[cfg(unix)]
fn from_raw_os_error(code: i32) -> Option<Errno> {
    use rustix::io::Errno as RustixErrno;

    const MAPPING: &[(RustixErrno, Errno)] = &[
        (RustixErrno::NOENT, Errno::NoSuchFileOrDirectory),
        (RustixErrno::BADF, Errno::BadFileDescriptor),
        (RustixErrno::ACCESS, Errno::PermissionDenied),
        (RustixErrno::PERM, Errno::PermissionDenied),
        (RustixErrno::ROFS, Errno::PermissionDenied),
        (RustixErrno::NOTDIR, Errno::NotDirectory),
        (RustixErrno::ISDIR, Errno::IsDirectory),
        (RustixErrno::FBIG, Errno::FileTooLarge),
        (RustixErrno::INVAL, Errno::InvalidArgument),
        (RustixErrno::NOSPC, Errno::NoSpace),
        (RustixErrno::DQUOT, Errno::NoSpace),
        (RustixErrno::EXIST, Errno::Exists),
        (RustixErrno::NOTEMPTY, Errno::NotEmpty),
        (RustixErrno::LOOP, Errno::Loop),
        (RustixErrno::NAMETOOLONG, Errno::NameTooLong),
        (RustixErrno::ILSEQ, Errno::IllegalByteSequence),
        (RustixErrno::NOTSUP, Errno::NotSupported),
        (RustixErrno::OPNOTSUPP, Errno::NotSupported),
        (RustixErrno::SPIPE, Errno::SeekPipe),
        (RustixErrno::OVERFLOW, Errno::Overflow),
        (RustixErrno::MFILE, Errno::TooManyOpenFiles),
        (RustixErrno::NFILE, Errno::TooManyOpenFiles),
        (RustixErrno::XDEV, Errno::NotCapable),
        (RustixErrno::AGAIN, Errno::Again),
        (RustixErrno::WOULDBLOCK, Errno::Again),
        (RustixErrno::INTR, Errno::Intr),
        (RustixErrno::BUSY, Errno::Busy),
        (RustixErrno::TXTBSY, Errno::Busy),
        (RustixErrno::IO, Errno::Io),
    ];

    MAPPING
        .iter()
        .find(|(host, _)| host.raw_os_error() == code)
        .map(|(_, errno)| *errno)
}

#[cfg(not(unix))]
fn from_raw_os_error(_code: i32) -> Option<Errno> {
    None
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        if let Some(code) = err.raw_os_error() {
            return match from_raw_os_error(code) {
                Some(errno) => errno.into(),
                None => Error::trap(anyhow::Error::new(err).context("unknown host os error")),
            };
        }
        match err.kind() {
            io::ErrorKind::NotFound => Errno::NoSuchFileOrDirectory.into(),
            // cap-std reports attempts to leave a sandboxed root this way.
            io::ErrorKind::PermissionDenied => Errno::NotCapable.into(),
            io::ErrorKind::AlreadyExists => Errno::Exists.into(),
            io::ErrorKind::InvalidInput => Errno::InvalidArgument.into(),
            io::ErrorKind::Unsupported => Errno::NotSupported.into(),
            io::ErrorKind::WouldBlock => Errno::Again.into(),
            io::ErrorKind::Interrupted => Errno::Intr.into(),
            _ => Error::trap(anyhow::Error::new(err).context("unknown host io error")),
        }
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Error {
        Errno::Overflow.into()
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_err: std::str::Utf8Error) -> Error {
        Errno::IllegalByteSequence.into()
    }
}
