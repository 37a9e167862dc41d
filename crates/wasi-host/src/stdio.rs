//! The three standard streams.
//!
//! A context starts with each of ids 0, 1 and 2 bound to a [`StdioEntry`].
//! The stream behind an entry is either the host's own stdio or a
//! [`pipe`](crate::pipe) supplied by the embedder.

use crate::file::{FileAccessMode, FileType, Filestat};
use crate::{Error, ErrorExt};
use std::io::{self, IoSlice, IoSliceMut, IsTerminal, Read, Write};

/// A byte stream that can back one of the standard descriptors.
///
/// Streams have no cursor, so positional I/O and seeking are rejected by
/// the caller before they reach the stream.
pub trait WasiStream: Send {
    fn read_vectored(&mut self, _bufs: &mut [IoSliceMut<'_>]) -> Result<u64, Error> {
        Err(Error::badf())
    }

    fn write_vectored(&mut self, _bufs: &[IoSlice<'_>]) -> Result<u64, Error> {
        Err(Error::badf())
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn isatty(&self) -> bool {
        false
    }

    fn filetype(&self) -> FileType {
        if self.isatty() {
            FileType::CharacterDevice
        } else {
            FileType::Unknown
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StdioKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StdioKind {
    /// The descriptor id this stream occupies at startup.
    pub fn fd(self) -> u32 {
        match self {
            StdioKind::Stdin => 0,
            StdioKind::Stdout => 1,
            StdioKind::Stderr => 2,
        }
    }

    pub fn access_mode(self) -> FileAccessMode {
        match self {
            StdioKind::Stdin => FileAccessMode::READ,
            StdioKind::Stdout | StdioKind::Stderr => FileAccessMode::WRITE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StdioKind::Stdin => "<stdin>",
            StdioKind::Stdout => "<stdout>",
            StdioKind::Stderr => "<stderr>",
        }
    }
}

pub struct StdioEntry {
    kind: StdioKind,
    stream: Box<dyn WasiStream>,
}

impl StdioEntry {
    pub fn new(kind: StdioKind, stream: Box<dyn WasiStream>) -> Self {
        StdioEntry { kind, stream }
    }

    pub fn kind(&self) -> StdioKind {
        self.kind
    }

    pub fn stream(&self) -> &dyn WasiStream {
        &*self.stream
    }

    pub fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> Result<u64, Error> {
        if !self.kind.access_mode().contains(FileAccessMode::READ) {
            return Err(Error::badf().context(format!("{} is not readable", self.kind.name())));
        }
        self.stream.read_vectored(bufs)
    }

    pub fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<u64, Error> {
        if !self.kind.access_mode().contains(FileAccessMode::WRITE) {
            return Err(Error::badf().context(format!("{} is not writable", self.kind.name())));
        }
        self.stream.write_vectored(bufs)
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.stream.flush()
    }

    pub fn filestat(&self) -> Filestat {
        Filestat::synthetic(self.stream.filetype())
    }
}

pub struct Stdin(io::Stdin);

pub fn stdin() -> Stdin {
    Stdin(io::stdin())
}

impl WasiStream for Stdin {
    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> Result<u64, Error> {
        let n = self.0.lock().read_vectored(bufs)?;
        Ok(u64::try_from(n)?)
    }
    fn isatty(&self) -> bool {
        self.0.is_terminal()
    }
}

macro_rules! wasi_output_stream_impl {
    ($ty:ty, $ident:ident) => {
        impl WasiStream for $ty {
            fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<u64, Error> {
                let mut $ident = self.0.lock();
                let n = $ident.write_vectored(bufs)?;
                // Guest writes land on the host immediately, as a raw fd
                // write would.
                $ident.flush()?;
                Ok(u64::try_from(n)?)
            }
            fn flush(&mut self) -> Result<(), Error> {
                self.0.lock().flush()?;
                Ok(())
            }
            fn isatty(&self) -> bool {
                self.0.is_terminal()
            }
        }
    };
}

pub struct Stdout(io::Stdout);

pub fn stdout() -> Stdout {
    Stdout(io::stdout())
}
wasi_output_stream_impl!(Stdout, stdout);

pub struct Stderr(io::Stderr);

pub fn stderr() -> Stderr {
    Stderr(io::stderr())
}
wasi_output_stream_impl!(Stderr, stderr);
