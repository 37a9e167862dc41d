//! Virtual pipes.
//!
//! These types provide easy implementations of `WasiStream` that mimic much of the behavior of
//! Unix pipes. These are particularly helpful for redirecting WASI stdio handles to destinations
//! other than OS files.
//!
//! Some convenience constructors are included for common backing types like `Vec<u8>` and
//! `String`, but the virtual pipes can be instantiated with any `Read` or `Write` type.
use crate::Error;
use crate::stdio::WasiStream;
use std::any::Any;
use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::sync::{Arc, RwLock};

/// A virtual pipe read end.
///
/// A variety of `From` impls are provided so that common pipe types are easy to create. For
/// example:
///
/// ```
/// use wasi_host::WasiCtxBuilder;
/// use wasi_host::pipe::ReadPipe;
/// let stdin = ReadPipe::from("hello from stdin!");
/// WasiCtxBuilder::new().stdin(Box::new(stdin));
/// ```
#[derive(Debug)]
pub struct ReadPipe<R: Read> {
    reader: Arc<RwLock<R>>,
}

impl<R: Read> Clone for ReadPipe<R> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
        }
    }
}

impl<R: Read + Any + Send + Sync> ReadPipe<R> {
    /// Create a new pipe from a `Read` type.
    ///
    /// All stream read operations delegate to reading from this underlying reader.
    pub fn new(r: R) -> Self {
        Self::from_shared(Arc::new(RwLock::new(r)))
    }

    /// Create a new pipe from a shareable `Read` type.
    pub fn from_shared(reader: Arc<RwLock<R>>) -> Self {
        Self { reader }
    }

    /// Try to convert this `ReadPipe<R>` back to the underlying `R` type.
    ///
    /// This will fail with `Err(self)` if multiple references to the underlying `R` exist.
    pub fn try_into_inner(mut self) -> Result<R, Self> {
        match Arc::try_unwrap(self.reader) {
            Ok(rc) => Ok(RwLock::into_inner(rc).unwrap_or_else(|e| e.into_inner())),
            Err(reader) => {
                self.reader = reader;
                Err(self)
            }
        }
    }
}

impl From<Vec<u8>> for ReadPipe<io::Cursor<Vec<u8>>> {
    fn from(r: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(r))
    }
}

impl From<&[u8]> for ReadPipe<io::Cursor<Vec<u8>>> {
    fn from(r: &[u8]) -> Self {
        Self::from(r.to_vec())
    }
}

impl From<String> for ReadPipe<io::Cursor<String>> {
    fn from(r: String) -> Self {
        Self::new(io::Cursor::new(r))
    }
}

impl From<&str> for ReadPipe<io::Cursor<String>> {
    fn from(r: &str) -> Self {
        Self::from(r.to_string())
    }
}

impl<R: Read + Any + Send + Sync> WasiStream for ReadPipe<R> {
    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> Result<u64, Error> {
        let mut reader = self
            .reader
            .write()
            .map_err(|_| Error::trap(anyhow::Error::msg("pipe reader poisoned")))?;
        let n = reader.read_vectored(bufs)?;
        Ok(u64::try_from(n)?)
    }
}

/// A virtual pipe write end.
///
/// ```
/// use wasi_host::WasiCtxBuilder;
/// use wasi_host::pipe::WritePipe;
/// let stdout = WritePipe::new_in_memory();
/// WasiCtxBuilder::new().stdout(Box::new(stdout.clone()));
/// // use ctx in an instance, then make sure it is dropped:
/// let contents: Vec<u8> = stdout.try_into_inner().expect("sole remaining reference to WritePipe").into_inner();
/// println!("contents of stdout: {:?}", contents);
/// ```
#[derive(Debug)]
pub struct WritePipe<W: Write> {
    writer: Arc<RwLock<W>>,
}

impl<W: Write> Clone for WritePipe<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl<W: Write + Any + Send + Sync> WritePipe<W> {
    /// Create a new pipe from a `Write` type.
    ///
    /// All stream write operations delegate to writing to this underlying writer.
    pub fn new(w: W) -> Self {
        Self::from_shared(Arc::new(RwLock::new(w)))
    }

    /// Create a new pipe from a shareable `Write` type.
    pub fn from_shared(writer: Arc<RwLock<W>>) -> Self {
        Self { writer }
    }

    /// Try to convert this `WritePipe<W>` back to the underlying `W` type.
    ///
    /// This will fail with `Err(self)` if multiple references to the underlying `W` exist.
    pub fn try_into_inner(mut self) -> Result<W, Self> {
        match Arc::try_unwrap(self.writer) {
            Ok(rc) => Ok(RwLock::into_inner(rc).unwrap_or_else(|e| e.into_inner())),
            Err(writer) => {
                self.writer = writer;
                Err(self)
            }
        }
    }
}

impl WritePipe<io::Cursor<Vec<u8>>> {
    /// Create a new writable virtual pipe backed by a `Vec<u8>` buffer.
    pub fn new_in_memory() -> Self {
        Self::new(io::Cursor::new(vec![]))
    }

    /// A copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        match self.writer.read() {
            Ok(w) => w.get_ref().clone(),
            Err(e) => e.into_inner().get_ref().clone(),
        }
    }
}

impl<W: Write + Any + Send + Sync> WasiStream for WritePipe<W> {
    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> Result<u64, Error> {
        let mut writer = self
            .writer
            .write()
            .map_err(|_| Error::trap(anyhow::Error::msg("pipe writer poisoned")))?;
        let n = writer.write_vectored(bufs)?;
        Ok(u64::try_from(n)?)
    }
    fn flush(&mut self) -> Result<(), Error> {
        let mut writer = self
            .writer
            .write()
            .map_err(|_| Error::trap(anyhow::Error::msg("pipe writer poisoned")))?;
        writer.flush()?;
        Ok(())
    }
}
