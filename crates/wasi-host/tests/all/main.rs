use anyhow::Result;
use std::io::{IoSlice, IoSliceMut};
use tempfile::TempDir;
use wasi_host::file::{FdFlags, OFlags};
use wasi_host::preview1::WasiSnapshotPreview1;
use wasi_host::preview1::types::{Fd, Lookupflags, Rights};
use wasi_host::{Errno, Error, WasiCtx, WasiCtxBuilder};

mod exit;
mod fs;
mod renumber;
mod sandbox;

/// The id the workspace preopen lands at.
pub const PREOPEN: Fd = 3;

pub fn prepare_workspace(name: &str) -> Result<TempDir> {
    let prefix = format!("wasi_host_{name}_");
    let tempdir = tempfile::Builder::new().prefix(&prefix).tempdir()?;
    Ok(tempdir)
}

/// A context with `workspace` preopened as `.`, plus the builder for
/// anything the test wants to add first.
pub fn ctx_with(
    name: &str,
    configure: impl FnOnce(&mut WasiCtxBuilder),
) -> Result<(WasiCtx, TempDir)> {
    let workspace = prepare_workspace(name)?;
    let mut builder = WasiCtxBuilder::new();
    builder.arg(name)?;
    configure(&mut builder);
    builder.preopened_dir(workspace.path(), ".")?;
    Ok((builder.build(), workspace))
}

pub fn ctx(name: &str) -> Result<(WasiCtx, TempDir)> {
    ctx_with(name, |_| {})
}

/// The errno of a failed call, panicking on success or a trap.
#[track_caller]
pub fn errno<T: std::fmt::Debug>(result: Result<T, Error>) -> Errno {
    match result {
        Ok(v) => panic!("expected an errno, call succeeded with {v:?}"),
        Err(e) => e
            .downcast()
            .unwrap_or_else(|trap| panic!("expected an errno, got trap {trap:?}")),
    }
}

pub fn open(ctx: &mut WasiCtx, path: &str, oflags: OFlags, rights: Rights) -> Result<Fd, Error> {
    ctx.path_open(
        PREOPEN,
        Lookupflags::empty(),
        path,
        oflags,
        rights,
        Rights::empty(),
        FdFlags::empty(),
    )
}

pub fn write_all(ctx: &mut WasiCtx, fd: Fd, mut bytes: &[u8]) -> Result<(), Error> {
    while !bytes.is_empty() {
        let n = ctx.fd_write(fd, &[IoSlice::new(bytes)])?;
        bytes = &bytes[n as usize..];
    }
    Ok(())
}

pub fn read_to_end(ctx: &mut WasiCtx, fd: Fd) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = ctx.fd_read(fd, &mut [IoSliceMut::new(&mut buf)])? as usize;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}
