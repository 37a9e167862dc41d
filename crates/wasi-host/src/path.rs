//! Sandboxed path resolution.
//!
//! A guest path is always interpreted relative to a directory descriptor.
//! Every directory descriptor descends from one [`PreopenedDir`], and the
//! resolver confines the result to that preopen's root: the guest path is
//! joined onto the directory's root-relative location and canonicalised
//! lexically, and any attempt to climb above the root is refused with
//! `NotCapable`.
//!
//! Lexical canonicalisation cannot see symlinks. Those are handled by
//! performing every host operation through the preopen root's
//! `cap_std::fs::Dir`, which refuses to follow a link out of the root.

use crate::dir::{PreopenedDir, TableDirExt};
use crate::table::DescriptorTable;
use crate::{Error, ErrorExt};
use std::path::{Path, PathBuf};
use tracing::trace;

/// A guest path resolved against a preopened root.
#[derive(Debug)]
pub struct ResolvedPath<'a> {
    preopen: &'a PreopenedDir,
    preopen_index: usize,
    relative: PathBuf,
    must_be_dir: bool,
}

impl<'a> ResolvedPath<'a> {
    /// The capability every host operation on this path goes through.
    pub fn root(&self) -> &'a cap_std::fs::Dir {
        self.preopen.root()
    }

    pub fn preopen(&self) -> &'a PreopenedDir {
        self.preopen
    }

    /// Index of the owning preopen in the context.
    pub fn preopen_index(&self) -> usize {
        self.preopen_index
    }

    /// The canonical path below the root. Empty for the root itself.
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Whether the guest path ended in `/`.
    pub fn must_be_dir(&self) -> bool {
        self.must_be_dir
    }

    /// The path to hand to the root `Dir`: `.` for the root itself.
    pub fn path(&self) -> &Path {
        if self.relative.as_os_str().is_empty() {
            Path::new(".")
        } else {
            &self.relative
        }
    }

    /// Like [`path`](Self::path), but with a trailing `.` component when the
    /// guest asked for a directory, so the host lookup fails on anything else.
    pub fn lookup_path(&self) -> PathBuf {
        if self.must_be_dir && !self.relative.as_os_str().is_empty() {
            self.relative.join(".")
        } else {
            self.path().to_path_buf()
        }
    }

    /// Where this path lives on the host, for diagnostics.
    pub fn host_path(&self) -> PathBuf {
        self.preopen.host_path().join(&self.relative)
    }
}

/// Resolve `path` relative to the directory descriptor `fd`.
pub fn resolve<'a>(
    table: &DescriptorTable,
    preopens: &'a [PreopenedDir],
    fd: u32,
    path: &str,
) -> Result<ResolvedPath<'a>, Error> {
    let dir = table.get_dir(fd)?;
    let preopen = preopens
        .get(dir.preopen())
        .ok_or_else(|| Error::badf().context(format!("descriptor {fd} has no preopen")))?;
    let (relative, must_be_dir) = normalize(dir.relative(), path)?;
    trace!(fd, path, resolved = %relative.display(), "resolved path");
    Ok(ResolvedPath {
        preopen,
        preopen_index: dir.preopen(),
        relative,
        must_be_dir,
    })
}

/// Join `path` onto the root-relative `base` and canonicalise the result.
///
/// Returns the canonical root-relative path and whether `path` had a
/// trailing slash.
pub fn normalize(base: &Path, path: &str) -> Result<(PathBuf, bool), Error> {
    if path.is_empty() {
        return Err(Error::not_found().context("empty path"));
    }
    if path.contains('\0') {
        return Err(Error::illegal_byte_sequence().context("path contains NUL"));
    }
    if path.starts_with('/') {
        return Err(Error::not_capable().context(format!("absolute path {path:?}")));
    }

    let mut segments: Vec<&str> = Vec::new();
    for component in base.components() {
        match component {
            std::path::Component::Normal(name) => segments.push(
                name.to_str()
                    .ok_or_else(|| Error::illegal_byte_sequence().context("base path"))?,
            ),
            std::path::Component::CurDir => {}
            _ => return Err(Error::not_capable().context("base path is not root-relative")),
        }
    }

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(
                        Error::not_capable().context(format!("path {path:?} escapes its root"))
                    );
                }
            }
            name => segments.push(name),
        }
    }

    let must_be_dir = path.ends_with('/');
    Ok((segments.iter().collect(), must_be_dir))
}
