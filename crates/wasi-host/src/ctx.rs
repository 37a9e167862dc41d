use crate::clocks::{ClockId, ClockReading, WasiClocks};
use crate::dir::{DirEntry, PreopenedDir};
use crate::file::{FileAccessMode, FileEntry};
use crate::path::{self, ResolvedPath};
use crate::pipe::{ReadPipe, WritePipe};
use crate::stdio::{self, StdioEntry, StdioKind, WasiStream};
use crate::string_array::{StringArray, StringArrayError};
use crate::table::{Descriptor, DescriptorTable};
use crate::{Error, random};
use cap_rand::RngCore;
use cap_std::ambient_authority;
use std::mem;
use std::path::Path;
use tracing::debug;

/// Everything one instance can reach: argv, environment, clocks, randomness,
/// its descriptor table and the preopened directories that bound it.
///
/// A context is never shared. Host calls take it by `&mut`.
pub struct WasiCtx {
    pub(crate) args: StringArray,
    pub(crate) env: StringArray,
    pub(crate) random: Box<dyn RngCore + Send + Sync>,
    pub(crate) clocks: WasiClocks,
    pub(crate) table: DescriptorTable,
    pub(crate) preopens: Vec<PreopenedDir>,
}

impl WasiCtx {
    pub fn new(random: Box<dyn RngCore + Send + Sync>, clocks: WasiClocks) -> Self {
        let mut s = WasiCtx {
            args: StringArray::new(),
            env: StringArray::new(),
            random,
            clocks,
            table: DescriptorTable::new(),
            preopens: Vec::new(),
        };
        s.set_stdin(Box::new(ReadPipe::new(std::io::empty())));
        s.set_stdout(Box::new(WritePipe::new(std::io::sink())));
        s.set_stderr(Box::new(WritePipe::new(std::io::sink())));
        s
    }

    pub fn builder() -> WasiCtxBuilder {
        WasiCtxBuilder::new()
    }

    pub fn args(&self) -> &StringArray {
        &self.args
    }

    pub fn env(&self) -> &StringArray {
        &self.env
    }

    pub fn clocks(&self) -> &WasiClocks {
        &self.clocks
    }

    pub fn table(&self) -> &DescriptorTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut DescriptorTable {
        &mut self.table
    }

    pub fn preopens(&self) -> &[PreopenedDir] {
        &self.preopens
    }

    pub fn push_arg(&mut self, arg: &str) -> Result<(), StringArrayError> {
        self.args.push(arg.to_owned())
    }

    pub fn push_env(&mut self, var: &str, value: &str) -> Result<(), StringArrayError> {
        self.env.push(format!("{var}={value}"))
    }

    pub fn set_stdin(&mut self, s: Box<dyn WasiStream>) {
        self.insert_stdio(StdioKind::Stdin, s);
    }

    pub fn set_stdout(&mut self, s: Box<dyn WasiStream>) {
        self.insert_stdio(StdioKind::Stdout, s);
    }

    pub fn set_stderr(&mut self, s: Box<dyn WasiStream>) {
        self.insert_stdio(StdioKind::Stderr, s);
    }

    fn insert_stdio(&mut self, kind: StdioKind, s: Box<dyn WasiStream>) {
        // Stdio ids are always within the table's bound.
        let _ = self
            .table
            .insert_at(kind.fd(), Descriptor::Stdio(StdioEntry::new(kind, s)));
    }

    /// Install an already-open host file at the lowest free id.
    pub fn push_file(
        &mut self,
        file: cap_std::fs::File,
        access_mode: FileAccessMode,
    ) -> Result<u32, Error> {
        self.table
            .allocate(Descriptor::File(FileEntry::new(file, access_mode)))
    }

    /// Register `host_path` as a sandbox root visible to the guest as
    /// `guest_path`, and give its root a descriptor.
    pub fn push_preopened_dir(
        &mut self,
        host_path: impl AsRef<Path>,
        guest_path: impl AsRef<Path>,
    ) -> Result<u32, Error> {
        let host_path = host_path.as_ref();
        let guest_path = guest_path.as_ref();
        let root = cap_std::fs::Dir::open_ambient_dir(host_path, ambient_authority())
            .map_err(|e| Error::from(e).context(format!("opening {}", host_path.display())))?;
        let handle = root.try_clone()?;
        let index = self.preopens.len();
        let fd = self.table.allocate(Descriptor::Directory(DirEntry::preopen_root(
            index,
            guest_path.to_owned(),
            handle,
        )))?;
        self.preopens.push(PreopenedDir::new(
            fd,
            guest_path.to_owned(),
            host_path.to_owned(),
            root,
        ));
        debug!(fd, guest = %guest_path.display(), host = %host_path.display(), "preopened directory");
        Ok(fd)
    }

    /// Resolve a guest path relative to the directory descriptor `fd`.
    pub fn resolve(&self, fd: u32, path: &str) -> Result<ResolvedPath<'_>, Error> {
        path::resolve(&self.table, &self.preopens, fd, path)
    }

    pub fn get_clock(&self, id: ClockId) -> Result<ClockReading, Error> {
        self.clocks.get_clock(id)
    }

    /// Exactly `len` bytes from the context's random source.
    pub fn fill_random(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        random::fill_random(&mut *self.random, len)
    }
}

pub struct WasiCtxBuilder {
    ctx: WasiCtx,
}

impl WasiCtxBuilder {
    pub fn new() -> Self {
        WasiCtxBuilder {
            ctx: WasiCtx::new(random::random_ctx(), WasiClocks::default()),
        }
    }
    pub fn env(&mut self, var: &str, value: &str) -> Result<&mut Self, StringArrayError> {
        self.ctx.push_env(var, value)?;
        Ok(self)
    }
    pub fn envs(&mut self, env: &[(String, String)]) -> Result<&mut Self, StringArrayError> {
        for (k, v) in env {
            self.ctx.push_env(k, v)?;
        }
        Ok(self)
    }
    pub fn inherit_env(&mut self) -> Result<&mut Self, StringArrayError> {
        for (key, value) in std::env::vars() {
            self.ctx.push_env(&key, &value)?;
        }
        Ok(self)
    }
    pub fn arg(&mut self, arg: &str) -> Result<&mut Self, StringArrayError> {
        self.ctx.push_arg(arg)?;
        Ok(self)
    }
    pub fn args(&mut self, arg: &[String]) -> Result<&mut Self, StringArrayError> {
        for a in arg {
            self.ctx.push_arg(a)?;
        }
        Ok(self)
    }
    pub fn inherit_args(&mut self) -> Result<&mut Self, StringArrayError> {
        for arg in std::env::args() {
            self.ctx.push_arg(&arg)?;
        }
        Ok(self)
    }
    pub fn stdin(&mut self, s: Box<dyn WasiStream>) -> &mut Self {
        self.ctx.set_stdin(s);
        self
    }
    pub fn stdout(&mut self, s: Box<dyn WasiStream>) -> &mut Self {
        self.ctx.set_stdout(s);
        self
    }
    pub fn stderr(&mut self, s: Box<dyn WasiStream>) -> &mut Self {
        self.ctx.set_stderr(s);
        self
    }
    pub fn inherit_stdin(&mut self) -> &mut Self {
        self.stdin(Box::new(stdio::stdin()))
    }
    pub fn inherit_stdout(&mut self) -> &mut Self {
        self.stdout(Box::new(stdio::stdout()))
    }
    pub fn inherit_stderr(&mut self) -> &mut Self {
        self.stderr(Box::new(stdio::stderr()))
    }
    pub fn inherit_stdio(&mut self) -> &mut Self {
        self.inherit_stdin().inherit_stdout().inherit_stderr()
    }
    /// Preopens are numbered from 3 in the order they are added.
    pub fn preopened_dir(
        &mut self,
        host_path: impl AsRef<Path>,
        guest_path: impl AsRef<Path>,
    ) -> Result<&mut Self, Error> {
        self.ctx.push_preopened_dir(host_path, guest_path)?;
        Ok(self)
    }
    /// Replace the entropy source with a seeded generator, so runs replay.
    #[cfg(any(test, feature = "deterministic-random"))]
    pub fn deterministic_random(&mut self, seed: u64) -> &mut Self {
        self.ctx.random = random::deterministic_ctx(seed);
        self
    }
    pub fn build(&mut self) -> WasiCtx {
        let WasiCtxBuilder { ctx } = mem::replace(self, Self::new());
        debug!(
            args = ctx.args.number_elements(),
            env = ctx.env.number_elements(),
            preopens = ctx.preopens.len(),
            "built wasi context"
        );
        ctx
    }
}

impl Default for WasiCtxBuilder {
    fn default() -> Self {
        Self::new()
    }
}
