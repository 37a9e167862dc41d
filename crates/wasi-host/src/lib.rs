//! Host-side WASI snapshot-preview1 for POSIX hosts.
//!
//! A [`WasiCtx`] owns everything one guest instance can reach: its argv and
//! environment, a descriptor table, the preopened directories that bound its
//! filesystem view, clocks and a random source. The host calls themselves
//! live on the [`preview1::WasiSnapshotPreview1`] trait, implemented for
//! `WasiCtx`.
//!
//! All filesystem access goes through `cap_std` handles rooted at a
//! preopen, so a guest can never name a host path outside the directories it
//! was given.

pub mod clocks;
mod ctx;
pub mod dir;
mod error;
mod exit;
pub mod file;
pub mod path;
pub mod pipe;
pub mod preview1;
pub mod random;
pub mod stdio;
mod string_array;
pub mod table;

pub use cap_rand::RngCore;
pub use clocks::{SystemTimeSpec, WasiClocks};
pub use ctx::{WasiCtx, WasiCtxBuilder};
pub use error::{Errno, Error, ErrorExt};
pub use exit::{I32Exit, exit_status};
pub use string_array::{StringArray, StringArrayError};
pub use table::{Descriptor, DescriptorTable, MAX_DESCRIPTORS, Table};
