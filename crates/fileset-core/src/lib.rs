//! # fileset-core
//!
//! Immutable filesets: logical snapshots of a directory tree whose file
//! contents live in a content-addressed blob store.
//!
//! A [`Fileset`] maps forward-slash logical paths to entries; every update
//! operation (ingest, remove, rename, filter, merge) returns a new fileset
//! and leaves the input untouched. Entries reference blobs through counted
//! guards, so derived filesets share storage and a blob's file is unlinked
//! as soon as no fileset references it.
//!
//! ## Example
//!
//! ```ignore
//! use fileset_core::{AddOptions, Environment};
//!
//! let env = Environment::new()?;
//! let sources = env.new_fileset().add_directory("assets".as_ref(), &AddOptions::new())?;
//! let committed = sources.commit("build/assets".as_ref())?;
//! ```

mod commit;
mod diff;
mod entry;
mod env;
mod fileset;
mod ingest;
mod manifest;
mod merger;
mod meta;
mod scratch;

pub use diff::{added, changed, diff, diff_with, removed, Diff, DiffKey};
pub use entry::Entry;
pub use env::Environment;
pub use fileset::{AddOptions, Fileset};
pub use ingest::default_thread_count;
pub use manifest::{ManifestCache, MANIFEST_VERSION};
pub use merger::{Merger, MergerSet};
pub use meta::{merge_meta, Meta, MetaValue};
pub use scratch::ScratchAllocator;

use std::io;

use thiserror::Error;

/// Errors that can occur during fileset operations
#[derive(Error, Debug)]
pub enum FilesetError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob store error: {0}")]
    Store(#[from] fileset_cas::StoreError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("path already exists: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, FilesetError>;
