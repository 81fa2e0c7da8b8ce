//! # fileset-cas
//!
//! Content-addressed blob storage for fileset.
//!
//! Blobs are immutable regular files held in one process-owned directory and
//! named `<md5-hex>.<mtime-millis>`, so two source files with identical bytes
//! and identical modification time share a single stored blob. The store
//! keeps a reference count and an open read handle per live blob; the handle
//! is used to recreate a blob that was deleted out-of-band.
//!
//! ## Directory Layout
//!
//! ```text
//! <store root>/
//! ├── d41d8cd98f00b204e9800998ecf8427e.1714000000000
//! ├── 9e107d9d372bb6826bd81d3542a419d6.1714000012345
//! └── .tmp-*            # in-flight copies, renamed into place atomically
//! ```

mod fsutil;
mod hash;
mod store;

pub use fsutil::{hard_link_or_copy, modified_millis, set_modified_millis, set_readonly};
pub use hash::{hash_bytes, hash_file, hash_reader};
pub use store::{BlobId, BlobRef, BlobStore};

use std::io;

use thiserror::Error;

/// Errors that can occur during blob store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob not found: {id}")]
    NotFound { id: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
