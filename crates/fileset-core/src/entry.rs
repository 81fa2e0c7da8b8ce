//! One row of a fileset tree.

use std::fs::File;
use std::path::PathBuf;

use fileset_cas::{BlobId, BlobRef};

use crate::meta::Meta;
use crate::Result;

/// A fileset tree row: a counted reference to a stored blob plus the entry's
/// metadata. Cloning shares the blob reference, so entries move freely
/// between derived filesets without touching the store.
#[derive(Debug, Clone)]
pub struct Entry {
    blob: BlobRef,
    meta: Meta,
}

impl Entry {
    pub(crate) fn new(blob: BlobRef, meta: Meta) -> Self {
        Self { blob, meta }
    }

    pub fn blob_id(&self) -> &BlobId {
        self.blob.id()
    }

    /// Content hash, 32 lowercase hex characters.
    pub fn hash(&self) -> &str {
        self.blob.hash()
    }

    /// Captured last-modified time in milliseconds since the Unix epoch.
    pub fn time(&self) -> u64 {
        self.blob.time()
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Same blob, different metadata.
    pub(crate) fn with_meta(&self, meta: Meta) -> Entry {
        Entry {
            blob: self.blob.clone(),
            meta,
        }
    }

    /// Path to a readable on-disk file with this entry's bytes (with
    /// deletion recovery).
    pub fn path(&self) -> Result<PathBuf> {
        Ok(self.blob.path()?)
    }

    /// Open this entry's bytes for reading (with deletion recovery).
    pub fn open(&self) -> Result<File> {
        Ok(self.blob.open()?)
    }
}
