//! Per-operation scratch directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;

use crate::Result;

/// Atomic counter for unique scratch directory names
static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocates unique temporary subdirectories inside one scratch root.
///
/// A root created with [`ScratchAllocator::new`] is reclaimed when the value
/// drops; a caller-provided root ([`ScratchAllocator::at`]) is left alone.
pub struct ScratchAllocator {
    root: PathBuf,
    _owned: Option<TempDir>,
}

impl ScratchAllocator {
    /// Scratch root in a fresh temporary directory.
    pub fn new() -> Result<Self> {
        let owned = tempfile::Builder::new()
            .prefix("fileset-scratch-")
            .tempdir()?;
        Ok(Self {
            root: owned.path().to_path_buf(),
            _owned: Some(owned),
        })
    }

    /// Scratch root at a caller-provided directory, created if needed.
    pub fn at<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, _owned: None })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh unique subdirectory. `create_dir` fails on an
    /// existing path, so two allocations can never share a directory.
    pub fn new_tmpdir(&self) -> Result<PathBuf> {
        let name = format!(
            "op-{}-{}",
            process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let dir = self.root.join(name);
        fs::create_dir(&dir)?;
        Ok(dir)
    }
}
