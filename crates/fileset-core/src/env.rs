//! Process context threaded through fileset operations.
//!
//! The blob store, the scratch allocator, and the committed-directory shadow
//! state are the only shared mutable pieces of this library. They live in an
//! explicit [`Environment`] value rather than hidden singletons; clones share
//! one underlying context.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use fileset_cas::BlobStore;
use fileset_config::Config;

use crate::entry::Entry;
use crate::fileset::Fileset;
use crate::scratch::ScratchAllocator;
use crate::Result;

/// Last committed state of one target directory: the committed tree and the
/// directory's last-modified millis at commit time.
type ShadowState = HashMap<PathBuf, (BTreeMap<String, Entry>, u64)>;

struct EnvInner {
    store: BlobStore,
    scratch: ScratchAllocator,
    shadow: Mutex<ShadowState>,
    threads: Option<usize>,
    /// Keeps a temp-backed store root alive for the environment's lifetime.
    _store_dir: Option<TempDir>,
}

/// Explicit context for fileset operations.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// Environment with temp-backed store and scratch roots, both reclaimed
    /// when the last clone drops.
    pub fn new() -> Result<Self> {
        Self::from_config(&Config::default())
    }

    /// Environment rooted per a loaded configuration. Unset roots fall back
    /// to per-process temporary directories.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (store, store_dir) = match &config.storage.store_root {
            Some(root) => (BlobStore::new(root)?, None),
            None => {
                let dir = tempfile::Builder::new().prefix("fileset-store-").tempdir()?;
                (BlobStore::new(dir.path())?, Some(dir))
            }
        };
        let scratch = match &config.scratch.root {
            Some(root) => ScratchAllocator::at(root)?,
            None => ScratchAllocator::new()?,
        };
        Ok(Self {
            inner: Arc::new(EnvInner {
                store,
                scratch,
                shadow: Mutex::new(HashMap::new()),
                threads: config.ingest.threads,
                _store_dir: store_dir,
            }),
        })
    }

    /// Environment rooted at explicit directories; neither is reclaimed.
    pub fn with_roots<P: AsRef<Path>, Q: AsRef<Path>>(
        store_root: P,
        scratch_root: Q,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(EnvInner {
                store: BlobStore::new(store_root)?,
                scratch: ScratchAllocator::at(scratch_root)?,
                shadow: Mutex::new(HashMap::new()),
                threads: None,
                _store_dir: None,
            }),
        })
    }

    pub fn store(&self) -> &BlobStore {
        &self.inner.store
    }

    /// A fresh empty fileset bound to this environment.
    pub fn new_fileset(&self) -> Fileset {
        Fileset::new(self)
    }

    /// A fresh unique scratch subdirectory.
    pub fn new_tmpdir(&self) -> Result<PathBuf> {
        self.inner.scratch.new_tmpdir()
    }

    pub(crate) fn threads(&self) -> Option<usize> {
        self.inner.threads
    }

    pub(crate) fn shadow_get(&self, target: &Path) -> Option<(BTreeMap<String, Entry>, u64)> {
        self.inner.shadow.lock().unwrap().get(target).cloned()
    }

    pub(crate) fn shadow_put(
        &self,
        target: PathBuf,
        tree: BTreeMap<String, Entry>,
        stamp: u64,
    ) {
        self.inner.shadow.lock().unwrap().insert(target, (tree, stamp));
    }
}
