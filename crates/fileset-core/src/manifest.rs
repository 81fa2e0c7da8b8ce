//! Durable manifest seed cache.
//!
//! A fileset can be persisted as a properties-style `path=blob_id` manifest
//! under `<cache>/fileset/v<N>/<key>/manifest.properties`, with a hard link
//! of each referenced blob beside it. A later process seeds an equivalent
//! fileset from the cache without re-reading the original source tree. Any
//! inconsistency (absent manifest, malformed line, missing or stale blob)
//! is a cache miss, never an error.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use fileset_cas::{hard_link_or_copy, set_modified_millis, BlobId};

use crate::entry::Entry;
use crate::env::Environment;
use crate::fileset::Fileset;
use crate::meta::Meta;
use crate::{FilesetError, Result};

/// Manifest layout version.
pub const MANIFEST_VERSION: u32 = 1;

/// Cache of saved filesets keyed by an opaque caller-chosen string.
#[derive(Debug, Clone)]
pub struct ManifestCache {
    root: PathBuf,
}

impl ManifestCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root
            .join("fileset")
            .join(format!("v{}", MANIFEST_VERSION))
            .join(key)
    }

    /// Persist a fileset under `key`: the manifest plus a hard link of each
    /// referenced blob. Blob mtimes are restamped so a copy fallback (cache
    /// on another filesystem) still reproduces the captured timestamps.
    pub fn save(&self, key: &str, fileset: &Fileset) -> Result<()> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir)?;

        for (_, entry) in fileset.iter() {
            let blob_dest = dir.join(entry.blob_id().to_string());
            if !blob_dest.exists() {
                hard_link_or_copy(&entry.path()?, &blob_dest)?;
                set_modified_millis(&blob_dest, entry.time())?;
            }
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".manifest-")
            .tempfile_in(&dir)?;
        for (path, entry) in fileset.iter() {
            writeln!(tmp, "{}={}", path, entry.blob_id())?;
        }
        tmp.persist(dir.join("manifest.properties"))
            .map_err(|e| FilesetError::Io(e.error))?;
        Ok(())
    }

    /// Seed a fileset from `key` by hard-link-ingesting the cached blobs.
    /// Returns `None` on any cache miss.
    pub fn load(&self, key: &str, env: &Environment) -> Result<Option<Fileset>> {
        let dir = self.key_dir(key);
        let manifest = dir.join("manifest.properties");
        if !manifest.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&manifest)?);
        let mut tree = BTreeMap::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((path, id_text)) = line.split_once('=') else {
                debug!(key = %key, "malformed manifest line, treating as cache miss");
                return Ok(None);
            };
            let Some(id) = BlobId::parse(id_text) else {
                debug!(key = %key, "unparseable blob id in manifest, treating as cache miss");
                return Ok(None);
            };
            let blob_file = dir.join(id_text);
            if !blob_file.exists() {
                debug!(key = %key, id = %id, "cached blob missing, treating as cache miss");
                return Ok(None);
            }
            let blob = env.store().add_linked(&blob_file)?;
            if blob.id() != &id {
                debug!(key = %key, id = %id, "cached blob diverged from manifest, treating as cache miss");
                return Ok(None);
            }
            tree.insert(path.to_string(), Entry::new(blob, Meta::new()));
        }
        Ok(Some(Fileset::with_tree(env, tree)))
    }
}
