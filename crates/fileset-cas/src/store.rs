//! The reference-counted blob store.
//!
//! `BlobStore` owns one directory of immutable blob files. Interning a source
//! file either bumps the refcount of an existing blob or copies the bytes in
//! via a temp file + atomic rename, marks the result read-only, and opens a
//! read handle that is held for as long as the blob is referenced. Handles
//! returned to callers are counted guards; dropping the last guard for a blob
//! unlinks its file.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{fsutil, hash, Result, StoreError};

/// Identity of a stored blob: `<32-hex-md5>.<mtime-millis>`.
///
/// Content alone does not identify a blob; two files with equal bytes but
/// different modification times intern as distinct blobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId {
    hash: String,
    time: u64,
}

impl BlobId {
    pub fn new(hash: impl Into<String>, time: u64) -> Self {
        Self {
            hash: hash.into(),
            time,
        }
    }

    /// Content hash, 32 lowercase hex characters.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Captured last-modified time in milliseconds since the Unix epoch.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Parse a blob file name back into an id.
    pub fn parse(name: &str) -> Option<BlobId> {
        let (hash, time) = name.split_once('.')?;
        if hash.len() != 32 || !hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        if time.is_empty() || !time.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(BlobId {
            hash: hash.to_string(),
            time: time.parse().ok()?,
        })
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.hash, self.time)
    }
}

/// One live blob: its reference count and the read handle held open so the
/// file can be rebuilt after an out-of-band deletion.
struct BlobState {
    refs: usize,
    handle: Arc<Mutex<File>>,
}

struct StoreInner {
    root: PathBuf,
    blobs: Mutex<HashMap<BlobId, BlobState>>,
}

impl StoreInner {
    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Stream source bytes into a temp file beside the destination, stamp the
    /// captured mtime, then rename into place and mark read-only. The temp
    /// file lives in the store directory so the rename stays on one
    /// filesystem and is atomic.
    fn copy_into_place(&self, source: &Path, dest: &Path, time: u64) -> Result<()> {
        let mut reader = File::open(source)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.root)?;
        io::copy(&mut reader, tmp.as_file_mut())?;
        fsutil::set_modified_millis(tmp.path(), time)?;
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        fsutil::set_readonly(dest)?;
        Ok(())
    }

    /// Path to a readable file for `id`, recreating the blob from the held
    /// read handle if the file was deleted out-of-band.
    fn readable_path(&self, id: &BlobId) -> Result<PathBuf> {
        let path = self.blob_path(id);
        if path.exists() {
            return Ok(path);
        }

        let handle = {
            let blobs = self.blobs.lock().unwrap();
            match blobs.get(id) {
                Some(state) => Arc::clone(&state.handle),
                None => {
                    return Err(StoreError::NotFound { id: id.to_string() });
                }
            }
        };

        // Rewind and copy out under the per-blob lock; a concurrent recovery
        // of the same blob produces identical bytes and the rename replaces.
        let mut file = handle.lock().unwrap();
        file.seek(SeekFrom::Start(0))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.root)?;
        io::copy(&mut *file, tmp.as_file_mut())?;
        fsutil::set_modified_millis(tmp.path(), id.time())?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        fsutil::set_readonly(&path)?;
        debug!(id = %id, "blob recreated from held read handle");
        Ok(path)
    }

    fn release(&self, id: &BlobId) {
        let Ok(mut blobs) = self.blobs.lock() else {
            return;
        };
        let Some(state) = blobs.get_mut(id) else {
            return;
        };
        state.refs -= 1;
        if state.refs == 0 {
            blobs.remove(id);
            if let Err(e) = fs::remove_file(self.blob_path(id)) {
                debug!(id = %id, error = %e, "blob unlink failed");
            }
        }
    }
}

enum IngestMode {
    Copy,
    Link,
}

/// Content-addressed blob store over one process-owned directory.
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<StoreInner>,
}

impl BlobStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                blobs: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Intern a source file, copying its bytes into the store.
    ///
    /// If a blob with the same content hash and modification time already
    /// exists, its refcount is bumped and no bytes move. The source file is
    /// never modified or moved.
    pub fn add(&self, source: &Path) -> Result<BlobRef> {
        self.ingest(source, IngestMode::Copy)
    }

    /// Intern a source file by hard-linking it into the store.
    ///
    /// Only for sources known to be immutable (a seeded cache directory): the
    /// stored blob shares the source's inode, so the read-only marking shows
    /// through. Falls back to a copy when linking is not possible. The
    /// external contract is identical to [`BlobStore::add`].
    pub fn add_linked(&self, source: &Path) -> Result<BlobRef> {
        self.ingest(source, IngestMode::Link)
    }

    fn ingest(&self, source: &Path, mode: IngestMode) -> Result<BlobRef> {
        let hash = hash::hash_file(source)?;
        let time = fsutil::modified_millis(source)?;
        let id = BlobId::new(hash, time);

        // Existence check, file creation, and table insert are serialized so
        // exactly one creation wins per id; losers take a reference to the
        // winner's blob.
        let mut blobs = self.inner.blobs.lock().unwrap();
        if let Some(state) = blobs.get_mut(&id) {
            state.refs += 1;
            return Ok(self.make_ref(id));
        }

        let path = self.inner.blob_path(&id);
        match mode {
            IngestMode::Copy => self.inner.copy_into_place(source, &path, time)?,
            IngestMode::Link => {
                fsutil::hard_link_or_copy(source, &path)?;
                fsutil::set_modified_millis(&path, time)?;
                fsutil::set_readonly(&path)?;
            }
        }
        let handle = File::open(&path)?;
        blobs.insert(
            id.clone(),
            BlobState {
                refs: 1,
                handle: Arc::new(Mutex::new(handle)),
            },
        );
        debug!(id = %id, source = %source.display(), "blob interned");
        Ok(self.make_ref(id))
    }

    fn make_ref(&self, id: BlobId) -> BlobRef {
        BlobRef {
            guard: Arc::new(BlobGuard {
                store: Arc::clone(&self.inner),
                id,
            }),
        }
    }

    /// Path to a readable file for a live blob, recreating it from the held
    /// read handle if the file was deleted out-of-band.
    pub fn get(&self, id: &BlobId) -> Result<PathBuf> {
        self.inner.readable_path(id)
    }

    /// Whether a blob with this id is currently live.
    pub fn contains(&self, id: &BlobId) -> bool {
        self.inner.blobs.lock().unwrap().contains_key(id)
    }

    /// Current reference count of a blob, if live.
    pub fn refcount(&self, id: &BlobId) -> Option<usize> {
        self.inner.blobs.lock().unwrap().get(id).map(|s| s.refs)
    }

    /// Number of live blobs.
    pub fn len(&self) -> usize {
        self.inner.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStore")
            .field("root", &self.inner.root)
            .field("blobs", &self.len())
            .finish()
    }
}

struct BlobGuard {
    store: Arc<StoreInner>,
    id: BlobId,
}

impl Drop for BlobGuard {
    fn drop(&mut self) {
        self.store.release(&self.id);
    }
}

/// A shared, counted reference to a live blob.
///
/// Cloning is cheap and does not touch the store; the underlying refcount
/// drops only when every clone of this reference is gone.
#[derive(Clone)]
pub struct BlobRef {
    guard: Arc<BlobGuard>,
}

impl BlobRef {
    pub fn id(&self) -> &BlobId {
        &self.guard.id
    }

    pub fn hash(&self) -> &str {
        self.guard.id.hash()
    }

    pub fn time(&self) -> u64 {
        self.guard.id.time()
    }

    /// Path to a readable file with this blob's bytes (with deletion
    /// recovery).
    pub fn path(&self) -> Result<PathBuf> {
        self.guard.store.readable_path(&self.guard.id)
    }

    /// Open this blob's bytes for reading (with deletion recovery).
    pub fn open(&self) -> Result<File> {
        Ok(File::open(self.path()?)?)
    }
}

impl PartialEq for BlobRef {
    fn eq(&self, other: &Self) -> bool {
        self.guard.id == other.guard.id
    }
}

impl Eq for BlobRef {}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlobRef").field(&self.guard.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn write_stamped(dir: &Path, name: &str, content: &[u8], millis: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        fsutil::set_modified_millis(&path, millis).unwrap();
        path
    }

    #[test]
    fn test_add_and_read_back() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let src = write_stamped(temp.path(), "a.txt", b"this is a file", 1_714_000_000_000);

        let blob = store.add(&src).unwrap();
        assert_eq!(blob.hash().len(), 32);
        assert_eq!(blob.time(), 1_714_000_000_000);

        let mut content = String::new();
        blob.open().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "this is a file");

        // Source untouched
        assert_eq!(fs::read(&src).unwrap(), b"this is a file");
    }

    #[test]
    fn test_identical_content_and_time_share_a_blob() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let a = write_stamped(temp.path(), "a", b"same", 1_714_000_000_000);
        let b = write_stamped(temp.path(), "b", b"same", 1_714_000_000_000);

        let ra = store.add(&a).unwrap();
        let rb = store.add(&b).unwrap();

        assert_eq!(ra.id(), rb.id());
        assert_eq!(store.len(), 1);
        assert_eq!(store.refcount(ra.id()), Some(2));
    }

    #[test]
    fn test_different_time_means_different_blob() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let a = write_stamped(temp.path(), "a", b"same", 1_714_000_000_000);
        let b = write_stamped(temp.path(), "b", b"same", 1_714_000_000_001);

        let ra = store.add(&a).unwrap();
        let rb = store.add(&b).unwrap();

        assert_eq!(ra.hash(), rb.hash());
        assert_ne!(ra.id(), rb.id());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_release_unlinks_at_zero() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let src = write_stamped(temp.path(), "a", b"short lived", 1_714_000_000_000);

        let ra = store.add(&src).unwrap();
        let rb = store.add(&src).unwrap();
        let path = ra.path().unwrap();
        assert!(path.exists());

        drop(ra);
        assert!(path.exists(), "still referenced");
        assert_eq!(store.refcount(rb.id()), Some(1));

        drop(rb);
        assert!(!path.exists(), "unlinked at refcount zero");
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_clone_does_not_change_refcount() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let src = write_stamped(temp.path(), "a", b"cloned", 1_714_000_000_000);

        let blob = store.add(&src).unwrap();
        let clone = blob.clone();
        assert_eq!(store.refcount(blob.id()), Some(1));

        let path = blob.path().unwrap();
        drop(blob);
        assert!(path.exists(), "clone keeps the blob alive");
        drop(clone);
        assert!(!path.exists());
    }

    #[test]
    fn test_blob_file_is_readonly_with_source_mtime() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let src = write_stamped(temp.path(), "a", b"attrs", 1_714_000_012_345);

        let blob = store.add(&src).unwrap();
        let path = blob.path().unwrap();
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
        assert_eq!(fsutil::modified_millis(&path).unwrap(), 1_714_000_012_345);
    }

    #[test]
    fn test_deletion_recovery() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let src = write_stamped(temp.path(), "a", b"recover me", 1_714_000_012_345);

        let blob = store.add(&src).unwrap();
        let path = blob.path().unwrap();

        // Out-of-band deletion
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(false);
        fs::set_permissions(&path, perms).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(!path.exists());

        let recovered = blob.path().unwrap();
        assert_eq!(recovered, path);
        assert_eq!(fs::read(&recovered).unwrap(), b"recover me");
        assert_eq!(fsutil::modified_millis(&recovered).unwrap(), 1_714_000_012_345);
    }

    #[cfg(unix)]
    #[test]
    fn test_add_linked_shares_inode() {
        use std::os::unix::fs::MetadataExt;

        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let src = write_stamped(temp.path(), "a", b"linked", 1_714_000_000_000);

        let blob = store.add_linked(&src).unwrap();
        let path = blob.path().unwrap();
        assert_eq!(
            fs::metadata(&path).unwrap().ino(),
            fs::metadata(&src).unwrap().ino()
        );
        assert_eq!(fs::read(&path).unwrap(), b"linked");
    }

    #[test]
    fn test_concurrent_add_is_linearizable() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();
        let src = write_stamped(temp.path(), "a", b"contended", 1_714_000_000_000);

        let refs: Vec<BlobRef> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    let src = src.clone();
                    s.spawn(move || store.add(&src).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(store.len(), 1);
        assert_eq!(store.refcount(refs[0].id()), Some(8));
        for r in &refs[1..] {
            assert_eq!(r.id(), refs[0].id());
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = BlobId::new("d41d8cd98f00b204e9800998ecf8427e", 1_714_000_000_000);
        assert_eq!(BlobId::parse(&id.to_string()), Some(id));

        assert_eq!(BlobId::parse("not-a-blob"), None);
        assert_eq!(BlobId::parse("d41d8cd98f00b204e9800998ecf8427e"), None);
        assert_eq!(BlobId::parse("D41D8CD98F00B204E9800998ECF8427E.1"), None);
        assert_eq!(BlobId::parse("d41d8cd98f00b204e9800998ecf8427e.x"), None);
    }
}
