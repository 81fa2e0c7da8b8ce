//! Bounded-parallel hashing and interning of walked files.
//!
//! Ingest is the only CPU-heavy stage of building a fileset, so walked files
//! are hashed across a small thread pool. The pool is capped to preserve
//! system resources for whatever build the host is running.

use std::io;
use std::path::PathBuf;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use fileset_cas::{BlobRef, BlobStore, StoreError};

use crate::Result;

/// Maximum threads for parallel ingest
pub const MAX_INGEST_THREADS: usize = 4;

/// Default thread count: min(cpu_cores / 2, MAX_INGEST_THREADS)
pub fn default_thread_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus / 2).clamp(1, MAX_INGEST_THREADS)
}

fn create_thread_pool(threads: Option<usize>) -> ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or_else(default_thread_count))
        .thread_name(|i| format!("fileset-ingest-{}", i))
        .build()
        .expect("Failed to create ingest thread pool")
}

/// Intern every `(logical path, source file)` pair into the store.
///
/// A file that vanished between walk and read is logged and skipped; other
/// I/O failures abort the ingest.
pub(crate) fn ingest_files(
    store: &BlobStore,
    files: &[(String, PathBuf)],
    threads: Option<usize>,
) -> Result<Vec<(String, BlobRef)>> {
    let pool = create_thread_pool(threads);
    let interned = pool.install(|| {
        files
            .par_iter()
            .map(|(rel, path)| match store.add(path) {
                Ok(blob) => Ok(Some((rel.clone(), blob))),
                Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %rel, "source file vanished before ingest, skipping");
                    Ok(None)
                }
                Err(e) => Err(e),
            })
            .collect::<std::result::Result<Vec<_>, StoreError>>()
    })?;
    Ok(interned.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_thread_count_is_bounded() {
        let n = default_thread_count();
        assert!(n >= 1);
        assert!(n <= MAX_INGEST_THREADS);
    }

    #[test]
    fn test_ingest_skips_vanished_files() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();

        let present = temp.path().join("present");
        std::fs::write(&present, b"here").unwrap();

        let files = vec![
            ("present".to_string(), present),
            ("gone".to_string(), temp.path().join("gone")),
        ];
        let interned = ingest_files(&store, &files, Some(2)).unwrap();

        assert_eq!(interned.len(), 1);
        assert_eq!(interned[0].0, "present");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let temp = TempDir::new().unwrap();
        let store = BlobStore::new(temp.path().join("store")).unwrap();

        let files: Vec<_> = (0..32)
            .map(|i| {
                let path = temp.path().join(format!("f{}", i));
                std::fs::write(&path, format!("content {}", i)).unwrap();
                (format!("f{}", i), path)
            })
            .collect();

        let parallel = ingest_files(&store, &files, Some(4)).unwrap();
        let sequential = ingest_files(&store, &files, Some(1)).unwrap();

        assert_eq!(parallel.len(), sequential.len());
        for ((pa, ba), (ps, bs)) in parallel.iter().zip(&sequential) {
            assert_eq!(pa, ps);
            assert_eq!(ba.id(), bs.id());
        }
    }
}
