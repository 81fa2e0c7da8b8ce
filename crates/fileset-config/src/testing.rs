//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Isolated blob store and scratch roots
//! - A source tree to ingest from and target directories to commit into
//!
//! # Usage
//!
//! ```ignore
//! use fileset_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.create_file("src/input.md", b"this is a file").unwrap();
//!     // env.store_root, env.scratch_root, env.cache_root are all isolated
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique roots
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated blob store root
    pub store_root: PathBuf,
    /// Isolated scratch root
    pub scratch_root: PathBuf,
    /// Isolated manifest cache root
    pub cache_root: PathBuf,
    /// Source tree for ingestion
    pub source_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let store_root = root.join("store");
        let scratch_root = root.join("scratch");
        let cache_root = root.join("cache");
        let source_root = root.join("source");

        std::fs::create_dir_all(&store_root)?;
        std::fs::create_dir_all(&scratch_root)?;
        std::fs::create_dir_all(&cache_root)?;
        std::fs::create_dir_all(&source_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            scratch_root,
            cache_root,
            source_root,
            test_id,
        })
    }

    /// Build a `Config` pointing at this environment's isolated roots.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.store_root = Some(self.store_root.clone());
        cfg.scratch.root = Some(self.scratch_root.clone());
        cfg.cache.root = Some(self.cache_root.clone());
        cfg
    }

    /// Create a file under the source tree
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.source_root.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a file under the source tree with a fixed mtime (millis)
    pub fn create_file_stamped(
        &self,
        relative_path: &str,
        content: &[u8],
        mtime_millis: u64,
    ) -> anyhow::Result<PathBuf> {
        let path = self.create_file(relative_path, content)?;
        let secs = (mtime_millis / 1000) as i64;
        let nanos = ((mtime_millis % 1000) * 1_000_000) as u32;
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(secs, nanos))?;
        Ok(path)
    }

    /// Create a directory under the source tree
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.source_root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Allocate a fresh directory beside the other roots (commit targets)
    pub fn new_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self._temp_dir.path().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.store_root.exists());
        assert!(env.scratch_root.exists());
        assert!(env.cache_root.exists());
        assert!(env.source_root.exists());
    }

    #[test]
    fn test_environment_roots_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.store_root, env2.store_root);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("dir1/file3.md", b"nested").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"nested");
    }

    #[test]
    fn test_create_file_stamped() {
        let env = TestEnvironment::new().unwrap();
        let path = env
            .create_file_stamped("stamped.md", b"x", 1_714_000_012_345)
            .unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        let millis = modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert_eq!(millis, 1_714_000_012_345);
    }

    #[test]
    fn test_config_points_at_isolated_roots() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert_eq!(cfg.storage.store_root, Some(env.store_root.clone()));
        assert_eq!(cfg.scratch.root, Some(env.scratch_root.clone()));
    }
}
