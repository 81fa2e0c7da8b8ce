//! # fileset-config
//!
//! Configuration management for fileset.
//!
//! Loads configuration from:
//! 1. `~/.fileset/config.toml` (global)
//! 2. `.fileset/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! The library core never reads this implicitly; an environment is built
//! from a `Config` value and threaded through operations explicitly.

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new(Config::load().unwrap_or_else(|e| {
        eprintln!(
            "[fileset-config] WARNING: Failed to load config: {}. Using defaults.",
            e
        );
        Config::default()
    }))
});

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Current config schema version
pub const CONFIG_VERSION: u32 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version (for forward compatibility)
    pub config_version: u32,
    pub storage: StorageConfig,
    pub scratch: ScratchConfig,
    pub cache: CacheConfig,
    pub ingest: IngestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            storage: StorageConfig::default(),
            scratch: ScratchConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl Config {
    /// Load config from standard locations (CWD-relative project config)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for_project(Path::new("."))
    }

    /// Load config for a specific project root directory.
    /// Resolution order: global → project → env vars.
    pub fn load_for_project(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.fileset/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load project config (<project_root>/.fileset/config.toml)
        let project_config_path = project_root.join(".fileset/config.toml");
        if project_config_path.exists() {
            debug!("Loading project config from {:?}", project_config_path);
            let contents = std::fs::read_to_string(&project_config_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.fileset/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".fileset/config.toml"))
    }

    /// Merge another config (project overrides global).
    /// Non-default values from `other` replace values in `self`.
    fn merge(&mut self, other: Config) {
        let default_storage = StorageConfig::default();
        if other.storage.store_root != default_storage.store_root {
            self.storage.store_root = other.storage.store_root;
        }

        let default_scratch = ScratchConfig::default();
        if other.scratch.root != default_scratch.root {
            self.scratch.root = other.scratch.root;
        }

        let default_cache = CacheConfig::default();
        if other.cache.root != default_cache.root {
            self.cache.root = other.cache.root;
        }

        let default_ingest = IngestConfig::default();
        if other.ingest.threads != default_ingest.threads {
            self.ingest.threads = other.ingest.threads;
        }
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("FILESET_STORE_ROOT") {
            self.storage.store_root = Some(PathBuf::from(root));
        }
        if let Ok(root) = std::env::var("FILESET_SCRATCH_ROOT") {
            self.scratch.root = Some(PathBuf::from(root));
        }
        if let Ok(root) = std::env::var("FILESET_CACHE_ROOT") {
            self.cache.root = Some(PathBuf::from(root));
        }
        if let Ok(threads) = std::env::var("FILESET_THREADS") {
            if let Ok(n) = threads.parse() {
                self.ingest.threads = Some(n);
            }
        }
    }

    /// Generate a config TOML template.
    pub fn init_toml() -> String {
        r#"# fileset configuration
config_version = 1

[storage]
# store_root = "/var/cache/fileset/store"   # default: per-process temp dir

[scratch]
# root = "/var/cache/fileset/scratch"       # default: per-process temp dir

[cache]
# root = "/var/cache/fileset/cache"         # manifest seed cache, optional

[ingest]
# threads = 4                               # default: min(cpus / 2, 4)
"#
        .to_string()
    }
}

/// Blob store location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob store directory. `None` means a per-process temporary directory
    /// reclaimed when the environment is dropped.
    /// Env override: FILESET_STORE_ROOT
    pub store_root: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { store_root: None }
    }
}

/// Scratch root for per-operation temporary subdirectories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScratchConfig {
    /// Env override: FILESET_SCRATCH_ROOT
    pub root: Option<PathBuf>,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self { root: None }
    }
}

/// Manifest seed cache location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Env override: FILESET_CACHE_ROOT
    pub root: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { root: None }
    }
}

/// Bulk ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of parallel ingest threads (None = auto)
    /// Env override: FILESET_THREADS
    pub threads: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { threads: None }
    }
}
