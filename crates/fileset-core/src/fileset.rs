//! The immutable fileset tree and its functional update operations.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use md5::{Digest, Md5};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use fileset_cas::BlobRef;

use crate::entry::Entry;
use crate::env::Environment;
use crate::ingest;
use crate::merger::{Merger, MergerSet};
use crate::meta::{merge_meta, Meta, MetaValue};
use crate::{FilesetError, Result};

/// Options for [`Fileset::add_directory`].
#[derive(Clone, Default)]
pub struct AddOptions {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    mergers: MergerSet,
    meta: Meta,
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit only paths matching at least one include pattern (partial
    /// match on the logical path).
    pub fn include(mut self, pattern: Regex) -> Self {
        self.include.push(pattern);
        self
    }

    /// Drop paths matching any exclude pattern. Exclude wins over include.
    pub fn exclude(mut self, pattern: Regex) -> Self {
        self.exclude.push(pattern);
        self
    }

    /// Resolve path collisions matching `pattern` through `merger` instead
    /// of replacement.
    pub fn merger(mut self, pattern: Regex, merger: impl Merger + 'static) -> Self {
        self.mergers.insert(pattern, merger);
        self
    }

    /// Tag every ingested entry with this key/value.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// A path is dropped iff an exclude matches, or includes were given and
    /// none of them match.
    fn admits(&self, path: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(path)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(path)) {
            return false;
        }
        true
    }
}

impl fmt::Debug for AddOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddOptions")
            .field("include", &self.include.len())
            .field("exclude", &self.exclude.len())
            .field("mergers", &self.mergers)
            .field("meta", &self.meta)
            .finish()
    }
}

/// Normalize separators to the canonical forward-slash logical form.
pub(crate) fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Logical path of `path` relative to `base`, forward-slash joined.
fn logical_path(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn is_transient(error: &walkdir::Error) -> bool {
    error
        .io_error()
        .is_some_and(|io_err| io_err.kind() == io::ErrorKind::NotFound)
}

/// An immutable mapping from logical paths to entries.
///
/// Update operations return a new fileset and leave the input untouched.
/// Entries are shared between derived filesets, so backing blobs are stored
/// once and stay alive while any fileset still references them.
#[derive(Clone)]
pub struct Fileset {
    env: Environment,
    tree: BTreeMap<String, Entry>,
}

impl Fileset {
    /// The empty fileset.
    pub fn new(env: &Environment) -> Fileset {
        Fileset {
            env: env.clone(),
            tree: BTreeMap::new(),
        }
    }

    pub(crate) fn with_tree(env: &Environment, tree: BTreeMap<String, Entry>) -> Fileset {
        Fileset {
            env: env.clone(),
            tree,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn tree(&self) -> &BTreeMap<String, Entry> {
        &self.tree
    }

    /// Walk `source_dir` (following symlinks), intern every regular file
    /// that passes the include/exclude patterns, and union the result into
    /// this fileset.
    ///
    /// On a path collision a matching merger rule combines the contents;
    /// otherwise the incoming entry replaces the existing one. Each ingested
    /// entry is tagged with `options.meta`, merged into the collided entry's
    /// metadata where there is one. Files that disappear mid-walk are
    /// logged and skipped.
    pub fn add_directory(&self, source_dir: &Path, options: &AddOptions) -> Result<Fileset> {
        let mut candidates = Vec::new();
        for walked in WalkDir::new(source_dir).follow_links(true) {
            let walked = match walked {
                Ok(entry) => entry,
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "entry vanished during walk, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !walked.file_type().is_file() {
                continue;
            }
            let Some(rel) = logical_path(source_dir, walked.path()) else {
                continue;
            };
            let rel = normalize(&rel);
            if !options.admits(&rel) {
                continue;
            }
            candidates.push((rel, walked.path().to_path_buf()));
        }

        let interned = ingest::ingest_files(self.env.store(), &candidates, self.env.threads())?;

        let mut tree = self.tree.clone();
        for (rel, blob) in interned {
            let existing = tree.get(&rel).cloned();
            let base_meta = existing
                .as_ref()
                .map(|e| e.meta().clone())
                .unwrap_or_default();
            let meta = merge_meta(&base_meta, &options.meta);
            let blob = match (&existing, options.mergers.find(&rel)) {
                (Some(old), Some(merger)) => {
                    debug!(path = %rel, "combining colliding entry");
                    self.combine(old, &blob, merger.as_ref())?
                }
                _ => blob,
            };
            tree.insert(rel, Entry::new(blob, meta));
        }
        Ok(Fileset {
            env: self.env.clone(),
            tree,
        })
    }

    /// Run a merger over a collision, interning its output as a fresh blob.
    fn combine(&self, old: &Entry, new: &BlobRef, merger: &dyn Merger) -> Result<BlobRef> {
        let scratch = self.env.new_tmpdir()?;
        let out_path = scratch.join("merged");
        {
            let mut old_reader = old.open()?;
            let mut new_reader = new.open()?;
            let mut out = File::create(&out_path)?;
            merger.merge(&mut old_reader, &mut new_reader, &mut out)?;
        }
        Ok(self.env.store().add(&out_path)?)
    }

    /// This fileset with the given paths absent. Unknown paths are ignored.
    pub fn remove<I, S>(&self, paths: I) -> Fileset
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = self.tree.clone();
        for path in paths {
            tree.remove(&normalize(path.as_ref()));
        }
        Fileset {
            env: self.env.clone(),
            tree,
        }
    }

    /// Move the entry at `from` to `to`.
    ///
    /// Fails with [`FilesetError::NotFound`] when `from` is absent and with
    /// [`FilesetError::Conflict`] when `to` is already present. Renaming a
    /// path onto itself returns the fileset unchanged.
    pub fn rename(&self, from: &str, to: &str) -> Result<Fileset> {
        let from = normalize(from);
        let to = normalize(to);
        if from == to {
            return Ok(self.clone());
        }
        if self.tree.contains_key(&to) {
            return Err(FilesetError::Conflict(to));
        }
        let mut tree = self.tree.clone();
        match tree.remove(&from) {
            Some(entry) => {
                tree.insert(to, entry);
                Ok(Fileset {
                    env: self.env.clone(),
                    tree,
                })
            }
            None => Err(FilesetError::NotFound(from)),
        }
    }

    /// Keep only the entries the predicate admits.
    pub fn filter<F>(&self, mut predicate: F) -> Fileset
    where
        F: FnMut(&str, &Entry) -> bool,
    {
        let tree = self
            .tree
            .iter()
            .filter(|&(path, entry)| predicate(path.as_str(), entry))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        Fileset {
            env: self.env.clone(),
            tree,
        }
    }

    /// Keep only the entries whose metadata the predicate admits.
    pub fn filter_by_meta<F>(&self, mut predicate: F) -> Fileset
    where
        F: FnMut(&Meta) -> bool,
    {
        self.filter(|_, entry| predicate(entry.meta()))
    }

    /// Path-union of two filesets.
    ///
    /// On collision the entry with the greater captured time wins and keeps
    /// its blob; metadata is the union with the winner's values overlaid. A
    /// collision that discards a diverging hash or metadata is reported as a
    /// warning.
    pub fn merge(&self, other: &Fileset) -> Fileset {
        let mut tree = self.tree.clone();
        for (path, theirs) in &other.tree {
            let replacement = match tree.get(path) {
                None => theirs.clone(),
                Some(ours) => {
                    let (winner, loser) = if theirs.time() >= ours.time() {
                        (theirs, ours)
                    } else {
                        (ours, theirs)
                    };
                    if loser.hash() != winner.hash() || loser.meta() != winner.meta() {
                        warn!(
                            path = %path,
                            winner = %winner.blob_id(),
                            loser = %loser.blob_id(),
                            "merge collision discards diverging entry"
                        );
                    }
                    winner.with_meta(merge_meta(loser.meta(), winner.meta()))
                }
            };
            tree.insert(path.clone(), replacement);
        }
        Fileset {
            env: self.env.clone(),
            tree,
        }
    }

    /// Path-union of several filesets, folded left to right.
    pub fn merge_all<'a, I>(&self, others: I) -> Fileset
    where
        I: IntoIterator<Item = &'a Fileset>,
    {
        others
            .into_iter()
            .fold(self.clone(), |acc, other| acc.merge(other))
    }

    /// Logical paths present, in unspecified order.
    pub fn ls(&self) -> impl Iterator<Item = &str> {
        self.tree.keys().map(|path| path.as_str())
    }

    /// Paths and entries present.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.tree.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.tree.get(&normalize(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entry(path).is_some()
    }

    /// The entry's content hash; `None` for an absent path.
    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.entry(path).map(|entry| entry.hash())
    }

    /// The entry's captured timestamp; `None` for an absent path.
    pub fn time_of(&self, path: &str) -> Option<u64> {
        self.entry(path).map(|entry| entry.time())
    }

    /// Readable handle to the entry's bytes; `None` for an absent path.
    pub fn open_content(&self, path: &str) -> Result<Option<File>> {
        match self.entry(path) {
            Some(entry) => Ok(Some(entry.open()?)),
            None => Ok(None),
        }
    }

    /// Path to a readable on-disk file for the entry (with deletion
    /// recovery); `None` for an absent path.
    pub fn open_file(&self, path: &str) -> Result<Option<PathBuf>> {
        match self.entry(path) {
            Some(entry) => Ok(Some(entry.path()?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// MD5 over the `(path, hash[, time])` triples in path order; a
    /// value-level identity for the whole fileset.
    pub fn checksum(&self, include_timestamps: bool) -> String {
        let mut hasher = Md5::new();
        for (path, entry) in &self.tree {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.hash().as_bytes());
            if include_timestamps {
                hasher.update([0u8]);
                hasher.update(entry.time().to_be_bytes());
            }
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    /// Materialize this fileset into `target_dir` using hard links,
    /// reconciling against the directory's last committed state so only
    /// changed paths touch the filesystem. The returned fileset omits
    /// entries whose destination could not be created.
    pub fn commit(&self, target_dir: &Path) -> Result<Fileset> {
        crate::commit::commit(self, target_dir)
    }
}

impl fmt::Debug for Fileset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fileset")
            .field("entries", &self.tree.len())
            .finish()
    }
}
