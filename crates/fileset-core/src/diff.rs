//! Set-algebraic differences between two filesets.

use std::collections::BTreeMap;

use crate::entry::Entry;
use crate::fileset::Fileset;

/// Which component of entry identity a diff compares on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffKey {
    /// Full blob identity: content hash plus captured timestamp.
    #[default]
    BlobId,
    /// Content hash only, ignoring timestamps.
    Hash,
}

impl DiffKey {
    fn same(&self, a: &Entry, b: &Entry) -> bool {
        match self {
            DiffKey::BlobId => a.blob_id() == b.blob_id(),
            DiffKey::Hash => a.hash() == b.hash(),
        }
    }
}

/// The three disjoint subsets produced by comparing two filesets.
///
/// `added` and `changed` carry entries from the `after` side; `removed`
/// carries entries from the `before` side.
#[derive(Debug, Clone)]
pub struct Diff {
    pub added: Fileset,
    pub removed: Fileset,
    pub changed: Fileset,
}

impl Diff {
    /// Every path that needs new content in `after`: added ∪ changed.
    pub fn touched(&self) -> Fileset {
        self.added.merge(&self.changed)
    }
}

/// Diff `after` against `before` by full blob identity.
///
/// With no `before` fileset everything in `after` is added.
pub fn diff(before: Option<&Fileset>, after: &Fileset) -> Diff {
    diff_with(before, after, DiffKey::BlobId)
}

/// Diff with an explicit identity projection.
pub fn diff_with(before: Option<&Fileset>, after: &Fileset, key: DiffKey) -> Diff {
    let empty;
    let before = match before {
        Some(fileset) => fileset,
        None => {
            empty = Fileset::new(after.env());
            &empty
        }
    };

    let mut added = BTreeMap::new();
    let mut changed = BTreeMap::new();
    for (path, entry) in after.tree() {
        match before.tree().get(path) {
            None => {
                added.insert(path.clone(), entry.clone());
            }
            Some(previous) if !key.same(previous, entry) => {
                changed.insert(path.clone(), entry.clone());
            }
            Some(_) => {}
        }
    }

    let mut removed = BTreeMap::new();
    for (path, entry) in before.tree() {
        if !after.tree().contains_key(path) {
            removed.insert(path.clone(), entry.clone());
        }
    }

    Diff {
        added: Fileset::with_tree(after.env(), added),
        removed: Fileset::with_tree(before.env(), removed),
        changed: Fileset::with_tree(after.env(), changed),
    }
}

/// Paths present in `after` but not `before`.
pub fn added(before: Option<&Fileset>, after: &Fileset) -> Fileset {
    diff(before, after).added
}

/// Paths present in `before` but not `after`, with `before`'s entries.
pub fn removed(before: Option<&Fileset>, after: &Fileset) -> Fileset {
    diff(before, after).removed
}

/// Paths present in both whose entry identity differs.
pub fn changed(before: Option<&Fileset>, after: &Fileset) -> Fileset {
    diff(before, after).changed
}
