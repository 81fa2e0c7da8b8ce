//! Materializing a fileset into a concrete directory.
//!
//! Commit reconciles the target against its last committed state (held in
//! the environment's shadow map) so only changed paths touch the
//! filesystem. Files land as hard links to the read-only blob files, so a
//! commit is O(files changed) rather than O(total bytes) and committed
//! files carry the captured modification times.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use fileset_cas::modified_millis;

use crate::diff;
use crate::entry::Entry;
use crate::fileset::{AddOptions, Fileset};
use crate::{FilesetError, Result};

pub(crate) fn commit(fileset: &Fileset, target_dir: &Path) -> Result<Fileset> {
    fs::create_dir_all(target_dir)?;
    let canonical = target_dir.canonicalize()?;
    let env = fileset.env();

    // Previous state: the shadow entry when the directory is untouched
    // since the last commit, otherwise the directory's actual current
    // contents.
    let current_stamp = modified_millis(&canonical)?;
    let previous = match env.shadow_get(&canonical) {
        Some((tree, stamp)) if current_stamp <= stamp => Fileset::with_tree(env, tree),
        _ => {
            debug!(
                target = %canonical.display(),
                "no usable shadow state, ingesting current contents"
            );
            Fileset::new(env).add_directory(&canonical, &AddOptions::new())?
        }
    };

    let delta = diff::diff(Some(&previous), fileset);

    // Unlink what is leaving or being replaced.
    for path in delta.removed.ls().chain(delta.changed.ls()) {
        let dest = canonical.join(path);
        if dest.exists() {
            fs::remove_file(&dest)?;
        }
    }

    // Link what is arriving, deepest paths first so files land before the
    // directories above them are considered on cleanup races.
    let mut pending: Vec<(&str, &Entry)> = delta
        .added
        .iter()
        .chain(delta.changed.iter())
        .collect();
    pending.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then(a.cmp(b)));

    let mut conflicts: Vec<String> = Vec::new();
    for (path, entry) in pending {
        let dest = canonical.join(path);
        if let Err(e) = link_entry(entry, &dest) {
            warn!(path = %path, error = %e, "commit conflict, dropping entry");
            conflicts.push(path.to_string());
        }
    }

    let committed = if conflicts.is_empty() {
        fileset.clone()
    } else {
        fileset.remove(&conflicts)
    };

    let stamp = modified_millis(&canonical)?;
    env.shadow_put(canonical, committed.tree().clone(), stamp);
    Ok(committed)
}

/// Hard-link one entry's blob to its destination, creating parents.
fn link_entry(entry: &Entry, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        // Fails when a regular file occupies a required parent path.
        fs::create_dir_all(parent)?;
    }
    if dest.exists() {
        if dest.is_dir() {
            return Err(FilesetError::Conflict(dest.display().to_string()));
        }
        fs::remove_file(dest)?;
    }
    let blob_path: PathBuf = entry.path()?;
    fs::hard_link(&blob_path, dest)?;
    Ok(())
}
