//! Path-regex-driven content combiners.
//!
//! When `add_directory` walks a path that already exists in the fileset and
//! the path matches a merger rule, the rule's combiner produces the merged
//! bytes instead of the incoming file simply replacing the old entry.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use regex::Regex;

/// Combines two colliding file contents into merged output bytes.
///
/// Implementations must fully consume both readers and write the merged
/// bytes eagerly; the caller closes all three streams afterwards. Any
/// function with the matching shape is a merger.
pub trait Merger: Send + Sync {
    fn merge(
        &self,
        old: &mut dyn Read,
        new: &mut dyn Read,
        out: &mut dyn Write,
    ) -> io::Result<()>;
}

impl<F> Merger for F
where
    F: Fn(&mut dyn Read, &mut dyn Read, &mut dyn Write) -> io::Result<()> + Send + Sync,
{
    fn merge(
        &self,
        old: &mut dyn Read,
        new: &mut dyn Read,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        self(old, new, out)
    }
}

/// Ordered table of path patterns to combiners. The first matching rule
/// wins; patterns use partial-match semantics on the logical path.
#[derive(Clone, Default)]
pub struct MergerSet {
    rules: Vec<(Regex, Arc<dyn Merger>)>,
}

impl MergerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: Regex, merger: impl Merger + 'static) {
        self.rules.push((pattern, Arc::new(merger)));
    }

    pub fn find(&self, path: &str) -> Option<&Arc<dyn Merger>> {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(path))
            .map(|(_, merger)| merger)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for MergerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergerSet")
            .field("rules", &self.rules.len())
            .finish()
    }
}
