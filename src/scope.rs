use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

/// Endpoints gained and lost between two scans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ScopeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A missing file counts as an empty scope; an unparsable one is an error.
fn read_scope(path: &Path) -> anyhow::Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let list: Vec<String> =
        serde_json::from_str(&text).with_context(|| format!("{} is not a JSON list of endpoints", path.display()))?;
    Ok(list.into_iter().collect())
}

/// Compare two `endpoints.json` files. Both lists come back sorted.
pub fn diff_scope(previous: &Path, current: &Path) -> anyhow::Result<ScopeDiff> {
    let prev = read_scope(previous)?;
    let curr = read_scope(current)?;
    Ok(ScopeDiff {
        added: curr.difference(&prev).cloned().collect(),
        removed: prev.difference(&curr).cloned().collect(),
    })
}
