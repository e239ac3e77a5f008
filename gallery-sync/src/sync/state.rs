use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::persist::{StoreError, load_json, write_json_atomic};

/// Cheap identity for "has this file changed": size and mtime, not content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_stat(size_bytes: u64, modified: SystemTime) -> Self {
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let digest = md5::compute(format!("{size_bytes}-{nanos}"));
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

pub type StateSnapshot = BTreeMap<String, Fingerprint>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateDiff {
    pub unchanged: BTreeSet<String>,
    pub changed_or_new: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

/// Splits `current` against `previous` into three disjoint path sets.
pub fn diff(current: &StateSnapshot, previous: &StateSnapshot) -> StateDiff {
    let mut out = StateDiff::default();
    for (path, fingerprint) in current {
        match previous.get(path) {
            Some(prior) if prior == fingerprint => {
                out.unchanged.insert(path.clone());
            }
            _ => {
                out.changed_or_new.insert(path.clone());
            }
        }
    }
    out.removed = previous
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect();
    out
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<StateSnapshot, StoreError> {
        load_json(&self.path).await
    }

    pub async fn persist(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        write_json_atomic(&self.path, snapshot).await
    }
}
