//! Immutable, versioned state snapshots.

use std::fmt;

use crate::error::{Result, RippleError};
use crate::path::Path;
use crate::tree;
use crate::value::Value;

/// An immutable version of the state tree.
///
/// Cloning is cheap: the root is an `Arc`-shared map. A snapshot produced by a
/// commit shares every subtree the commit did not touch with its predecessor,
/// so observers can compare branches by reference with [`Snapshot::shares_subtree`].
#[derive(Clone)]
pub struct Snapshot {
    root: Value,
    version: u64,
}

impl Snapshot {
    /// Create the initial snapshot (version 0). The root must be a map.
    pub fn new(root: Value) -> Result<Self> {
        if !matches!(root, Value::Map(_)) {
            return Err(RippleError::InvalidRoot);
        }
        Ok(Self { root, version: 0 })
    }

    /// Create the initial snapshot from JSON.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Self::new(Value::from(json))
    }

    pub(crate) fn next(root: Value, previous: &Snapshot) -> Self {
        Self {
            root,
            version: previous.version + 1,
        }
    }

    /// Monotonic commit counter, starting at 0.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Value at `path`, if any.
    pub fn get(&self, path: impl Into<Path>) -> Option<&Value> {
        tree::lookup(&self.root, &path.into())
    }

    /// True if both snapshots hold the very same subtree (or equal primitive) at `path`.
    pub fn shares_subtree(&self, other: &Snapshot, path: impl Into<Path>) -> bool {
        let path = path.into();
        match (self.get(path.clone()), other.get(path)) {
            (Some(a), Some(b)) => a.same(b),
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.root.to_json()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("root", &self.root.to_json())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_must_be_map() {
        assert!(matches!(
            Snapshot::from_json(json!([1, 2])),
            Err(RippleError::InvalidRoot)
        ));
        assert!(Snapshot::from_json(json!({})).is_ok());
    }

    #[test]
    fn test_get_by_canonical_path() {
        let snapshot = Snapshot::from_json(json!({"list": ["a", "b"]})).unwrap();
        assert_eq!(snapshot.get("list.1").and_then(Value::as_str), Some("b"));
        assert_eq!(snapshot.version(), 0);
    }

    #[test]
    fn test_clone_shares_everything() {
        let snapshot = Snapshot::from_json(json!({"a": {"b": 1}})).unwrap();
        let copy = snapshot.clone();
        assert!(snapshot.shares_subtree(&copy, ""));
        assert!(snapshot.shares_subtree(&copy, "a"));
        assert!(!snapshot.shares_subtree(&copy, "missing"));
    }
}
