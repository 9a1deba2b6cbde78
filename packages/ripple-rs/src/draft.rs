//! Mutable working copies of a snapshot.

use crate::error::Result;
use crate::path::Path;
use crate::recorder::Operation;
use crate::snapshot::Snapshot;
use crate::tree;
use crate::value::Value;

/// A working copy bound to one baseline [`Snapshot`].
///
/// Reads fall through to the baseline until a write touches a branch; only
/// that branch is copied. A draft is owned by exactly one in-flight action and
/// is consumed when its recorder is committed.
pub struct Draft {
    baseline: Snapshot,
    working: Value,
}

impl Draft {
    pub fn new(baseline: &Snapshot) -> Self {
        Self {
            baseline: baseline.clone(),
            working: baseline.root().clone(),
        }
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.baseline
    }

    /// Current working root.
    pub fn root(&self) -> &Value {
        &self.working
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        tree::lookup(&self.working, path)
    }

    pub(crate) fn apply(&mut self, op: &Operation) -> Result<()> {
        tree::apply(&mut self.working, op)
    }

    /// True while no write has copied anything out of the baseline.
    pub fn is_pristine(&self) -> bool {
        self.working.same(self.baseline.root())
    }
}

impl std::fmt::Debug for Draft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Draft")
            .field("baseline_version", &self.baseline.version())
            .field("pristine", &self.is_pristine())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_fall_through_until_written() {
        let snapshot = Snapshot::from_json(json!({"a": {"x": 1}, "b": {"y": 2}})).unwrap();
        let mut draft = Draft::new(&snapshot);
        assert!(draft.is_pristine());
        assert!(draft
            .get(&Path::parse("a"))
            .unwrap()
            .same(snapshot.get("a").unwrap()));

        draft.apply(&Operation::set("a.x", 10)).unwrap();

        assert!(!draft.is_pristine());
        assert_eq!(draft.get(&Path::parse("a.x")).unwrap().as_i64(), Some(10));
        assert_eq!(snapshot.get("a.x").unwrap().as_i64(), Some(1));
        assert!(draft
            .get(&Path::parse("b"))
            .unwrap()
            .same(snapshot.get("b").unwrap()));
    }
}
