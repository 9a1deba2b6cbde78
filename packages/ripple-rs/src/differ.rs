//! Turning mutation logs into snapshots and change sets.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

use crate::error::Result;
use crate::path::Path;
use crate::recorder::{sequence_ops, LogEntry, MutationLog, OpKind, Operation};
use crate::snapshot::Snapshot;
use crate::tree;
use crate::value::{List, Value};

/// Canonical paths affected by one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    paths: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &Path) {
        self.paths.insert(path.canonical());
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.paths.contains(canonical)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// True if the root path was marked, i.e. anything may have changed.
    pub fn touches_root(&self) -> bool {
        self.paths.contains("")
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(", "))
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// Computes change sets and commits logs.
pub struct Differ;

impl Differ {
    /// Paths affected by `log`.
    ///
    /// - every operation contributes its own path
    /// - `add` and `remove` also contribute the parent path
    /// - a sequence edit also contributes the sequence's own path
    /// - an unrecognized operation marks the root
    pub fn changes(log: &MutationLog) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for entry in log.entries() {
            if let LogEntry::Composite { container, .. } = entry {
                changes.insert(container);
            }
            for op in entry.operations() {
                Self::contribute(&mut changes, op);
            }
        }
        changes
    }

    fn contribute(changes: &mut ChangeSet, op: &Operation) {
        changes.insert(&op.path);
        match op.kind {
            OpKind::Set | OpKind::Replace => {}
            OpKind::Add | OpKind::Remove => changes.insert(&op.path.parent()),
            OpKind::Unrecognized => {
                warn!(path = %op.path, "unrecognized operation, marking root as changed");
                changes.insert(&Path::root());
            }
        }
    }

    /// Replay `log` in order on top of `latest` and compute its change set.
    ///
    /// `latest` may be newer than the draft the log was recorded against, when
    /// another action committed in between. Replay tolerates that:
    /// - removing an entry that is already gone is a no-op
    /// - a sequence edit is re-derived against the sequence now in `latest`,
    ///   so it leaves exactly the sequence the action saw
    ///
    /// Any other failure commits nothing and `latest` stays current. Subtrees
    /// no operation touched remain shared with `latest`.
    pub fn commit(latest: &Snapshot, log: &MutationLog) -> Result<(Snapshot, ChangeSet)> {
        if log.is_empty() {
            return Ok((latest.clone(), ChangeSet::new()));
        }

        let mut root = latest.root().clone();
        let mut changes = ChangeSet::new();
        for entry in log.entries() {
            match entry {
                LogEntry::Primitive(op) => {
                    if op.kind == OpKind::Remove && tree::lookup(&root, &op.path).is_none() {
                        debug!(path = %op.path, "entry already removed, skipping");
                    } else {
                        tree::apply(&mut root, op)?;
                    }
                    Self::contribute(&mut changes, op);
                }
                LogEntry::Composite {
                    container, after, ..
                } => {
                    changes.insert(container);
                    for op in Self::rebase_sequence(&root, container, after) {
                        tree::apply(&mut root, &op)?;
                        Self::contribute(&mut changes, &op);
                    }
                }
            }
        }

        Ok((Snapshot::next(root, latest), changes))
    }

    /// Operations turning whatever is at `container` into `after`.
    fn rebase_sequence(root: &Value, container: &Path, after: &List) -> Vec<Operation> {
        match tree::lookup(root, container) {
            Some(Value::List(current)) => sequence_ops(container, current, after),
            _ => vec![Operation::set(container.clone(), Value::list(after.iter().cloned()))],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::Draft;
    use crate::recorder::MutationRecorder;
    use serde_json::json;

    fn commit_with(
        state: serde_json::Value,
        write: impl FnOnce(&mut MutationRecorder),
    ) -> (Snapshot, Snapshot, ChangeSet) {
        let before = Snapshot::from_json(state).unwrap();
        let mut recorder = MutationRecorder::new(Draft::new(&before));
        write(&mut recorder);
        let (_, log) = recorder.finish();
        let (after, changes) = Differ::commit(&before, &log).unwrap();
        (before, after, changes)
    }

    #[test]
    fn test_set_contributes_only_its_path() {
        let (before, after, changes) = commit_with(json!({"foo": "bar"}), |rec| {
            rec.set(&Path::parse("foo"), "bar!".into()).unwrap();
        });

        assert_eq!(changes.to_vec(), vec!["foo".to_string()]);
        assert_eq!(after.get("foo").unwrap().as_str(), Some("bar!"));
        assert_eq!(before.get("foo").unwrap().as_str(), Some("bar"));
        assert_eq!(after.version(), before.version() + 1);
    }

    #[test]
    fn test_push_contributes_container_and_index() {
        let (_, after, changes) = commit_with(json!({"list": ["a"]}), |rec| {
            rec.edit_sequence(&Path::parse("list"), "push", |items| items.push("b".into()))
                .unwrap();
        });

        assert!(changes.contains("list"));
        assert!(changes.contains("list.1"));
        assert!(!changes.contains("list.0"));
        assert_eq!(after.get("list").unwrap().to_json(), json!(["a", "b"]));
    }

    #[test]
    fn test_adding_root_key_marks_root() {
        let (_, _, changes) = commit_with(json!({}), |rec| {
            rec.set(&Path::parse("fresh"), 1.into()).unwrap();
        });
        assert!(changes.contains("fresh"));
        assert!(changes.touches_root());
    }

    #[test]
    fn test_untouched_subtrees_are_shared() {
        let (before, after, _) = commit_with(
            json!({"a": {"deep": {"x": 1}}, "b": {"y": [1, 2]}}),
            |rec| {
                rec.set(&Path::parse("a.deep.x"), 2.into()).unwrap();
            },
        );

        assert!(after.shares_subtree(&before, "b"));
        assert!(after.shares_subtree(&before, "b.y"));
        assert!(!after.shares_subtree(&before, "a"));
        assert!(!after.shares_subtree(&before, "a.deep"));
    }

    #[test]
    fn test_change_set_covers_every_operation() {
        let (_, _, changes) = commit_with(json!({"m": {"k": 1}, "l": [1, 2, 3]}), |rec| {
            rec.remove(&Path::parse("m.k")).unwrap();
            rec.set(&Path::parse("m.z"), 5.into()).unwrap();
            rec.edit_sequence(&Path::parse("l"), "pop", |items| items.pop())
                .unwrap();
        });

        for path in ["m.k", "m", "m.z", "l", "l.2"] {
            assert!(changes.contains(path), "missing {path}");
        }
    }

    #[test]
    fn test_unrecognized_operation_marks_root() {
        let log: MutationLog = vec![Operation::new(OpKind::Unrecognized, "a.b", None)]
            .into_iter()
            .collect();
        let changes = Differ::changes(&log);
        assert!(changes.touches_root());
        assert!(changes.contains("a.b"));
    }

    #[test]
    fn test_failed_replay_commits_nothing() {
        let before = Snapshot::from_json(json!({"a": 1})).unwrap();
        let log: MutationLog = vec![Operation::set("b", 2), Operation::set("gone.x", 1)]
            .into_iter()
            .collect();

        assert!(Differ::commit(&before, &log).is_err());
        assert!(before.get("b").is_none());
    }

    #[test]
    fn test_remove_of_absent_entry_is_skipped() {
        let base = Snapshot::from_json(json!({"count": 0, "selected": 1})).unwrap();
        let mut recorder = MutationRecorder::new(Draft::new(&base));
        recorder.set(&Path::parse("count"), 1.into()).unwrap();
        recorder.remove(&Path::parse("selected")).unwrap();
        let (_, log) = recorder.finish();

        // another commit removed "selected" after the draft was taken
        let latest = Snapshot::from_json(json!({"count": 0})).unwrap();
        let (after, changes) = Differ::commit(&latest, &log).unwrap();

        assert_eq!(after.root().to_json(), json!({"count": 1}));
        assert!(changes.contains("count"));
        assert!(changes.contains("selected"));
    }

    #[test]
    fn test_sequence_edit_rebases_onto_latest() {
        let base = Snapshot::from_json(json!({"l": ["a", "b"]})).unwrap();
        let mut recorder = MutationRecorder::new(Draft::new(&base));
        recorder
            .edit_sequence(&Path::parse("l"), "pop", |items| items.pop())
            .unwrap();
        let (_, log) = recorder.finish();

        // recorded as `remove l.1`, but the list is now empty
        let latest = Snapshot::from_json(json!({"l": []})).unwrap();
        let (after, changes) = Differ::commit(&latest, &log).unwrap();

        assert_eq!(after.get("l").unwrap().to_json(), json!(["a"]));
        assert!(changes.contains("l"));
        assert!(changes.contains("l.0"));
    }

    #[test]
    fn test_empty_log_keeps_snapshot() {
        let before = Snapshot::from_json(json!({"a": 1})).unwrap();
        let (after, changes) = Differ::commit(&before, &MutationLog::new()).unwrap();
        assert!(changes.is_empty());
        assert_eq!(after.version(), before.version());
    }
}
